use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::error::ToolError;
use crate::llm::{ToolCall, ToolSpec};

/// A named capability the reasoner may call during its loop. Calls must be
/// idempotent: a retried agent invocation may repeat them.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object.
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "search text" }
            },
            "required": ["query"]
        })
    }

    async fn call(&self, arguments: &Value) -> Result<String, ToolError>;
}

/// The tools exposed to one agent invocation.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }

    pub async fn dispatch(&self, call: &ToolCall) -> Result<String, ToolError> {
        let tool = self
            .tools
            .iter()
            .find(|tool| tool.name() == call.name)
            .ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;
        tool.call(&call.arguments).await
    }
}

/// Accepted shapes of a text query argument:
///
/// - `"text"`
/// - `{"query": "text"}`
/// - `{"query": {"description": "text"}}` or `{"query": {"value": "text"}}`
/// - any of the above object shapes JSON-encoded inside a string
///
/// Everything else is rejected.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum QueryInput {
    Text(String),
    Object { query: QueryField },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum QueryField {
    Text(String),
    Described { description: String },
    Valued { value: String },
}

impl QueryInput {
    pub fn parse(tool: &str, arguments: &Value) -> Result<Self, ToolError> {
        let invalid = |reason: String| ToolError::InvalidArguments {
            tool: tool.to_string(),
            reason,
        };

        let input: QueryInput = serde_json::from_value(arguments.clone())
            .map_err(|_| invalid(format!("expected a query string, got {arguments}")))?;

        // An object shape smuggled in as JSON text.
        let input = match input {
            QueryInput::Text(text) if text.trim_start().starts_with('{') => {
                match serde_json::from_str::<QueryInput>(&text) {
                    Ok(inner @ QueryInput::Object { .. }) => inner,
                    _ => QueryInput::Text(text),
                }
            }
            other => other,
        };

        if input.text().trim().is_empty() {
            return Err(invalid("query is empty".to_string()));
        }
        Ok(input)
    }

    pub fn text(&self) -> &str {
        match self {
            QueryInput::Text(text) => text,
            QueryInput::Object { query } => match query {
                QueryField::Text(text) => text,
                QueryField::Described { description } => description,
                QueryField::Valued { value } => value,
            },
        }
    }

    pub fn into_text(self) -> String {
        self.text().trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(value: Value) -> Result<String, ToolError> {
        QueryInput::parse("search", &value).map(QueryInput::into_text)
    }

    #[test]
    fn accepts_documented_shapes() {
        assert_eq!(parse(json!("银行卡洗钱")).unwrap(), "银行卡洗钱");
        assert_eq!(parse(json!({ "query": "安全账户" })).unwrap(), "安全账户");
        assert_eq!(parse(json!({ "query": { "description": "ETC 认证" } })).unwrap(), "ETC 认证");
        assert_eq!(parse(json!({ "query": { "value": "杀猪盘" } })).unwrap(), "杀猪盘");
        assert_eq!(parse(json!("{\"query\": \"征信修复\"}")).unwrap(), "征信修复");
    }

    #[test]
    fn extra_fields_next_to_query_are_ignored() {
        assert_eq!(parse(json!({ "query": "退改签", "top_k": 3 })).unwrap(), "退改签");
    }

    #[test]
    fn rejects_other_shapes() {
        for bad in [
            json!(42),
            json!(null),
            json!(["a", "b"]),
            json!({ "q": "x" }),
            json!({ "query": 7 }),
            json!({ "query": { "text": "x" } }),
            json!("   "),
        ] {
            assert!(
                matches!(parse(bad.clone()), Err(ToolError::InvalidArguments { .. })),
                "accepted {bad}"
            );
        }
    }

    #[test]
    fn json_text_that_is_not_a_query_object_stays_text() {
        assert_eq!(parse(json!("{not json")).unwrap(), "{not json");
    }

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "echo the query"
        }

        async fn call(&self, arguments: &Value) -> Result<String, ToolError> {
            QueryInput::parse(self.name(), arguments).map(QueryInput::into_text)
        }
    }

    #[tokio::test]
    async fn dispatch_routes_by_name() {
        let tools = ToolSet::new().with(Arc::new(Echo));
        let call = ToolCall {
            id: None,
            name: "echo".to_string(),
            arguments: json!({ "query": "hi" }),
        };
        assert_eq!(tools.dispatch(&call).await.unwrap(), "hi");

        let unknown = ToolCall {
            name: "missing".to_string(),
            ..call
        };
        assert_eq!(
            tools.dispatch(&unknown).await,
            Err(ToolError::UnknownTool("missing".to_string()))
        );
        assert_eq!(tools.specs()[0].name, "echo");
    }
}
