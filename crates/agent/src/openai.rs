use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::BackendError;
use crate::llm::{ChatBackend, ChatMessage, ChatRequest, ChatResponse, ToolCall};

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct OpenAiChat {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

impl OpenAiChat {
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        Self {
            base_url,
            api_key,
            model,
            client: reqwest::Client::new(),
        }
    }

    fn headers(&self) -> Result<HeaderMap, BackendError> {
        let mut headers = HeaderMap::new();
        if !self.api_key.trim().is_empty() {
            let auth = format!("Bearer {}", self.api_key.trim());
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth)
                    .map_err(|_| BackendError::Transport("invalid API key".to_string()))?,
            );
        }
        Ok(headers)
    }
}

fn to_wire(message: &ChatMessage) -> serde_json::Value {
    match message {
        ChatMessage::System(content) => json!({ "role": "system", "content": content }),
        ChatMessage::User(content) => json!({ "role": "user", "content": content }),
        ChatMessage::Assistant { content, tool_calls } if tool_calls.is_empty() => {
            json!({ "role": "assistant", "content": content })
        }
        ChatMessage::Assistant { content, tool_calls } => {
            let calls: Vec<_> = tool_calls
                .iter()
                .enumerate()
                .map(|(i, call)| {
                    json!({
                        "id": call_id(call.id.as_deref(), i),
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments.to_string(),
                        }
                    })
                })
                .collect();
            json!({ "role": "assistant", "content": content, "tool_calls": calls })
        }
        ChatMessage::Tool { call_id: id, name, content } => json!({
            "role": "tool",
            "tool_call_id": id.clone().unwrap_or_else(|| name.clone()),
            "content": content,
        }),
    }
}

fn call_id(id: Option<&str>, index: usize) -> String {
    id.map(str::to_string).unwrap_or_else(|| format!("call_{index}"))
}

/// Arguments arrive as a JSON-encoded string; keep unparsable text verbatim so
/// the tool's own argument adapter can judge it.
fn parse_arguments(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

#[async_trait]
impl ChatBackend for OpenAiChat {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, BackendError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let body = CompletionRequest {
            model: &self.model,
            temperature: request.temperature,
            messages: request.messages.iter().map(to_wire).collect(),
            tools: request
                .tools
                .iter()
                .map(|spec| json!({ "type": "function", "function": spec }))
                .collect(),
        };

        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(BackendError::Status { status, body });
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;

        let message = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Decode("response has no choices".to_string()))?
            .message;

        Ok(ChatResponse {
            content: message.content.unwrap_or_default(),
            tool_calls: message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|call| ToolCall {
                    id: call.id,
                    name: call.function.name,
                    arguments: parse_arguments(&call.function.arguments),
                })
                .collect(),
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_tool_calls_encode_arguments_as_string() {
        let message = ChatMessage::Assistant {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: Some("call_abc".to_string()),
                name: "search_knowledge_base".to_string(),
                arguments: json!({ "query": "ETC" }),
            }],
        };
        let wire = to_wire(&message);
        assert_eq!(wire["tool_calls"][0]["id"], "call_abc");
        assert_eq!(wire["tool_calls"][0]["function"]["arguments"], "{\"query\":\"ETC\"}");
    }

    #[test]
    fn unparsable_arguments_are_kept_as_text() {
        assert_eq!(parse_arguments("{\"query\": \"x\"}"), json!({ "query": "x" }));
        assert_eq!(parse_arguments("银行卡洗钱"), json!("银行卡洗钱"));
    }

    #[test]
    fn null_content_decodes_as_empty() {
        let raw = json!({
            "choices": [{ "message": { "content": null, "tool_calls": [
                { "id": "c1", "type": "function", "function": { "name": "t", "arguments": "{}" } }
            ] } }]
        });
        let parsed: CompletionResponse = serde_json::from_value(raw).unwrap();
        assert!(parsed.choices[0].message.content.is_none());
        let calls = parsed.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id.as_deref(), Some("c1"));
    }
}
