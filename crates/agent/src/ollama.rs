use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::llm::{ChatBackend, ChatMessage, ChatRequest, ChatResponse, ToolCall, ToolSpec};

/// Ollama `/api/chat` client.
#[derive(Clone)]
pub struct OllamaChat {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OllamaTool<'a>>,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Serialize)]
struct OllamaTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolSpec,
}

#[derive(Serialize, Deserialize, Default)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OllamaToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct OllamaToolCall {
    function: OllamaFunction,
}

#[derive(Serialize, Deserialize)]
struct OllamaFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
}

impl OllamaChat {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url,
            model,
            client: reqwest::Client::new(),
        }
    }

    pub fn default() -> Self {
        Self::new(
            "http://localhost:11434".to_string(),
            "llama3".to_string(),
        )
    }
}

fn to_wire(message: &ChatMessage) -> OllamaMessage {
    match message {
        ChatMessage::System(content) => OllamaMessage {
            role: "system".to_string(),
            content: content.clone(),
            ..Default::default()
        },
        ChatMessage::User(content) => OllamaMessage {
            role: "user".to_string(),
            content: content.clone(),
            ..Default::default()
        },
        ChatMessage::Assistant { content, tool_calls } => OllamaMessage {
            role: "assistant".to_string(),
            content: content.clone(),
            tool_calls: tool_calls
                .iter()
                .map(|call| OllamaToolCall {
                    function: OllamaFunction {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                })
                .collect(),
            tool_name: None,
        },
        ChatMessage::Tool { name, content, .. } => OllamaMessage {
            role: "tool".to_string(),
            content: content.clone(),
            tool_calls: Vec::new(),
            tool_name: Some(name.clone()),
        },
    }
}

#[async_trait]
impl ChatBackend for OllamaChat {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, BackendError> {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));

        let body = OllamaRequest {
            model: &self.model,
            messages: request.messages.iter().map(to_wire).collect(),
            stream: false,
            tools: request
                .tools
                .iter()
                .map(|spec| OllamaTool {
                    kind: "function",
                    function: spec,
                })
                .collect(),
            options: OllamaOptions {
                temperature: request.temperature,
            },
        };

        let response = self.client.post(&url).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status { status, body });
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;

        let message = ollama_response.message;
        Ok(ChatResponse {
            content: message.content,
            tool_calls: message
                .tool_calls
                .into_iter()
                .map(|call| ToolCall {
                    id: None,
                    name: call.function.name,
                    arguments: call.function.arguments,
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
    use serde_json::json;

    #[test]
    fn tool_results_carry_the_tool_name() {
        let wire = to_wire(&ChatMessage::Tool {
            call_id: None,
            name: "search_knowledge_base".to_string(),
            content: "未找到相关案例。".to_string(),
        });
        let value = serde_json::to_value(&wire).unwrap();
        assert_eq!(value["role"], "tool");
        assert_eq!(value["tool_name"], "search_knowledge_base");
        assert!(value.get("tool_calls").is_none());
    }

    #[test]
    fn response_tool_calls_are_parsed() {
        let raw = json!({
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [{ "function": { "name": "search_knowledge_base", "arguments": { "query": "洗钱" } } }]
            }
        });
        let parsed: OllamaResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.message.tool_calls.len(), 1);
        assert_eq!(parsed.message.tool_calls[0].function.arguments["query"], "洗钱");
    }
}
