use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{AgentError, BackendError};
use crate::llm::{ChatBackend, ChatMessage, ChatRequest, ChatResponse};
use crate::profile::AgentProfile;
use crate::retry::RetryPolicy;
use crate::tool::ToolSet;

const FINAL_ANSWER_PROMPT: &str =
    "已达到推理轮次上限。请不要再调用任何工具，立即根据已有信息给出最终答案。";

const EMPTY_ANSWER_PROMPT: &str = "请直接给出最终答案。";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialReason {
    BudgetExhausted,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum Completion {
    Complete,
    Partial(PartialReason),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentOutput {
    pub text: String,
    pub completion: Completion,
    /// Backend rounds used, the final no-tools round included.
    pub iterations: usize,
    pub tool_calls: usize,
}

impl AgentOutput {
    pub fn is_complete(&self) -> bool {
        self.completion == Completion::Complete
    }
}

enum CallError {
    Timeout,
    Backend(BackendError),
}

impl CallError {
    fn is_transient(&self) -> bool {
        match self {
            CallError::Timeout => false,
            CallError::Backend(e) => e.is_transient(),
        }
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Timeout => write!(f, "call timed out"),
            CallError::Backend(e) => write!(f, "{e}"),
        }
    }
}

/// Runs an agent's reasoning loop against a chat backend.
///
/// Each round sends the whole conversation. Tool calls are executed in order
/// and their results appended; a response without tool calls ends the loop.
#[derive(Clone)]
pub struct AgentRuntime {
    backend: Arc<dyn ChatBackend>,
    retry: RetryPolicy,
    call_timeout: Duration,
    temperature: Option<f32>,
}

impl AgentRuntime {
    pub fn new(backend: Arc<dyn ChatBackend>, retry: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            backend,
            retry,
            call_timeout,
            temperature: None,
        }
    }

    /// Sample every agent at `temperature` instead of its profile's own.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn model(&self) -> &str {
        self.backend.model()
    }

    pub async fn invoke(
        &self,
        profile: &AgentProfile,
        instruction: &str,
        tools: &ToolSet,
    ) -> Result<AgentOutput, AgentError> {
        let started = Instant::now();
        let budget = profile.max_iterations.max(1);
        let temperature = self.temperature.unwrap_or(profile.temperature);
        let specs = tools.specs();

        let mut messages = vec![
            ChatMessage::System(profile.system_prompt()),
            ChatMessage::User(instruction.to_string()),
        ];
        let mut best_text: Option<String> = None;
        let mut tool_calls = 0;

        for iteration in 1..=budget {
            let request = ChatRequest {
                messages: messages.clone(),
                tools: specs.clone(),
                temperature,
            };

            let response = match self.call(profile, &request).await {
                Ok(response) => response,
                Err(CallError::Timeout) => {
                    return self.timed_out(profile, best_text, iteration, tool_calls);
                }
                Err(CallError::Backend(source)) => {
                    return Err(AgentError::Backend {
                        agent: profile.name.clone(),
                        source,
                    });
                }
            };

            let content = response.content.trim().to_string();
            if !content.is_empty() {
                best_text = Some(content.clone());
            }

            if response.tool_calls.is_empty() {
                if !content.is_empty() {
                    info!(
                        agent = %profile.name,
                        iterations = iteration,
                        tool_calls,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Agent finished"
                    );
                    return Ok(AgentOutput {
                        text: content,
                        completion: Completion::Complete,
                        iterations: iteration,
                        tool_calls,
                    });
                }
                debug!(agent = %profile.name, iteration, "Empty answer, asking again");
                messages.push(ChatMessage::Assistant {
                    content: String::new(),
                    tool_calls: Vec::new(),
                });
                messages.push(ChatMessage::User(EMPTY_ANSWER_PROMPT.to_string()));
                continue;
            }

            tool_calls += response.tool_calls.len();
            self.run_tools(profile, response, tools, &mut messages).await;
        }

        // Budget spent without a terminal answer: one last round, no tools.
        warn!(agent = %profile.name, budget, "Iteration budget exhausted, forcing final answer");
        messages.push(ChatMessage::User(FINAL_ANSWER_PROMPT.to_string()));
        let request = ChatRequest {
            messages,
            tools: Vec::new(),
            temperature,
        };
        let iterations = budget + 1;

        match self.call(profile, &request).await {
            Ok(response) => {
                let content = response.content.trim().to_string();
                let text = if content.is_empty() { best_text } else { Some(content) };
                text.map(|text| AgentOutput {
                    text,
                    completion: Completion::Partial(PartialReason::BudgetExhausted),
                    iterations,
                    tool_calls,
                })
                .ok_or_else(|| AgentError::BudgetExceeded {
                    agent: profile.name.clone(),
                    budget,
                })
            }
            Err(CallError::Timeout) => self.timed_out(profile, best_text, iterations, tool_calls),
            Err(CallError::Backend(source)) => match best_text {
                Some(text) => {
                    warn!(agent = %profile.name, error = %source, "Final round failed, keeping earlier text");
                    Ok(AgentOutput {
                        text,
                        completion: Completion::Partial(PartialReason::BudgetExhausted),
                        iterations,
                        tool_calls,
                    })
                }
                None => Err(AgentError::Backend {
                    agent: profile.name.clone(),
                    source,
                }),
            },
        }
    }

    async fn call(
        &self,
        profile: &AgentProfile,
        request: &ChatRequest,
    ) -> Result<ChatResponse, CallError> {
        let operation = format!("chat:{}", profile.name);
        self.retry
            .retry_if(&operation, CallError::is_transient, || {
                let backend = self.backend.clone();
                let timeout = self.call_timeout;
                async move {
                    match tokio::time::timeout(timeout, backend.chat(request)).await {
                        Ok(result) => result.map_err(CallError::Backend),
                        Err(_) => Err(CallError::Timeout),
                    }
                }
            })
            .await
    }

    async fn run_tools(
        &self,
        profile: &AgentProfile,
        response: ChatResponse,
        tools: &ToolSet,
        messages: &mut Vec<ChatMessage>,
    ) {
        // Ids must match between the assistant turn and the tool results.
        let calls: Vec<_> = response
            .tool_calls
            .into_iter()
            .enumerate()
            .map(|(i, mut call)| {
                if call.id.is_none() {
                    call.id = Some(format!("call_{i}"));
                }
                call
            })
            .collect();

        messages.push(ChatMessage::Assistant {
            content: response.content,
            tool_calls: calls.clone(),
        });

        for call in calls {
            let content = match tools.dispatch(&call).await {
                Ok(output) => {
                    debug!(agent = %profile.name, tool = %call.name, "Tool call succeeded");
                    output
                }
                Err(e) => {
                    warn!(agent = %profile.name, tool = %call.name, error = %e, "Tool call rejected");
                    format!("工具调用失败：{e}")
                }
            };
            messages.push(ChatMessage::Tool {
                call_id: call.id,
                name: call.name,
                content,
            });
        }
    }

    fn timed_out(
        &self,
        profile: &AgentProfile,
        best_text: Option<String>,
        iterations: usize,
        tool_calls: usize,
    ) -> Result<AgentOutput, AgentError> {
        warn!(
            agent = %profile.name,
            timeout_secs = self.call_timeout.as_secs(),
            has_partial = best_text.is_some(),
            "Agent call timed out"
        );
        match best_text {
            Some(text) => Ok(AgentOutput {
                text,
                completion: Completion::Partial(PartialReason::Timeout),
                iterations,
                tool_calls,
            }),
            None => Err(AgentError::Timeout {
                agent: profile.name.clone(),
                timeout_secs: self.call_timeout.as_secs(),
            }),
        }
    }
}
