pub mod error;
pub mod llm;
pub mod ollama;
pub mod openai;
pub mod profile;
pub mod retry;
pub mod runtime;
pub mod testing;
pub mod tool;

pub use error::{AgentError, BackendError, ToolError};
pub use llm::{ChatBackend, ChatMessage, ChatRequest, ChatResponse, ToolCall, ToolSpec};
pub use ollama::OllamaChat;
pub use openai::OpenAiChat;
pub use profile::{AgentProfile, DEFAULT_TEMPERATURE};
pub use retry::RetryPolicy;
pub use runtime::{AgentOutput, AgentRuntime, Completion, PartialReason};
pub use tool::{QueryInput, Tool, ToolSet};
