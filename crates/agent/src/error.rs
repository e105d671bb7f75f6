use thiserror::Error;

/// Failure talking to a chat backend.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("failed to reach LLM backend: {0}")]
    Transport(String),

    #[error("LLM backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode LLM response: {0}")]
    Decode(String),
}

impl BackendError {
    /// Connection problems, rate limiting and server errors are worth a retry.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Transport(_) => true,
            BackendError::Status { status, .. } => *status == 429 || *status >= 500,
            BackendError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    /// The remote call did not complete in time and no partial text exists.
    #[error("agent {agent} timed out after {timeout_secs}s")]
    Timeout { agent: String, timeout_secs: u64 },

    /// The iteration budget ran out before the agent produced any text.
    #[error("agent {agent} exhausted its budget of {budget} iterations without an answer")]
    BudgetExceeded { agent: String, budget: usize },

    #[error("agent {agent}: {source}")]
    Backend {
        agent: String,
        #[source]
        source: BackendError,
    },
}

/// Failure of a single tool invocation. Reported back to the reasoner as text.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ToolError {
    #[error("invalid arguments for tool {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("tool {tool} failed: {reason}")]
    Failed { tool: String, reason: String },
}
