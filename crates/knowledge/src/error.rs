use thiserror::Error;

pub type KnowledgeResult<T> = Result<T, KnowledgeError>;

#[derive(Debug, Error)]
pub enum KnowledgeError {
    /// Corpus is empty or a record lacks a required field. The existing
    /// collection is left untouched.
    #[error("corpus ingestion failed: {0}")]
    Ingestion(String),

    #[error("embedding request failed: {0}")]
    Embedding(String),

    #[error("vector store error: {0}")]
    Storage(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl KnowledgeError {
    pub fn ingestion(msg: impl Into<String>) -> Self {
        Self::Ingestion(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}

impl From<reqwest::Error> for KnowledgeError {
    fn from(err: reqwest::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
