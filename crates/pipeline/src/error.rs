use std::path::PathBuf;
use thiserror::Error;

use agent::AgentError;

use crate::stage::StageId;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Transcription(#[from] TranscriptionError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("stage {stage} failed: {source}")]
    Stage {
        stage: StageId,
        #[source]
        source: AgentError,
    },
}

#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("audio file not found: {0}")]
    NotFound(PathBuf),

    #[error("unsupported input {path}: {reason}")]
    Unsupported { path: PathBuf, reason: String },

    #[error("transcript is empty")]
    Empty,

    #[error("speech-to-text provider failed: {0}")]
    Provider(String),

    #[error("failed to decode transcript: {0}")]
    Decode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for TranscriptionError {
    fn from(err: reqwest::Error) -> Self {
        TranscriptionError::Provider(err.to_string())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template {template} references undeclared field {{{field}}}")]
    UndeclaredField { template: String, field: String },

    #[error("template {template} has a malformed placeholder at byte {offset}")]
    Malformed { template: String, offset: usize },

    #[error("template {template} is missing a value for {{{field}}}")]
    MissingField { template: String, field: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("stage {stage} depends on unknown stage {dependency}")]
    UnknownDependency { stage: StageId, dependency: StageId },

    #[error("stage {0} is declared more than once")]
    DuplicateStage(StageId),

    #[error("stage graph has a cycle through {0}")]
    Cycle(StageId),
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("failed to read roles table {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}
