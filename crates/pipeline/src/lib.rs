pub mod error;
pub mod extractor;
pub mod graph;
pub mod orchestrator;
pub mod prompts;
pub mod result;
pub mod search_tool;
pub mod stage;
pub mod template;
pub mod transcriber;
pub mod transcript;
pub mod victim;

pub use error::{
    GraphError, PipelineError, PipelineResult, ProfileError, TemplateError, TranscriptionError,
};
pub use extractor::{RiskLevel, extract_risk_level, extract_scam_type};
pub use graph::StageGraph;
pub use orchestrator::Pipeline;
pub use result::AnalysisResult;
pub use search_tool::{KnowledgeSearchTool, DEFAULT_TOP_K};
pub use stage::{StageDefinition, StageId, StageOutput};
pub use template::{Template, TemplateContext};
pub use transcriber::WhisperApiTranscriber;
pub use transcript::{Segment, Transcriber, Transcript, TranscriptFileReader};
pub use victim::{CsvProfileStore, ProfileStore, Role, VictimProfile};
