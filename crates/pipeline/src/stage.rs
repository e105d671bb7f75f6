use serde::{Deserialize, Serialize};
use std::fmt;

use agent::{AgentProfile, Completion};

use crate::extractor::RiskLevel;
use crate::template::{Template, fields};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageId {
    Monitor,
    Profile,
    Defend,
}

impl StageId {
    pub const ALL: [StageId; 3] = [StageId::Monitor, StageId::Profile, StageId::Defend];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Monitor => "monitor",
            StageId::Profile => "profile",
            StageId::Defend => "defend",
        }
    }

    /// Fields a stage's template is allowed to reference.
    pub fn declared_fields(&self) -> &'static [&'static str] {
        match self {
            StageId::Monitor => &[fields::TRANSCRIPT_TEXT],
            StageId::Profile => &[fields::TRANSCRIPT_TEXT, fields::MONITOR_RESULT],
            StageId::Defend => &[
                fields::VICTIM_NAME,
                fields::VICTIM_AGE,
                fields::VICTIM_TAG,
                fields::VICTIM_WEAKNESS,
                fields::MONITOR_RESULT,
                fields::PROFILE_RESULT,
            ],
        }
    }

    /// Context field under which this stage's raw output is handed downstream.
    pub fn output_field(&self) -> Option<&'static str> {
        match self {
            StageId::Monitor => Some(fields::MONITOR_RESULT),
            StageId::Profile => Some(fields::PROFILE_RESULT),
            StageId::Defend => None,
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One analysis stage: who runs it, what it is asked, and what it waits on.
#[derive(Debug, Clone)]
pub struct StageDefinition {
    pub id: StageId,
    pub agent: AgentProfile,
    pub template: Template,
    pub expected_output: String,
    pub depends_on: Vec<StageId>,
    /// Whether the knowledge search tool is exposed to this stage.
    pub uses_knowledge: bool,
}

impl StageDefinition {
    pub fn instruction(&self, rendered: &str) -> String {
        format!("{rendered}\n\n期望输出：\n{}", self.expected_output)
    }
}

/// Structured fields pulled out of a stage's free text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scam_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageOutput {
    pub stage: StageId,
    pub raw: String,
    pub completion: Completion,
    pub elapsed_ms: u64,
    /// Knowledge-base searches the agent ran during this stage.
    pub tool_calls: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<ExtractedFields>,
}
