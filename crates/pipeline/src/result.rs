use serde::Serialize;

use crate::extractor::RiskLevel;
use crate::stage::{StageId, StageOutput};
use crate::transcript::Segment;
use crate::victim::VictimProfile;

/// Outcome of one analysis. Built once, never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub transcript: String,
    #[serde(rename = "transcript_segments")]
    pub segments: Vec<Segment>,
    #[serde(rename = "audio_duration")]
    pub duration: f64,
    pub risk_level: RiskLevel,
    pub scam_type: String,
    pub defense_advice: String,
    #[serde(rename = "victim_info")]
    pub victim_profile: VictimProfile,
    /// Per-stage outputs, kept for logging and debugging but never sent out.
    #[serde(skip)]
    pub raw_outputs: Vec<StageOutput>,
}

impl AnalysisResult {
    pub fn stage(&self, id: StageId) -> Option<&StageOutput> {
        self.raw_outputs.iter().find(|output| output.stage == id)
    }

    /// Whether any stage answered with partial text.
    pub fn is_partial(&self) -> bool {
        self.raw_outputs.iter().any(|output| !matches!(output.completion, agent::Completion::Complete))
    }

    pub fn stage_timings(&self) -> Vec<(StageId, u64)> {
        self.raw_outputs
            .iter()
            .map(|output| (output.stage, output.elapsed_ms))
            .collect()
    }

    /// Plain-text report for terminals.
    pub fn report(&self) -> String {
        let rule = "=".repeat(60);
        format!(
            "{rule}\n反诈骗分析报告\n{rule}\n\n转录文本:\n{}\n\n风险等级: {}\n诈骗类型: {}\n\n防御建议:\n{}\n\n{rule}\n",
            self.transcript, self.risk_level, self.scam_type, self.defense_advice
        )
    }
}
