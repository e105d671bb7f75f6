//! Pulls the risk level and scam type out of stage free text.
//!
//! Matching is plain substring search in a fixed priority order, so "not
//! Critical" still reads as `Critical`. Misses yield `Unknown`, never an error.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

pub const UNKNOWN_SCAM_TYPE: &str = "Unknown";

/// Known case types, scanned in this order when no explicit label is present.
pub const KNOWN_SCAM_TYPES: [&str; 10] = [
    "AI换脸",
    "FaceTime诈骗",
    "百万保障",
    "公检法",
    "杀猪盘",
    "ETC",
    "退改签",
    "征信修复",
    "冒充领导",
    "虚假客服",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Critical,
    High,
    Medium,
    Safe,
    Unknown,
}

impl RiskLevel {
    /// Scan order. The first marker present wins, wherever it appears.
    pub const PRIORITY: [RiskLevel; 4] = [
        RiskLevel::Critical,
        RiskLevel::High,
        RiskLevel::Medium,
        RiskLevel::Safe,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Critical => "Critical",
            RiskLevel::High => "High",
            RiskLevel::Medium => "Medium",
            RiskLevel::Safe => "Safe",
            RiskLevel::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn extract_risk_level(monitor_output: &str) -> RiskLevel {
    RiskLevel::PRIORITY
        .into_iter()
        .find(|level| monitor_output.contains(level.as_str()))
        .unwrap_or(RiskLevel::Unknown)
}

fn scam_type_label() -> &'static Regex {
    static LABEL: OnceLock<Regex> = OnceLock::new();
    LABEL.get_or_init(|| Regex::new(r"诈骗类型:\s*([^\n\r]+)").expect("scam type pattern is valid"))
}

/// The `诈骗类型: <value>` label if present, else the first known case type
/// mentioned anywhere, else `Unknown`.
pub fn extract_scam_type(profile_output: &str) -> String {
    if let Some(label) = scam_type_label()
        .captures(profile_output)
        .and_then(|captures| captures.get(1))
    {
        return label.as_str().trim().to_string();
    }

    KNOWN_SCAM_TYPES
        .iter()
        .find(|case_type| profile_output.contains(*case_type))
        .map(|case_type| case_type.to_string())
        .unwrap_or_else(|| UNKNOWN_SCAM_TYPE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highest_priority_marker_wins() {
        assert_eq!(extract_risk_level("结论：Safe，但也有 Critical 迹象"), RiskLevel::Critical);
        assert_eq!(extract_risk_level("风险等级：High"), RiskLevel::High);
        assert_eq!(extract_risk_level("Medium or Safe"), RiskLevel::Medium);
        assert_eq!(extract_risk_level("Safe"), RiskLevel::Safe);
    }

    #[test]
    fn no_marker_is_unknown() {
        assert_eq!(extract_risk_level("无法判断"), RiskLevel::Unknown);
        assert_eq!(extract_risk_level(""), RiskLevel::Unknown);
    }

    #[test]
    fn markers_are_case_sensitive_substrings() {
        assert_eq!(extract_risk_level("critical"), RiskLevel::Unknown);
        assert_eq!(extract_risk_level("Highly suspicious"), RiskLevel::High);
    }

    #[test]
    fn explicit_label_is_taken_verbatim() {
        assert_eq!(extract_scam_type("诈骗类型: 杀猪盘\n置信度：高"), "杀猪盘");
        assert_eq!(extract_scam_type("诈骗类型:   新型刷单  \r\n"), "新型刷单");
    }

    #[test]
    fn label_beats_keyword_scan() {
        assert_eq!(extract_scam_type("提到了 ETC\n诈骗类型: 公检法"), "公检法");
    }

    #[test]
    fn full_width_colon_is_not_a_label() {
        assert_eq!(extract_scam_type("诈骗类型：ETC"), "ETC");
    }

    #[test]
    fn keyword_scan_follows_list_order() {
        assert_eq!(extract_scam_type("疑似 ETC 认证诈骗"), "ETC");
        assert_eq!(extract_scam_type("冒充领导，也像公检法"), "公检法");
        assert_eq!(extract_scam_type("普通来电"), UNKNOWN_SCAM_TYPE);
    }

    #[test]
    fn risk_level_serializes_as_name() {
        assert_eq!(serde_json::to_value(RiskLevel::High).unwrap(), "High");
    }
}
