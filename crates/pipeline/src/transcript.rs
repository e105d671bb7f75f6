use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::TranscriptionError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// A transcribed call. `text` is the trimmed segment texts joined by spaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub duration: f64,
}

fn default_language() -> String {
    "zh".to_string()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl Transcript {
    pub fn from_segments(segments: Vec<Segment>, language: impl Into<String>, duration: f64) -> Self {
        let segments: Vec<Segment> = segments
            .into_iter()
            .map(|segment| Segment {
                start: round2(segment.start),
                end: round2(segment.end),
                text: segment.text.trim().to_string(),
            })
            .collect();
        let text = segments
            .iter()
            .map(|segment| segment.text.as_str())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        Self {
            text,
            segments,
            language: language.into(),
            duration,
        }
    }

    /// A transcript with no timing information, for text typed or pasted in.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into().trim().to_string(),
            segments: Vec::new(),
            language: default_language(),
            duration: 0.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Speech-to-text provider.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, path: &Path) -> Result<Transcript, TranscriptionError>;
}

/// Reads transcripts saved to disk: `.json` in the [`Transcript`] shape (or a
/// bare `{"segments": [...]}`), anything else as plain text.
#[derive(Debug, Clone, Default)]
pub struct TranscriptFileReader;

#[derive(Deserialize)]
struct SegmentsOnly {
    segments: Vec<Segment>,
    #[serde(default = "default_language")]
    language: String,
    #[serde(default)]
    duration: f64,
}

pub fn parse_json_transcript(raw: &str) -> Result<Transcript, TranscriptionError> {
    if let Ok(transcript) = serde_json::from_str::<Transcript>(raw) {
        return Ok(transcript);
    }
    let only: SegmentsOnly =
        serde_json::from_str(raw).map_err(|e| TranscriptionError::Decode(e.to_string()))?;
    Ok(Transcript::from_segments(only.segments, only.language, only.duration))
}

#[async_trait]
impl Transcriber for TranscriptFileReader {
    async fn transcribe(&self, path: &Path) -> Result<Transcript, TranscriptionError> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(TranscriptionError::NotFound(path.to_path_buf()));
        }
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| TranscriptionError::Unsupported {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let transcript = if is_json {
            parse_json_transcript(&raw)?
        } else {
            Transcript::from_text(raw)
        };

        if transcript.is_empty() {
            return Err(TranscriptionError::Empty);
        }
        tracing::info!(path = %path.display(), chars = transcript.text.chars().count(), "loaded transcript");
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(start: f64, end: f64, text: &str) -> Segment {
        Segment {
            start,
            end,
            text: text.to_string(),
        }
    }

    #[test]
    fn full_text_joins_trimmed_segments() {
        let transcript = Transcript::from_segments(
            vec![segment(0.0, 2.456, " 您好 "), segment(2.456, 5.0, "我是客服。")],
            "zh",
            5.0,
        );
        assert_eq!(transcript.text, "您好 我是客服。");
        assert_eq!(transcript.segments[0].end, 2.46);
        assert_eq!(transcript.segments[0].text, "您好");
    }

    #[tokio::test]
    async fn reads_plain_text_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let text_path = dir.path().join("call.txt");
        std::fs::write(&text_path, "  你的账户涉嫌洗钱\n").unwrap();
        let json_path = dir.path().join("call.json");
        std::fs::write(
            &json_path,
            r#"{"segments": [{"start": 0, "end": 1.5, "text": "你好"}, {"start": 1.5, "end": 3, "text": "ETC 认证过期"}], "duration": 3.0}"#,
        )
        .unwrap();

        let reader = TranscriptFileReader;
        assert_eq!(reader.transcribe(&text_path).await.unwrap().text, "你的账户涉嫌洗钱");

        let from_json = reader.transcribe(&json_path).await.unwrap();
        assert_eq!(from_json.text, "你好 ETC 认证过期");
        assert_eq!(from_json.language, "zh");
        assert_eq!(from_json.duration, 3.0);
    }

    #[tokio::test]
    async fn missing_and_empty_inputs_fail() {
        let dir = tempfile::tempdir().unwrap();
        let reader = TranscriptFileReader;

        let missing = reader.transcribe(&dir.path().join("nope.mp3")).await;
        assert!(matches!(missing, Err(TranscriptionError::NotFound(_))));

        let empty = dir.path().join("empty.txt");
        std::fs::write(&empty, "   ").unwrap();
        assert!(matches!(
            reader.transcribe(&empty).await,
            Err(TranscriptionError::Empty)
        ));
    }
}
