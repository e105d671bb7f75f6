use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;

use crate::error::TranscriptionError;
use crate::transcript::{Segment, Transcriber, Transcript};

/// Client for an OpenAI-compatible `/audio/transcriptions` endpoint
/// (hosted Whisper, faster-whisper-server, LocalAI, ...).
#[derive(Clone)]
pub struct WhisperApiTranscriber {
    base_url: String,
    api_key: String,
    model: String,
    language: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    #[serde(default)]
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    segments: Vec<Segment>,
}

impl WhisperApiTranscriber {
    pub fn new(base_url: String, api_key: String, model: String, language: String) -> Self {
        Self {
            base_url,
            api_key,
            model,
            language,
            client: reqwest::Client::new(),
        }
    }

    pub fn default() -> Self {
        Self::new(
            "http://localhost:8000/v1".to_string(),
            String::new(),
            "whisper-1".to_string(),
            "zh".to_string(),
        )
    }
}

fn to_transcript(response: VerboseTranscription, fallback_language: &str) -> Transcript {
    let language = response
        .language
        .unwrap_or_else(|| fallback_language.to_string());

    if response.segments.is_empty() {
        let mut transcript = Transcript::from_text(response.text);
        transcript.language = language;
        transcript.duration = response.duration.unwrap_or_default();
        return transcript;
    }

    let duration = response
        .duration
        .or_else(|| response.segments.last().map(|s| s.end))
        .unwrap_or_default();
    Transcript::from_segments(response.segments, language, duration)
}

#[async_trait]
impl Transcriber for WhisperApiTranscriber {
    async fn transcribe(&self, path: &Path) -> Result<Transcript, TranscriptionError> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(TranscriptionError::NotFound(path.to_path_buf()));
        }
        let audio = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("audio.mp3")
            .to_string();

        tracing::info!(path = %path.display(), bytes = audio.len(), model = %self.model, "transcribing audio");

        let form = Form::new()
            .part("file", Part::bytes(audio).file_name(file_name))
            .text("model", self.model.clone())
            .text("language", self.language.clone())
            .text("response_format", "verbose_json");

        let url = format!("{}/audio/transcriptions", self.base_url.trim_end_matches('/'));
        let mut request = self.client.post(&url).multipart(form);
        if !self.api_key.trim().is_empty() {
            request = request.bearer_auth(self.api_key.trim());
        }
        let response = request.send().await?;

        let status = response.status();
        if status.is_client_error() && status != reqwest::StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(TranscriptionError::Unsupported {
                path: path.to_path_buf(),
                reason: format!("{status}: {body}"),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranscriptionError::Provider(format!("{status}: {body}")));
        }

        let parsed: VerboseTranscription = response
            .json()
            .await
            .map_err(|e| TranscriptionError::Decode(e.to_string()))?;
        let transcript = to_transcript(parsed, &self.language);

        tracing::info!(
            segments = transcript.segments.len(),
            duration = transcript.duration,
            "transcription finished"
        );
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn verbose_json_segments_build_the_full_text() {
        let raw = json!({
            "text": "ignored when segments exist",
            "language": "chinese",
            "duration": 4.2,
            "segments": [
                { "id": 0, "start": 0.0, "end": 1.234, "text": " 喂，你好 ", "tokens": [1, 2] },
                { "id": 1, "start": 1.234, "end": 4.2, "text": "你的快递丢了" }
            ]
        });
        let parsed: VerboseTranscription = serde_json::from_value(raw).unwrap();
        let transcript = to_transcript(parsed, "zh");

        assert_eq!(transcript.text, "喂，你好 你的快递丢了");
        assert_eq!(transcript.language, "chinese");
        assert_eq!(transcript.segments[0].end, 1.23);
        assert_eq!(transcript.duration, 4.2);
    }

    #[test]
    fn plain_text_responses_are_accepted() {
        let parsed: VerboseTranscription = serde_json::from_value(json!({ "text": " 你好 " })).unwrap();
        let transcript = to_transcript(parsed, "zh");
        assert_eq!(transcript.text, "你好");
        assert_eq!(transcript.language, "zh");
        assert!(transcript.segments.is_empty());
    }

    #[tokio::test]
    async fn missing_audio_is_reported_before_any_request() {
        let transcriber = WhisperApiTranscriber::new(
            "http://127.0.0.1:9".to_string(),
            String::new(),
            "whisper-1".to_string(),
            "zh".to_string(),
        );
        let err = transcriber.transcribe(Path::new("/definitely/not/here.mp3")).await.unwrap_err();
        assert!(matches!(err, TranscriptionError::NotFound(_)));
    }
}
