//! In-process chat backends for tests and offline runs.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::BackendError;
use crate::llm::{ChatBackend, ChatRequest, ChatResponse};

/// Replays a fixed script of responses and records every request it receives.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<ChatResponse, BackendError>>>,
    requests: Mutex<Vec<ChatRequest>>,
    fallback: Option<String>,
    delay: Option<(usize, Duration)>,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Result<ChatResponse, BackendError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            fallback: None,
            delay: None,
        }
    }

    /// Every request is answered with the same text.
    pub fn always(text: impl Into<String>) -> Self {
        Self::new(Vec::new()).with_fallback(text)
    }

    /// Text returned once the script is used up. Without one an exhausted
    /// script answers with a decode error.
    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = Some(text.into());
        self
    }

    /// Sleep before answering each request.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.with_delay_after(0, delay)
    }

    /// Answer the first `answered` requests at once, then sleep before each later one.
    pub fn with_delay_after(mut self, answered: usize, delay: Duration) -> Self {
        self.delay = Some((answered, delay));
        self
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, BackendError> {
        let seen = match self.requests.lock() {
            Ok(mut requests) => {
                requests.push(request.clone());
                requests.len() - 1
            }
            Err(_) => 0,
        };
        if let Some((answered, delay)) = self.delay {
            if seen >= answered {
                tokio::time::sleep(delay).await;
            }
        }

        let next = self.script.lock().ok().and_then(|mut script| script.pop_front());
        match (next, &self.fallback) {
            (Some(response), _) => response,
            (None, Some(text)) => Ok(ChatResponse::text(text.clone())),
            (None, None) => Err(BackendError::Decode("script exhausted".to_string())),
        }
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

/// Answers each request through a closure, for fakes that branch on the prompt.
pub struct FnBackend<F> {
    respond: F,
}

impl<F> FnBackend<F>
where
    F: Fn(&ChatRequest) -> Result<ChatResponse, BackendError> + Send + Sync,
{
    pub fn new(respond: F) -> Self {
        Self { respond }
    }
}

#[async_trait]
impl<F> ChatBackend for FnBackend<F>
where
    F: Fn(&ChatRequest) -> Result<ChatResponse, BackendError> + Send + Sync,
{
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, BackendError> {
        (self.respond)(request)
    }

    fn model(&self) -> &str {
        "fn"
    }
}
