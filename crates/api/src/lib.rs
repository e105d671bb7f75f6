pub mod config;
pub mod metrics;
pub mod services;
pub mod telemetry;

use axum::{
    Form, Json, Router,
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use knowledge::{CacheStats, RebuildStats, RetrievalResult};
use pipeline::{
    AnalysisResult, PipelineError, PipelineResult, Role, Segment, Transcript, TranscriptionError,
};

use crate::metrics::{Metrics, MetricsSnapshot, TimedOperation};
use crate::services::Services;

pub const DEFAULT_ROLE_ID: &str = "R01";
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

pub struct AppState {
    pub services: Services,
    pub metrics: Arc<Metrics>,
    permits: Semaphore,
}

impl AppState {
    pub fn new(services: Services) -> Arc<Self> {
        let permits = Semaphore::new(services.config.concurrency.max_concurrent_analyses.max(1));
        Arc::new(Self {
            services,
            metrics: Metrics::new(),
            permits,
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/analyze", post(analyze_upload))
        .route("/analyze-local", post(analyze_local))
        .route("/analyze-transcript", post(analyze_transcript))
        .route("/roles", get(list_roles))
        .route("/knowledge/rebuild", post(rebuild_knowledge))
        .route("/knowledge/search", get(search_knowledge))
        .route("/metrics", get(get_metrics))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct Success<T> {
    success: bool,
    data: T,
}

fn ok<T: Serialize>(data: T) -> Json<Success<T>> {
    Json(Success {
        success: true,
        data,
    })
}

#[derive(Serialize)]
struct Failure {
    success: bool,
    error: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let status = match &err {
            PipelineError::Transcription(TranscriptionError::NotFound(_)) => StatusCode::NOT_FOUND,
            PipelineError::Transcription(
                TranscriptionError::Unsupported { .. }
                | TranscriptionError::Empty
                | TranscriptionError::Decode(_),
            ) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(format!("{err:#}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Failure {
            success: false,
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<Success<T>>, ApiError>;

#[derive(Serialize)]
struct Health {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "running",
        service: "Anti-Fraud Detection API",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Run one analysis under the concurrency limit and record its outcome.
async fn run_analysis<F>(state: &AppState, analysis: F) -> ApiResult<AnalysisResult>
where
    F: Future<Output = PipelineResult<AnalysisResult>>,
{
    let _permit = state
        .permits
        .acquire()
        .await
        .map_err(|_| ApiError::internal("analysis queue is closed"))?;
    let timer = TimedOperation::start();

    match analysis.await {
        Ok(result) => {
            state.metrics.record_request(true);
            state.metrics.record_analysis(&result, timer.elapsed());
            info!(
                risk_level = %result.risk_level,
                scam_type = %result.scam_type,
                partial = result.is_partial(),
                elapsed_ms = timer.elapsed().as_millis() as u64,
                "analysis complete"
            );
            Ok(ok(result))
        }
        Err(e) => {
            state.metrics.record_request(false);
            error!(error = %e, "analysis failed");
            Err(e.into())
        }
    }
}

fn role_or_default(role_id: Option<String>) -> String {
    role_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| DEFAULT_ROLE_ID.to_string())
}

fn upload_suffix(file_name: Option<&str>) -> String {
    file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_else(|| ".wav".to_string())
}

async fn analyze_upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ApiResult<AnalysisResult> {
    let mut audio: Option<(String, Vec<u8>)> = None;
    let mut role_id = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("无效的上传: {e}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("audio") => {
                let suffix = upload_suffix(field.file_name());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("无效的上传: {e}")))?;
                audio = Some((suffix, bytes.to_vec()));
            }
            Some("role_id") => {
                role_id = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::bad_request(format!("无效的上传: {e}")))?,
                );
            }
            _ => {}
        }
    }

    let (suffix, bytes) = audio.ok_or_else(|| ApiError::bad_request("缺少音频文件 audio"))?;
    if bytes.is_empty() {
        return Err(ApiError::bad_request("音频文件为空"));
    }
    let role_id = role_or_default(role_id);

    // Removed when `upload` drops at the end of the request.
    let upload = tempfile::Builder::new()
        .prefix("upload_")
        .suffix(&suffix)
        .tempfile()
        .map_err(|e| ApiError::internal(format!("failed to stage upload: {e}")))?;
    tokio::fs::write(upload.path(), &bytes)
        .await
        .map_err(|e| ApiError::internal(format!("failed to stage upload: {e}")))?;
    info!(bytes = bytes.len(), suffix = %suffix, role_id = %role_id, "received upload");

    let services = &state.services;
    run_analysis(
        &state,
        services
            .pipeline
            .analyze_audio(services.transcriber.as_ref(), upload.path(), &role_id),
    )
    .await
}

#[derive(Deserialize)]
struct LocalRequest {
    audio_path: String,
    role_id: Option<String>,
}

async fn analyze_local(
    State(state): State<Arc<AppState>>,
    Form(request): Form<LocalRequest>,
) -> ApiResult<AnalysisResult> {
    let path = PathBuf::from(&request.audio_path);
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("文件不存在: {}", request.audio_path),
        ));
    }
    let role_id = role_or_default(request.role_id);

    let services = &state.services;
    run_analysis(
        &state,
        services
            .pipeline
            .analyze_audio(services.transcriber.as_ref(), &path, &role_id),
    )
    .await
}

#[derive(Deserialize)]
struct TranscriptRequest {
    #[serde(default)]
    text: String,
    #[serde(default)]
    segments: Vec<Segment>,
    role_id: Option<String>,
}

async fn analyze_transcript(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TranscriptRequest>,
) -> ApiResult<AnalysisResult> {
    let transcript = if request.segments.is_empty() {
        Transcript::from_text(request.text)
    } else {
        let duration = request.segments.last().map(|s| s.end).unwrap_or_default();
        Transcript::from_segments(request.segments, "zh", duration)
    };
    let role_id = role_or_default(request.role_id);

    run_analysis(&state, state.services.pipeline.analyze(transcript, &role_id)).await
}

async fn list_roles(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Role>> {
    Ok(ok(state.services.pipeline.profiles().roles()))
}

async fn rebuild_knowledge(State(state): State<Arc<AppState>>) -> ApiResult<RebuildStats> {
    let timer = TimedOperation::start();
    let stats = state.services.rebuild_knowledge().await.map_err(|e| {
        error!(error = %format!("{e:#}"), "knowledge rebuild failed");
        ApiError::from(e)
    })?;
    state.metrics.record_rebuild();
    info!(
        total = stats.total,
        elapsed_ms = timer.elapsed().as_millis() as u64,
        "knowledge rebuild requested"
    );
    Ok(ok(stats))
}

#[derive(Deserialize)]
struct SearchParams {
    q: String,
    k: Option<usize>,
}

async fn search_knowledge(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Vec<RetrievalResult>> {
    let query = params.q.trim();
    if query.is_empty() {
        return Err(ApiError::bad_request("查询不能为空"));
    }
    let k = params.k.unwrap_or(state.services.config.knowledge.top_k);

    let timer = TimedOperation::start();
    let results = state
        .services
        .index
        .query(query, k)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    state.metrics.record_search(timer.elapsed());
    Ok(ok(results))
}

#[derive(Serialize)]
struct MetricsReport {
    #[serde(flatten)]
    metrics: MetricsSnapshot,
    embedding_cache: Option<CacheStats>,
}

async fn get_metrics(State(state): State<Arc<AppState>>) -> ApiResult<MetricsReport> {
    Ok(ok(MetricsReport {
        metrics: state.metrics.snapshot(),
        embedding_cache: state.services.embedding_cache_stats(),
    }))
}
