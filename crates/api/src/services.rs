use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use agent::{AgentRuntime, ChatBackend, OllamaChat, OpenAiChat};
use knowledge::{
    CacheStats, CachedEmbedder, CorpusReader, Embedder, EmbeddingClient, FileStore,
    KnowledgeIndex, QdrantStore, RebuildStats, VectorStore,
};
use pipeline::{
    CsvProfileStore, Pipeline, ProfileStore, Transcriber, Transcript, TranscriptFileReader,
    TranscriptionError, WhisperApiTranscriber,
};

use crate::config::{AppConfig, KnowledgeBackend, LlmProvider};

pub const ROLES_FILE: &str = "roles.csv";

/// The external collaborators a deployment plugs in.
pub struct Backends {
    pub chat: Arc<dyn ChatBackend>,
    pub embedder: Arc<dyn Embedder>,
    pub store: Arc<dyn VectorStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub transcriber: Arc<dyn Transcriber>,
}

impl Backends {
    pub fn from_config(config: &AppConfig) -> Self {
        let chat: Arc<dyn ChatBackend> = match config.llm.provider {
            LlmProvider::Ollama => Arc::new(OllamaChat::new(
                config.llm.base_url.clone(),
                config.llm.model.clone(),
            )),
            LlmProvider::OpenAi => Arc::new(OpenAiChat::new(
                config.llm.base_url.clone(),
                config.llm.api_key.clone(),
                config.llm.model.clone(),
            )),
        };

        let store: Arc<dyn VectorStore> = match config.knowledge.backend {
            KnowledgeBackend::File => Arc::new(FileStore::new(config.knowledge.persist_dir.clone())),
            KnowledgeBackend::Qdrant => Arc::new(QdrantStore::new(config.knowledge.qdrant_url.clone())),
        };

        let speech = WhisperApiTranscriber::new(
            config.asr.base_url.clone(),
            config.asr.api_key.clone(),
            config.asr.model.clone(),
            config.asr.language.clone(),
        );

        Self {
            chat,
            embedder: Arc::new(EmbeddingClient::new(
                config.embedding.base_url.clone(),
                config.embedding.model.clone(),
            )),
            store,
            profiles: load_profiles(&config.knowledge.data_dir),
            transcriber: Arc::new(CallTranscriber::new(speech)),
        }
    }
}

fn load_profiles(data_dir: &Path) -> Arc<dyn ProfileStore> {
    match CsvProfileStore::from_path(&data_dir.join(ROLES_FILE)) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(error = %e, "victim roles unavailable, every role resolves to the default profile");
            Arc::new(CsvProfileStore::default())
        }
    }
}

/// Everything a request handler or CLI command needs, wired once at startup.
pub struct Services {
    pub config: AppConfig,
    pub index: Arc<KnowledgeIndex>,
    pub pipeline: Arc<Pipeline>,
    pub transcriber: Arc<dyn Transcriber>,
    embedding_cache: Option<Arc<CachedEmbedder>>,
}

impl Services {
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let backends = Backends::from_config(&config);
        Self::assemble(config, backends)
    }

    pub fn assemble(config: AppConfig, backends: Backends) -> Result<Self> {
        let (embedder, embedding_cache): (Arc<dyn Embedder>, _) =
            if config.cache.enabled && config.cache.max_entries > 0 {
                let cache = Arc::new(CachedEmbedder::new(backends.embedder, config.cache.max_entries));
                (cache.clone() as Arc<dyn Embedder>, Some(cache))
            } else {
                (backends.embedder, None)
            };

        let index = Arc::new(KnowledgeIndex::new(
            backends.store,
            embedder,
            config.knowledge.collection.clone(),
        ));

        let runtime = AgentRuntime::new(
            backends.chat,
            config.retry_policy(),
            Duration::from_secs(config.concurrency.request_timeout_secs),
        )
        .with_temperature(config.llm.temperature);
        let pipeline = Pipeline::with_top_k(
            runtime,
            index.clone(),
            backends.profiles,
            config.knowledge.top_k,
        )
        .context("failed to assemble the analysis pipeline")?;

        info!(
            model = %config.llm.model,
            collection = %config.knowledge.collection,
            mode = ?config.mode,
            "services ready"
        );

        Ok(Self {
            config,
            index,
            pipeline: Arc::new(pipeline),
            transcriber: backends.transcriber,
            embedding_cache,
        })
    }

    /// Re-ingest the corpus from the data directory.
    pub async fn rebuild_knowledge(&self) -> Result<RebuildStats> {
        let data_dir = &self.config.knowledge.data_dir;
        let corpus = CorpusReader::read_dir(data_dir)
            .await
            .with_context(|| format!("failed to read the case corpus from {}", data_dir.display()))?;
        self.index
            .rebuild(&corpus)
            .await
            .context("knowledge rebuild failed")
    }

    /// Build the knowledge collection unless a persisted one already exists.
    pub async fn ensure_knowledge(&self) -> Result<Option<RebuildStats>> {
        let documents = self
            .index
            .count()
            .await
            .context("failed to inspect the knowledge collection")?;
        if documents > 0 {
            info!(documents, "knowledge collection already built");
            return Ok(None);
        }
        info!("knowledge collection missing, building it now");
        self.rebuild_knowledge().await.map(Some)
    }

    pub fn embedding_cache_stats(&self) -> Option<CacheStats> {
        self.embedding_cache.as_ref().map(|cache| cache.stats())
    }
}

/// Sends saved transcripts (`.txt`, `.json`) to the file reader and
/// everything else to speech-to-text.
pub struct CallTranscriber {
    files: TranscriptFileReader,
    speech: WhisperApiTranscriber,
}

impl CallTranscriber {
    pub fn new(speech: WhisperApiTranscriber) -> Self {
        Self {
            files: TranscriptFileReader,
            speech,
        }
    }
}

pub fn is_transcript_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("txt") || ext.eq_ignore_ascii_case("json"))
}

#[async_trait]
impl Transcriber for CallTranscriber {
    async fn transcribe(&self, path: &Path) -> Result<Transcript, TranscriptionError> {
        if is_transcript_file(path) {
            self.files.transcribe(path).await
        } else {
            self.speech.transcribe(path).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saved_transcripts_skip_speech_to_text() {
        assert!(is_transcript_file(Path::new("calls/001.txt")));
        assert!(is_transcript_file(Path::new("calls/001.JSON")));
        assert!(!is_transcript_file(Path::new("calls/001.mp3")));
        assert!(!is_transcript_file(Path::new("calls/001")));
    }

    #[test]
    fn missing_roles_file_falls_back_to_an_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let profiles = load_profiles(dir.path());
        assert!(profiles.roles().is_empty());
        assert_eq!(profiles.resolve("R01").name, "用户");
    }
}
