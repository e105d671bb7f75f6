use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub mode: OperationMode,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub knowledge: KnowledgeConfig,
    pub asr: AsrConfig,
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    Fast,      // Short timeouts, few retries, large embedding cache
    Accurate,  // Long timeouts, more retries, no cache
    Balanced,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Ollama,
    OpenAi,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeBackend {
    File,
    Qdrant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    pub backend: KnowledgeBackend,
    pub persist_dir: PathBuf,
    pub collection: String,
    pub qdrant_url: String,
    /// Holds `cases.csv`, `mapping_full.csv` and `roles.csv`.
    pub data_dir: PathBuf,
    pub top_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrConfig {
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub max_concurrent_analyses: usize,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: OperationMode::Balanced,
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                base_url: "http://localhost:11434".to_string(),
                model: "llama3".to_string(),
                api_key: String::new(),
                temperature: agent::DEFAULT_TEMPERATURE,
            },
            embedding: EmbeddingConfig {
                base_url: "http://localhost:11434".to_string(),
                model: "nomic-embed-text".to_string(),
            },
            knowledge: KnowledgeConfig {
                backend: KnowledgeBackend::File,
                persist_dir: PathBuf::from("./db/knowledge"),
                collection: knowledge::DEFAULT_COLLECTION.to_string(),
                qdrant_url: "http://localhost:6333".to_string(),
                data_dir: PathBuf::from("./data"),
                top_k: pipeline::DEFAULT_TOP_K,
            },
            asr: AsrConfig {
                base_url: "http://localhost:9000/v1".to_string(),
                model: "whisper-1".to_string(),
                api_key: String::new(),
                language: "zh".to_string(),
            },
            concurrency: ConcurrencyConfig {
                max_concurrent_analyses: 3,
                request_timeout_secs: 60,
            },
            retry: RetryConfig {
                max_retries: 3,
                initial_backoff_ms: 1000,
                max_backoff_ms: 10000,
            },
            cache: CacheConfig {
                enabled: true,
                max_entries: 10000,
            },
            server: ServerConfig {
                bind_addr: "0.0.0.0:8000".to_string(),
            },
        }
    }
}

impl AppConfig {
    pub fn fast_mode() -> Self {
        let base = Self::default();
        Self {
            mode: OperationMode::Fast,
            concurrency: ConcurrencyConfig {
                max_concurrent_analyses: 10,
                request_timeout_secs: 30,
            },
            retry: RetryConfig {
                max_retries: 2,
                initial_backoff_ms: 500,
                max_backoff_ms: 5000,
            },
            cache: CacheConfig {
                enabled: true,
                max_entries: 50000,
            },
            ..base
        }
    }

    pub fn accurate_mode() -> Self {
        let base = Self::default();
        Self {
            mode: OperationMode::Accurate,
            concurrency: ConcurrencyConfig {
                max_concurrent_analyses: 2,
                request_timeout_secs: 120,
            },
            retry: RetryConfig {
                max_retries: 5,
                initial_backoff_ms: 2000,
                max_backoff_ms: 20000,
            },
            cache: CacheConfig {
                enabled: false,
                max_entries: 0,
            },
            ..base
        }
    }

    /// Defaults (or the `APP_MODE` preset) overlaid with environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut config = match get("APP_MODE").as_deref() {
            Some("fast") => Self::fast_mode(),
            Some("accurate") => Self::accurate_mode(),
            _ => Self::default(),
        };

        // An API key or explicit OpenAI base URL selects the OpenAI-compatible
        // backend unless a provider is named.
        let provider = get("LLM_PROVIDER").map(|p| p.to_ascii_lowercase());
        let openai_hinted = get("OPENAI_API_KEY").is_some() || get("OPENAI_BASE_URL").is_some();
        config.llm.provider = match provider.as_deref() {
            Some("ollama") => LlmProvider::Ollama,
            Some("openai") => LlmProvider::OpenAi,
            _ if openai_hinted => LlmProvider::OpenAi,
            _ => config.llm.provider,
        };

        match config.llm.provider {
            LlmProvider::OpenAi => {
                config.llm.base_url =
                    get("OPENAI_BASE_URL").unwrap_or_else(|| "https://api.openai.com/v1".to_string());
                config.llm.model = get("OPENAI_MODEL_NAME").unwrap_or_else(|| "gpt-4o-mini".to_string());
                config.llm.api_key = get("OPENAI_API_KEY").unwrap_or_default();
            }
            LlmProvider::Ollama => {
                if let Some(url) = get("OLLAMA_URL") {
                    config.llm.base_url = url;
                }
                if let Some(model) = get("OLLAMA_MODEL") {
                    config.llm.model = model;
                }
            }
        }

        if let Some(url) = get("EMBEDDING_URL").or_else(|| get("OLLAMA_URL")) {
            config.embedding.base_url = url;
        }
        if let Some(model) = get("EMBEDDING_MODEL") {
            config.embedding.model = model;
        }

        if let Some(dir) = get("KNOWLEDGE_PERSIST_DIR") {
            config.knowledge.persist_dir = PathBuf::from(dir);
        }
        if let Some(backend) = get("KNOWLEDGE_BACKEND") {
            config.knowledge.backend = match backend.to_ascii_lowercase().as_str() {
                "qdrant" => KnowledgeBackend::Qdrant,
                _ => KnowledgeBackend::File,
            };
        }
        if let Some(url) = get("QDRANT_URL") {
            config.knowledge.qdrant_url = url;
        }
        if let Some(dir) = get("DATA_DIR") {
            config.knowledge.data_dir = PathBuf::from(dir);
        }
        if let Some(k) = get("KNOWLEDGE_TOP_K").and_then(|k| k.parse().ok()) {
            config.knowledge.top_k = k;
        }

        if let Some(url) = get("ASR_BASE_URL") {
            config.asr.base_url = url;
        }
        if let Some(model) = get("ASR_MODEL") {
            config.asr.model = model;
        }
        config.asr.api_key = get("ASR_API_KEY")
            .or_else(|| get("OPENAI_API_KEY"))
            .unwrap_or_default();

        if let Some(secs) = get("REQUEST_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
            config.concurrency.request_timeout_secs = secs;
        }
        if let Some(n) = get("MAX_CONCURRENT_ANALYSES").and_then(|n| n.parse().ok()) {
            config.concurrency.max_concurrent_analyses = n;
        }
        if let Some(addr) = get("BIND_ADDR") {
            config.server.bind_addr = addr;
        }

        config
    }

    pub fn retry_policy(&self) -> agent::RetryPolicy {
        agent::RetryPolicy::new(
            self.retry.max_retries,
            self.retry.initial_backoff_ms,
            self.retry.max_backoff_ms,
        )
    }
}
