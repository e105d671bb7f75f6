pub mod cache;
pub mod corpus;
pub mod document;
pub mod embeddings;
pub mod error;
pub mod qdrant_store;
pub mod store;
pub mod testing;

pub use cache::{CacheStats, CachedEmbedder};
pub use corpus::CorpusReader;
pub use document::{
    CaseType, Corpus, DialogueSample, DocumentSource, KnowledgeDocument, RetrievalResult,
    MAX_DIALOGUES_PER_CASE,
};
pub use embeddings::{Embedder, EmbeddingClient};
pub use error::{KnowledgeError, KnowledgeResult};
pub use qdrant_store::QdrantStore;
pub use store::{FileStore, IndexedDocument, VectorStore};

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const DEFAULT_COLLECTION: &str = "scam_cases";

/// Similarity index over the fraud case corpus.
///
/// Queries may run concurrently. Rebuilds are serialized against each other and
/// publish the new collection in one swap, so readers keep seeing the previous
/// collection until the replacement is complete.
pub struct KnowledgeIndex {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    collection: String,
    rebuild_lock: Mutex<()>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RebuildStats {
    pub case_types: usize,
    pub dialogues: usize,
    pub total: usize,
}

impl KnowledgeIndex {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            store,
            embedder,
            collection: collection.into(),
            rebuild_lock: Mutex::new(()),
        }
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    /// Replace the indexed collection with `corpus`.
    pub async fn rebuild(&self, corpus: &Corpus) -> KnowledgeResult<RebuildStats> {
        let _guard = self.rebuild_lock.lock().await;
        tracing::info!(collection = %self.collection, "rebuilding knowledge collection");

        let documents = corpus.to_documents()?;
        let case_types = documents
            .iter()
            .filter(|d| d.source == DocumentSource::CaseDefinition)
            .count();

        let mut indexed = Vec::with_capacity(documents.len());
        let mut dimension = None;
        for document in documents {
            let vector = self.embedder.embed(&document.text).await?;
            match dimension {
                None => dimension = Some(vector.len()),
                Some(expected) if expected != vector.len() => {
                    return Err(KnowledgeError::Dimension {
                        expected,
                        actual: vector.len(),
                    });
                }
                Some(_) => {}
            }
            indexed.push(IndexedDocument { document, vector });
        }

        let total = indexed.len();
        self.store
            .replace_collection(&self.collection, self.embedder.model_id(), indexed)
            .await?;

        let stats = RebuildStats {
            case_types,
            dialogues: total - case_types,
            total,
        };
        tracing::info!(
            collection = %self.collection,
            case_types = stats.case_types,
            dialogues = stats.dialogues,
            "knowledge collection rebuilt"
        );
        Ok(stats)
    }

    /// Up to `k` nearest documents, ascending by distance. An empty collection
    /// is not an error.
    pub async fn query(&self, text: &str, k: usize) -> KnowledgeResult<Vec<RetrievalResult>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        if self.store.count(&self.collection).await? == 0 {
            tracing::warn!(collection = %self.collection, "knowledge collection is empty, build it first");
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed(text).await?;
        let results = self.store.search(&self.collection, &vector, k).await?;
        tracing::debug!(hits = results.len(), "knowledge query");
        Ok(results)
    }

    pub async fn count(&self) -> KnowledgeResult<usize> {
        self.store.count(&self.collection).await
    }

    pub async fn is_empty(&self) -> KnowledgeResult<bool> {
        Ok(self.count().await? == 0)
    }

    /// The case definition document for a case id such as `C01`.
    pub async fn get_case(&self, case_id: &str) -> KnowledgeResult<Option<KnowledgeDocument>> {
        self.store
            .get(&self.collection, &format!("case_{case_id}"))
            .await
    }
}
