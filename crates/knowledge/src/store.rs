use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;

use crate::document::{KnowledgeDocument, RetrievalResult};
use crate::error::{KnowledgeError, KnowledgeResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub document: KnowledgeDocument,
    pub vector: Vec<f32>,
}

/// Storage backend for named collections of embedded documents.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Replace the collection `name` with `documents`. Readers see either the
    /// old or the new collection, never a partial one.
    async fn replace_collection(
        &self,
        name: &str,
        model: &str,
        documents: Vec<IndexedDocument>,
    ) -> KnowledgeResult<()>;

    /// Nearest neighbours by ascending distance. Unknown collections yield an
    /// empty result.
    async fn search(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
    ) -> KnowledgeResult<Vec<RetrievalResult>>;

    async fn count(&self, name: &str) -> KnowledgeResult<usize>;

    async fn get(&self, name: &str, id: &str) -> KnowledgeResult<Option<KnowledgeDocument>>;
}

/// Cosine distance `1 - cos(a, b)`, clamped to `[0, 2]`.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    let similarity = if mag_a == 0.0 || mag_b == 0.0 {
        0.0
    } else {
        dot / (mag_a * mag_b)
    };
    (1.0 - similarity).clamp(0.0, 2.0)
}

/// Sort hits by distance, then id, and keep the first `limit`.
pub fn rank(mut hits: Vec<RetrievalResult>, limit: usize) -> Vec<RetrievalResult> {
    hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then_with(|| a.id.cmp(&b.id)));
    hits.truncate(limit);
    hits
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedCollection {
    name: String,
    model: String,
    dimension: usize,
    documents: Vec<IndexedDocument>,
}

/// Exact-search store persisting each collection as `<root>/<name>.json`.
pub struct FileStore {
    root: PathBuf,
    collections: RwLock<HashMap<String, Arc<PersistedCollection>>>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            collections: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.json"))
    }

    /// Loaded collection, reading it from disk on first access.
    async fn collection(&self, name: &str) -> KnowledgeResult<Option<Arc<PersistedCollection>>> {
        if let Some(loaded) = self.collections.read().await.get(name) {
            return Ok(Some(loaded.clone()));
        }

        let path = self.collection_path(name);
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }

        let raw = fs::read(&path).await?;
        let persisted: PersistedCollection = serde_json::from_slice(&raw)?;
        tracing::info!(
            collection = name,
            documents = persisted.documents.len(),
            path = %path.display(),
            "attached persisted knowledge collection"
        );

        let mut collections = self.collections.write().await;
        let entry = collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(persisted));
        Ok(Some(entry.clone()))
    }
}

#[async_trait]
impl VectorStore for FileStore {
    async fn replace_collection(
        &self,
        name: &str,
        model: &str,
        documents: Vec<IndexedDocument>,
    ) -> KnowledgeResult<()> {
        let dimension = documents.first().map(|d| d.vector.len()).unwrap_or(0);
        let collection = Arc::new(PersistedCollection {
            name: name.to_string(),
            model: model.to_string(),
            dimension,
            documents,
        });

        fs::create_dir_all(&self.root).await?;
        let temp_path = self
            .root
            .join(format!("{}.{}.tmp", name, uuid::Uuid::new_v4().simple()));
        let json = serde_json::to_vec(collection.as_ref())?;

        if let Err(e) = fs::write(&temp_path, &json).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        // rename is atomic on the same filesystem
        if let Err(e) = fs::rename(&temp_path, self.collection_path(name)).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        self.collections
            .write()
            .await
            .insert(name.to_string(), collection);
        Ok(())
    }

    async fn search(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
    ) -> KnowledgeResult<Vec<RetrievalResult>> {
        let Some(collection) = self.collection(name).await? else {
            return Ok(Vec::new());
        };
        if collection.documents.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        if vector.len() != collection.dimension {
            return Err(KnowledgeError::Dimension {
                expected: collection.dimension,
                actual: vector.len(),
            });
        }

        let hits = collection
            .documents
            .iter()
            .map(|indexed| RetrievalResult {
                id: indexed.document.id.clone(),
                category: indexed.document.category.clone(),
                snippet: indexed.document.text.clone(),
                distance: cosine_distance(vector, &indexed.vector),
                source: indexed.document.source,
            })
            .collect();

        Ok(rank(hits, limit))
    }

    async fn count(&self, name: &str) -> KnowledgeResult<usize> {
        Ok(self
            .collection(name)
            .await?
            .map(|c| c.documents.len())
            .unwrap_or(0))
    }

    async fn get(&self, name: &str, id: &str) -> KnowledgeResult<Option<KnowledgeDocument>> {
        Ok(self.collection(name).await?.and_then(|c| {
            c.documents
                .iter()
                .find(|d| d.document.id == id)
                .map(|d| d.document.clone())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentSource;
    use std::collections::BTreeMap;

    fn indexed(id: &str, vector: Vec<f32>) -> IndexedDocument {
        IndexedDocument {
            document: KnowledgeDocument {
                id: id.to_string(),
                text: format!("text of {id}"),
                category: "ETC".to_string(),
                keywords: vec![],
                source: DocumentSource::CaseDefinition,
                metadata: BTreeMap::new(),
            },
            vector,
        }
    }

    #[test]
    fn cosine_distance_is_zero_for_identical_vectors() {
        let v = [0.3, 0.4, 0.5];
        assert!(cosine_distance(&v, &v) < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn ties_are_broken_by_id() {
        let make = |id: &str| RetrievalResult {
            id: id.to_string(),
            category: String::new(),
            snippet: String::new(),
            distance: 0.5,
            source: DocumentSource::SampleDialogue,
        };
        let ranked = rank(vec![make("b"), make("a"), make("c")], 2);
        let ids: Vec<_> = ranked.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn unknown_collection_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert_eq!(store.count("scam_cases").await.unwrap(), 0);
        assert!(store.search("scam_cases", &[1.0], 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replaced_collection_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store
            .replace_collection("scam_cases", "test", vec![indexed("a", vec![1.0, 0.0]), indexed("b", vec![0.0, 1.0])])
            .await
            .unwrap();

        let reopened = FileStore::new(dir.path());
        assert_eq!(reopened.count("scam_cases").await.unwrap(), 2);
        let hits = reopened.search("scam_cases", &[0.0, 1.0], 1).await.unwrap();
        assert_eq!(hits[0].id, "b");
        assert!(reopened.get("scam_cases", "a").await.unwrap().is_some());

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn dimension_mismatch_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store
            .replace_collection("scam_cases", "test", vec![indexed("a", vec![1.0, 0.0])])
            .await
            .unwrap();

        let err = store.search("scam_cases", &[1.0, 0.0, 0.0], 1).await.unwrap_err();
        assert!(matches!(err, KnowledgeError::Dimension { expected: 2, actual: 3 }));
    }
}
