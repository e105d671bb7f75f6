use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::document::{DocumentSource, KnowledgeDocument, RetrievalResult};
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::store::{IndexedDocument, VectorStore, rank};

const UPSERT_BATCH: usize = 64;

/// Qdrant REST backend. The logical collection name is an alias pointing at a
/// physical `<name>_<uuid>` collection, so a rebuild is a single alias switch.
pub struct QdrantStore {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct CreateCollection {
    vectors: VectorParams,
}

#[derive(Serialize)]
struct VectorParams {
    size: usize,
    distance: String,
}

#[derive(Serialize)]
struct UpsertPoints {
    points: Vec<Point>,
}

#[derive(Serialize)]
struct Point {
    id: u64,
    vector: Vec<f32>,
    payload: HashMap<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct AliasList {
    result: AliasResult,
}

#[derive(Deserialize)]
struct AliasResult {
    aliases: Vec<Alias>,
}

#[derive(Deserialize)]
struct Alias {
    alias_name: String,
    collection_name: String,
}

#[derive(Deserialize)]
struct CollectionList {
    result: CollectionListResult,
}

#[derive(Deserialize)]
struct CollectionListResult {
    collections: Vec<CollectionName>,
}

#[derive(Deserialize)]
struct CollectionName {
    name: String,
}

impl QdrantStore {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn current_target(&self, alias: &str) -> KnowledgeResult<Option<String>> {
        let url = format!("{}/aliases", self.base_url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(KnowledgeError::storage(format!(
                "failed to list aliases: {}",
                response.status()
            )));
        }
        let list: AliasList = response.json().await?;
        Ok(list
            .result
            .aliases
            .into_iter()
            .find(|a| a.alias_name == alias)
            .map(|a| a.collection_name))
    }

    async fn physical_collection_exists(&self, name: &str) -> KnowledgeResult<bool> {
        let url = format!("{}/collections", self.base_url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(KnowledgeError::storage(format!(
                "failed to list collections: {}",
                response.status()
            )));
        }
        let info: CollectionList = response.json().await?;
        Ok(info.result.collections.iter().any(|c| c.name == name))
    }

    async fn create_collection(&self, name: &str, dimension: usize) -> KnowledgeResult<()> {
        let url = format!("{}/collections/{}", self.base_url, name);
        let create_req = CreateCollection {
            vectors: VectorParams {
                size: dimension,
                distance: "Cosine".to_string(),
            },
        };

        let response = self.client.put(&url).json(&create_req).send().await?;
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(KnowledgeError::storage(format!(
                "failed to create collection {name}: {error_text}"
            )));
        }
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> KnowledgeResult<()> {
        let url = format!("{}/collections/{}", self.base_url, name);
        let response = self.client.delete(&url).send().await?;
        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(KnowledgeError::storage(format!(
                "failed to delete collection {name}: {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn upsert(&self, collection: &str, documents: Vec<IndexedDocument>) -> KnowledgeResult<()> {
        let url = format!("{}/collections/{}/points?wait=true", self.base_url, collection);

        let mut points: Vec<Point> = documents.into_iter().map(to_point).collect();
        while !points.is_empty() {
            let rest = points.split_off(points.len().min(UPSERT_BATCH));
            let batch = UpsertPoints { points };

            let response = self.client.put(&url).json(&batch).send().await?;
            if !response.status().is_success() {
                let error_text = response.text().await.unwrap_or_default();
                return Err(KnowledgeError::storage(format!(
                    "failed to upsert points: {error_text}"
                )));
            }
            points = rest;
        }
        Ok(())
    }

    async fn switch_alias(&self, alias: &str, target: &str, had_alias: bool) -> KnowledgeResult<()> {
        let url = format!("{}/collections/aliases", self.base_url);
        let mut actions = Vec::new();
        if had_alias {
            actions.push(json!({ "delete_alias": { "alias_name": alias } }));
        }
        actions.push(json!({ "create_alias": { "collection_name": target, "alias_name": alias } }));

        let response = self
            .client
            .post(&url)
            .json(&json!({ "actions": actions }))
            .send()
            .await?;
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(KnowledgeError::storage(format!(
                "failed to switch alias {alias}: {error_text}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn replace_collection(
        &self,
        name: &str,
        model: &str,
        documents: Vec<IndexedDocument>,
    ) -> KnowledgeResult<()> {
        let dimension = documents.first().map(|d| d.vector.len()).unwrap_or(0);
        if dimension == 0 {
            return Err(KnowledgeError::ingestion("no embedded documents to store"));
        }

        let physical = format!("{}_{}", name, uuid::Uuid::new_v4().simple());
        self.create_collection(&physical, dimension).await?;
        if let Err(e) = self.upsert(&physical, documents).await {
            let _ = self.delete_collection(&physical).await;
            return Err(e);
        }

        let previous = self.current_target(name).await?;
        if previous.is_none() && self.physical_collection_exists(name).await? {
            // a plain collection squats on the alias name
            tracing::warn!(collection = name, "replacing non-aliased collection");
            self.delete_collection(name).await?;
        }

        self.switch_alias(name, &physical, previous.is_some()).await?;
        tracing::info!(collection = name, physical = %physical, model, "switched knowledge alias");

        if let Some(old) = previous {
            if let Err(e) = self.delete_collection(&old).await {
                tracing::warn!(collection = %old, error = %e, "failed to retire old collection");
            }
        }
        Ok(())
    }

    async fn search(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
    ) -> KnowledgeResult<Vec<RetrievalResult>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let url = format!("{}/collections/{}/points/search", self.base_url, name);
        let body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true
        });

        let response = self.client.post(&url).json(&body).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(KnowledgeError::storage(format!("Qdrant search failed: {error_text}")));
        }

        let result: serde_json::Value = response.json().await?;
        let points = result["result"]
            .as_array()
            .ok_or_else(|| KnowledgeError::storage("invalid Qdrant response format"))?;

        let hits = points
            .iter()
            .filter_map(|point| {
                let score = point["score"].as_f64().unwrap_or(0.0) as f32;
                let document = from_payload(&point["payload"])?;
                Some(RetrievalResult {
                    id: document.id,
                    category: document.category,
                    snippet: document.text,
                    distance: (1.0 - score).clamp(0.0, 2.0),
                    source: document.source,
                })
            })
            .collect();

        Ok(rank(hits, limit))
    }

    async fn count(&self, name: &str) -> KnowledgeResult<usize> {
        let url = format!("{}/collections/{}/points/count", self.base_url, name);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "exact": true }))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(0);
        }
        if !response.status().is_success() {
            return Err(KnowledgeError::storage(format!(
                "failed to count points: {}",
                response.status()
            )));
        }
        let result: serde_json::Value = response.json().await?;
        Ok(result["result"]["count"].as_u64().unwrap_or(0) as usize)
    }

    async fn get(&self, name: &str, id: &str) -> KnowledgeResult<Option<KnowledgeDocument>> {
        let url = format!("{}/collections/{}/points", self.base_url, name);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "ids": [hash_to_u64(id)], "with_payload": true }))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(KnowledgeError::storage(format!(
                "failed to fetch point: {}",
                response.status()
            )));
        }
        let result: serde_json::Value = response.json().await?;
        Ok(result["result"]
            .as_array()
            .and_then(|points| points.first())
            .and_then(|point| from_payload(&point["payload"])))
    }
}

fn to_point(indexed: IndexedDocument) -> Point {
    let IndexedDocument { document, vector } = indexed;

    let mut payload = HashMap::new();
    payload.insert("doc_id".to_string(), json!(document.id));
    payload.insert("text".to_string(), json!(document.text));
    payload.insert("category".to_string(), json!(document.category));
    payload.insert("keywords".to_string(), json!(document.keywords));
    payload.insert("source".to_string(), json!(document.source));
    payload.insert("metadata".to_string(), json!(document.metadata));

    Point {
        id: hash_to_u64(&document.id),
        vector,
        payload,
    }
}

fn from_payload(payload: &serde_json::Value) -> Option<KnowledgeDocument> {
    let payload = payload.as_object()?;
    let source: DocumentSource = serde_json::from_value(payload.get("source")?.clone()).ok()?;
    Some(KnowledgeDocument {
        id: payload.get("doc_id")?.as_str()?.to_string(),
        text: payload.get("text").and_then(|v| v.as_str()).unwrap_or("").to_string(),
        category: payload
            .get("category")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown")
            .to_string(),
        keywords: payload
            .get("keywords")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default(),
        source,
        metadata: payload
            .get("metadata")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default(),
    })
}

/// Point id for a document id: the first 8 bytes of its SHA-256, big-endian.
/// Must stay stable across builds so reattached collections keep resolving.
fn hash_to_u64(s: &str) -> u64 {
    let digest = Sha256::digest(s.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}
