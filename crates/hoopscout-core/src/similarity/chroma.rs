// Chroma vector index backend over its v2 HTTP API.
//
// Embeddings are always supplied explicitly; the collection is created with
// the L2 space so distances agree with `MemoryIndex`. The collection id is
// resolved on first use and cached behind an async lock.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::IndexConfig;
use crate::similarity::embedding::Embedding;
use crate::similarity::index::{IndexEntry, IndexError, IndexHit, IndexMetadata, NeighborIndex};

/// Distance function requested when the collection is created.
const DISTANCE_SPACE: &str = "l2";

// ---------------------------------------------------------------------------
// ChromaIndex
// ---------------------------------------------------------------------------

pub struct ChromaIndex {
    http: reqwest::Client,
    collections_url: String,
    collection: String,
    collection_id: RwLock<Option<String>>,
}

impl ChromaIndex {
    /// Build a client for the configured collection. No request is made
    /// until the first index operation.
    pub fn new(config: &IndexConfig) -> Result<Self, IndexError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            collections_url: collections_url(&config.url, &config.tenant, &config.database),
            collection: config.collection.clone(),
            collection_id: RwLock::new(None),
        })
    }

    /// Resolve (once) and return the collection's id.
    ///
    /// A failed or cancelled lookup leaves the cache empty, so the next call
    /// retries from scratch.
    async fn collection_id(&self) -> Result<String, IndexError> {
        if let Some(id) = self.collection_id.read().await.as_ref() {
            return Ok(id.clone());
        }

        let mut slot = self.collection_id.write().await;
        if let Some(id) = slot.as_ref() {
            return Ok(id.clone());
        }
        let id = self.fetch_collection_id().await?;
        debug!(collection = %self.collection, id = %id, "resolved index collection");
        *slot = Some(id.clone());
        Ok(id)
    }

    async fn fetch_collection_id(&self) -> Result<String, IndexError> {
        let url = format!("{}/{}", self.collections_url, self.collection);
        let resp = check_status(self.http.get(&url).send().await?).await?;
        let body = read_json(resp).await?;
        parse_collection_id(&body)
            .ok_or_else(|| IndexError::Malformed("collection response has no `id`".into()))
    }

    async fn create_collection(&self) -> Result<String, IndexError> {
        let body = json!({
            "name": self.collection,
            "get_or_create": true,
            "metadata": { "hnsw:space": DISTANCE_SPACE },
        });
        let resp = check_status(
            self.http
                .post(&self.collections_url)
                .json(&body)
                .send()
                .await?,
        )
        .await?;
        let body = read_json(resp).await?;
        parse_collection_id(&body)
            .ok_or_else(|| IndexError::Malformed("create collection response has no `id`".into()))
    }

    async fn delete_collection(&self) -> Result<(), IndexError> {
        let url = format!("{}/{}", self.collections_url, self.collection);
        let resp = self.http.delete(&url).send().await?;
        let status = resp.status();
        if status.is_success() {
            info!(collection = %self.collection, "deleted existing index collection");
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        if is_missing_collection(status.as_u16(), &body) {
            debug!(collection = %self.collection, "no index collection to delete");
            return Ok(());
        }
        Err(IndexError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl NeighborIndex for ChromaIndex {
    async fn reset(&self) -> Result<(), IndexError> {
        // Hold the write lock so no query runs against a half-rebuilt id.
        let mut slot = self.collection_id.write().await;
        *slot = None;
        self.delete_collection().await?;
        let id = self.create_collection().await?;
        info!(collection = %self.collection, id = %id, "created index collection");
        *slot = Some(id);
        Ok(())
    }

    async fn upsert_batch(&self, entries: &[IndexEntry]) -> Result<(), IndexError> {
        if entries.is_empty() {
            return Ok(());
        }
        let id = self.collection_id().await?;
        let url = format!("{}/{}/upsert", self.collections_url, id);
        check_status(self.http.post(&url).json(&upsert_body(entries)?).send().await?).await?;
        debug!(count = entries.len(), "upserted index batch");
        Ok(())
    }

    async fn query(&self, embedding: &Embedding, n_results: usize) -> Result<Vec<IndexHit>, IndexError> {
        let id = self.collection_id().await?;
        let url = format!("{}/{}/query", self.collections_url, id);
        let body = json!({
            "query_embeddings": [embedding.values()],
            "n_results": n_results,
            "include": ["distances", "metadatas"],
        });
        let resp = check_status(self.http.post(&url).json(&body).send().await?).await?;
        let body = read_json(resp).await?;
        parse_query_response(&body)
    }
}

// ---------------------------------------------------------------------------
// Request / response helpers
// ---------------------------------------------------------------------------

fn collections_url(base: &str, tenant: &str, database: &str) -> String {
    format!(
        "{}/api/v2/tenants/{}/databases/{}/collections",
        base.trim_end_matches('/'),
        tenant,
        database
    )
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, IndexError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(IndexError::Status {
        status: status.as_u16(),
        body,
    })
}

/// A body that fails to decode is malformed, not a transport failure.
async fn read_json(resp: reqwest::Response) -> Result<Value, IndexError> {
    let text = resp.text().await?;
    serde_json::from_str(&text).map_err(|e| IndexError::Malformed(format!("response is not JSON: {e}")))
}

/// Chroma reports a missing collection as 404, or on some versions as an
/// error body mentioning that it does not exist.
fn is_missing_collection(status: u16, body: &str) -> bool {
    let body = body.to_ascii_lowercase();
    status == 404 || body.contains("does not exist") || body.contains("not found")
}

pub(crate) fn upsert_body(entries: &[IndexEntry]) -> Result<Value, IndexError> {
    let metadatas = entries
        .iter()
        .map(|e| serde_json::to_value(&e.metadata))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| IndexError::Malformed(format!("failed to encode metadata: {e}")))?;

    Ok(json!({
        "ids": entries.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
        "embeddings": entries.iter().map(|e| e.embedding.values()).collect::<Vec<_>>(),
        "metadatas": metadatas,
        "documents": entries.iter().map(|e| e.document.as_str()).collect::<Vec<_>>(),
    }))
}

/// Extract `id` from a collection object.
pub(crate) fn parse_collection_id(body: &Value) -> Option<String> {
    body.get("id")?.as_str().map(|s| s.to_string())
}

/// Turn a single-query response into hits.
///
/// Expected shape: `{ "ids": [[..]], "distances": [[..]] | null, "metadatas": [[..]] | null }`.
/// `ids` is required; missing distances or metadata become `None` per hit.
pub(crate) fn parse_query_response(body: &Value) -> Result<Vec<IndexHit>, IndexError> {
    let ids = body
        .get("ids")
        .and_then(Value::as_array)
        .ok_or_else(|| IndexError::Malformed("query response has no `ids`".into()))?;

    // One query embedding was sent, so only the first result list matters.
    let Some(first) = ids.first() else {
        return Ok(Vec::new());
    };
    let ids = first
        .as_array()
        .ok_or_else(|| IndexError::Malformed("`ids[0]` is not a list".into()))?;

    let distances = first_list(body, "distances");
    let metadatas = first_list(body, "metadatas");

    Ok(ids
        .iter()
        .enumerate()
        .map(|(i, id)| IndexHit {
            id: match id {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            distance: distances.and_then(|d| d.get(i)).and_then(Value::as_f64),
            metadata: metadatas
                .and_then(|m| m.get(i))
                .filter(|m| !m.is_null())
                .and_then(|m| serde_json::from_value::<IndexMetadata>(m.clone()).ok()),
        })
        .collect())
}

/// `body[key][0]` when both levels are lists. Absent or `null` yields `None`.
fn first_list<'a>(body: &'a Value, key: &str) -> Option<&'a Vec<Value>> {
    body.get(key)?.as_array()?.first()?.as_array()
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
