//! Vector store abstraction and the Qdrant-backed implementation.
//!
//! The engine never owns chunk data; it reads chunks out of named vector
//! collections through this trait. Two implementations:
//! - **[`QdrantStore`]**: REST client for a Qdrant-compatible server.
//! - **[`MemoryStore`](memory::MemoryStore)**: brute-force in-memory store
//!   for tests.
//!
//! Collection provisioning is lazy and idempotent: the engine creates a
//! collection with the right dimensionality right before its first use, and
//! concurrent first-use from several requests must resolve to "collection
//! exists", never to a duplicate-creation error.

pub mod memory;

pub use memory::MemoryStore;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::VectorStoreConfig;
use crate::models::Chunk;

/// A chunk payload with the raw distance the store reported.
///
/// Distance is non-negative; smaller means more similar.
#[derive(Debug, Clone)]
pub struct StoreHit {
    pub chunk: Chunk,
    pub distance: f32,
}

/// External keyed-similarity-search collaborator.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create `collection` with the given dimensionality if it does not
    /// exist. "Already exists" is success, including under concurrent
    /// creation.
    async fn ensure_collection(&self, collection: &str, dim: usize) -> Result<()>;

    /// Similarity lookup. A missing collection yields an empty result, not
    /// an error.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        doc_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoreHit>>;

    /// List chunk payloads without a query vector (corpus inspection).
    async fn scroll(
        &self,
        collection: &str,
        doc_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Chunk>>;
}

/// REST client for a Qdrant-compatible vector store.
pub struct QdrantStore {
    config: VectorStoreConfig,
    client: reqwest::Client,
}

impl QdrantStore {
    pub fn new(config: VectorStoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    fn doc_filter(doc_id: Option<&str>) -> Option<serde_json::Value> {
        doc_id.map(|id| {
            serde_json::json!({
                "must": [{ "key": "doc_id", "match": { "value": id } }]
            })
        })
    }

    /// POST with retry/backoff; retries 429/5xx and network errors, fails
    /// fast on other 4xx. Returns the status and parsed body of the last
    /// response.
    async fn post_with_retry(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<(reqwest::StatusCode, serde_json::Value)> {
        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            match self.client.post(url).json(body).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "Vector store error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let json: serde_json::Value =
                        response.json().await.unwrap_or(serde_json::Value::Null);
                    return Ok((status, json));
                }
                Err(e) => {
                    last_err = Some(anyhow::anyhow!(
                        "Vector store connection error (is it running at {}?): {}",
                        self.config.url,
                        e
                    ));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Vector store request failed after retries")))
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(&self, collection: &str, dim: usize) -> Result<()> {
        let info_url = format!("{}/collections/{}", self.config.url, collection);

        // Check-then-create; a lost race surfaces as a conflict on create,
        // which also counts as "exists".
        if let Ok(response) = self.client.get(&info_url).send().await {
            if response.status().is_success() {
                return Ok(());
            }
        }

        let body = serde_json::json!({
            "vectors": { "size": dim, "distance": "Cosine" }
        });

        let response = self.client.put(&info_url).json(&body).send().await?;
        let status = response.status();

        if status.is_success() || status.as_u16() == 409 {
            tracing::debug!(collection, dim, "collection ready");
            return Ok(());
        }

        let body_text = response.text().await.unwrap_or_default();
        if body_text.contains("already exists") {
            return Ok(());
        }

        bail!(
            "Failed to create collection '{}': {} {}",
            collection,
            status,
            body_text
        )
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        doc_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoreHit>> {
        let url = format!(
            "{}/collections/{}/points/search",
            self.config.url, collection
        );

        let mut body = serde_json::json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });
        if let Some(filter) = Self::doc_filter(doc_id) {
            body["filter"] = filter;
        }

        let (status, json) = self.post_with_retry(&url, &body).await?;

        if status.as_u16() == 404 {
            // Collection not provisioned yet; nothing indexed, not an error.
            return Ok(Vec::new());
        }
        if !status.is_success() {
            bail!("Vector store search error {}: {}", status, json);
        }

        let points = json
            .get("result")
            .and_then(|r| r.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid search response: missing result array"))?;

        let mut hits = Vec::with_capacity(points.len());
        for point in points {
            let distance = point
                .get("score")
                .and_then(|s| s.as_f64())
                .unwrap_or(f64::MAX) as f32;
            let Some(payload) = point.get("payload") else {
                continue;
            };
            match serde_json::from_value::<Chunk>(payload.clone()) {
                Ok(chunk) => hits.push(StoreHit { chunk, distance }),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping hit with malformed payload");
                }
            }
        }

        Ok(hits)
    }

    async fn scroll(
        &self,
        collection: &str,
        doc_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Chunk>> {
        let url = format!(
            "{}/collections/{}/points/scroll",
            self.config.url, collection
        );

        let mut body = serde_json::json!({
            "limit": limit,
            "with_payload": true,
        });
        if let Some(filter) = Self::doc_filter(doc_id) {
            body["filter"] = filter;
        }

        let (status, json) = self.post_with_retry(&url, &body).await?;

        if status.as_u16() == 404 {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            bail!("Vector store scroll error {}: {}", status, json);
        }

        let points = json
            .pointer("/result/points")
            .and_then(|p| p.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid scroll response: missing points array"))?;

        let mut chunks = Vec::with_capacity(points.len());
        for point in points {
            let Some(payload) = point.get("payload") else {
                continue;
            };
            match serde_json::from_value::<Chunk>(payload.clone()) {
                Ok(chunk) => chunks.push(chunk),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping point with malformed payload");
                }
            }
        }

        Ok(chunks)
    }
}
