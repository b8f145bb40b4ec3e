//! Dual-space embedding: one input string, two independent vector spaces.
//!
//! Prose and code chunks are indexed with different models, so a query must
//! be embedded twice before fan-out. [`embed_dual`] runs both branches
//! concurrently and keeps their failures isolated: a dead code-embedding
//! endpoint still yields a usable prose vector, and the caller simply skips
//! the collection it has no vector for.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::config::EmbeddingConfig;

/// External embedding collaborator with two independent spaces.
///
/// Dimensions may differ between the spaces and are expected to be cheap to
/// query repeatedly; implementations cache them for the process lifetime.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed_prose(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_code(&self, text: &str) -> Result<Vec<f32>>;
    async fn prose_dim(&self) -> Result<usize>;
    async fn code_dim(&self) -> Result<usize>;
}

/// Result of embedding one string into both spaces.
///
/// A `None` branch means that space's embedding failed (already logged);
/// downstream search skips the corresponding collection.
#[derive(Debug, Clone, Default)]
pub struct DualEmbedding {
    pub prose: Option<Vec<f32>>,
    pub code: Option<Vec<f32>>,
}

impl DualEmbedding {
    pub fn is_empty(&self) -> bool {
        self.prose.is_none() && self.code.is_none()
    }
}

/// Embed `text` into both spaces concurrently.
///
/// When `want_code` is false the code branch is skipped outright; no call,
/// no vector. Branch failures degrade to `None` rather than erroring, so the
/// caller always gets whatever succeeded.
pub async fn embed_dual(
    service: &dyn EmbeddingService,
    text: &str,
    want_code: bool,
) -> DualEmbedding {
    if !want_code {
        let prose = match service.embed_prose(text).await {
            Ok(v) => Some(v),
            Err(err) => {
                tracing::warn!(error = %err, "prose embedding failed");
                None
            }
        };
        return DualEmbedding { prose, code: None };
    }

    let (prose, code) = tokio::join!(service.embed_prose(text), service.embed_code(text));

    DualEmbedding {
        prose: match prose {
            Ok(v) => Some(v),
            Err(err) => {
                tracing::warn!(error = %err, "prose embedding failed");
                None
            }
        },
        code: match code {
            Ok(v) => Some(v),
            Err(err) => {
                tracing::warn!(error = %err, "code embedding failed");
                None
            }
        },
    }
}

/// Embedding service backed by an Ollama-compatible `/api/embed` endpoint.
///
/// Both spaces share the endpoint and differ by model name. Dimensions come
/// from config when pinned; otherwise the first call probes the service with
/// a short input and caches the answer for the process lifetime.
pub struct HttpEmbeddingService {
    config: EmbeddingConfig,
    prose_dim: OnceCell<usize>,
    code_dim: OnceCell<usize>,
}

impl HttpEmbeddingService {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            config,
            prose_dim: OnceCell::new(),
            code_dim: OnceCell::new(),
        }
    }

    /// Call `/api/embed` for one model with retry/backoff.
    ///
    /// - HTTP 429 or 5xx → retry with exponential backoff
    /// - other 4xx → fail immediately
    /// - network error → retry
    async fn embed_with_model(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build()?;

        let body = serde_json::json!({
            "model": model,
            "input": [text],
        });

        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post(format!("{}/api/embed", self.config.url))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_embed_response(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "Embedding API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Embedding API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(anyhow::anyhow!(
                        "Embedding connection error (is the service running at {}?): {}",
                        self.config.url,
                        e
                    ));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
    }

    /// Probe one space's dimensionality by embedding a short input.
    async fn probe_dim(&self, model: &str) -> Result<usize> {
        let vector = self.embed_with_model(model, "dimension probe").await?;
        if vector.is_empty() {
            bail!("Embedding service returned an empty vector for model {}", model);
        }
        Ok(vector.len())
    }
}

#[async_trait]
impl EmbeddingService for HttpEmbeddingService {
    async fn embed_prose(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_with_model(&self.config.prose_model, text).await
    }

    async fn embed_code(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_with_model(&self.config.code_model, text).await
    }

    async fn prose_dim(&self) -> Result<usize> {
        if let Some(dims) = self.config.prose_dims {
            return Ok(dims);
        }
        self.prose_dim
            .get_or_try_init(|| self.probe_dim(&self.config.prose_model))
            .await
            .copied()
    }

    async fn code_dim(&self) -> Result<usize> {
        if let Some(dims) = self.config.code_dims {
            return Ok(dims);
        }
        self.code_dim
            .get_or_try_init(|| self.probe_dim(&self.config.code_model))
            .await
            .copied()
    }
}

/// Extract the first embedding from an `/api/embed` response.
fn parse_embed_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: missing embeddings array"))?;

    let first = embeddings
        .first()
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: empty embeddings array"))?;

    Ok(first
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}
