use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration, loaded from a TOML file.
///
/// Every section has defaults so a partial (or empty) file still yields a
/// working configuration; [`load_config`] validates ranges after parsing.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    /// Base URL of the vector store's REST API.
    #[serde(default = "default_store_url")]
    pub url: String,
    #[serde(default = "default_prose_collection")]
    pub prose_collection: String,
    #[serde(default = "default_code_collection")]
    pub code_collection: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            prose_collection: default_prose_collection(),
            code_collection: default_code_collection(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_store_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_prose_collection() -> String {
    "text_chunks".to_string()
}
fn default_code_collection() -> String {
    "code_chunks".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

/// Dual-space embedding service settings.
///
/// Prose and code are embedded by different models, usually behind the same
/// endpoint. Dimensions may be pinned here; when left unset they are probed
/// from the service once and cached for the process lifetime.
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_url")]
    pub url: String,
    #[serde(default = "default_prose_model")]
    pub prose_model: String,
    #[serde(default = "default_code_model")]
    pub code_model: String,
    #[serde(default)]
    pub prose_dims: Option<usize>,
    #[serde(default)]
    pub code_dims: Option<usize>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: default_embedding_url(),
            prose_model: default_prose_model(),
            code_model: default_code_model(),
            prose_dims: None,
            code_dims: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_embedding_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_prose_model() -> String {
    "all-minilm-l6-v2".to_string()
}
fn default_code_model() -> String {
    "jina-embeddings-v2-base-code".to_string()
}

/// Text-generation service settings (query enhancement + answer writing).
#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// `"disabled"` or `"gemini"`.
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_url")]
    pub url: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            url: default_generation_url(),
            model: default_generation_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_generation_provider() -> String {
    "disabled".to_string()
}
fn default_generation_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}
fn default_generation_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Retrieval tuning knobs.
///
/// The boost multipliers, threshold factors, and budget formulas are
/// empirically chosen defaults carried over from production tuning; they are
/// configuration, not correctness invariants.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Default result count when neither the caller nor the analyzer asks
    /// for more.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Extra results requested per lookup beyond the top-k budget.
    #[serde(default = "default_margin")]
    pub margin: usize,
    /// Minimum result count requested from the code collection.
    #[serde(default = "default_code_floor")]
    pub code_floor: usize,
    /// Worker-pool bound for per-topic fan-out searches.
    #[serde(default = "default_max_concurrent_topics")]
    pub max_concurrent_topics: usize,
    /// Overall deadline for one retrieval request, in seconds. Branches
    /// still outstanding when it elapses are dropped, not awaited.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
    /// Relevance floor on `1/(1+distance)` similarity.
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f32,
    /// Code hits use `code_threshold_factor * relevance_threshold`.
    #[serde(default = "default_code_threshold_factor")]
    pub code_threshold_factor: f32,
    /// Floor factor for the install-keyword rescue.
    #[serde(default = "default_install_rescue_factor")]
    pub install_rescue_factor: f32,
    /// Floor factor for the keyword-match rescue.
    #[serde(default = "default_keyword_rescue_factor")]
    pub keyword_rescue_factor: f32,
    /// Hits with trimmed content shorter than this are dropped.
    #[serde(default = "default_min_content_len")]
    pub min_content_len: usize,
    /// Context chunk cap for single-topic plans.
    #[serde(default = "default_context_max_chunks")]
    pub context_max_chunks: usize,
    /// Context chunk cap when the plan fanned out over multiple topics.
    #[serde(default = "default_context_max_chunks_fanout")]
    pub context_max_chunks_fanout: usize,
    /// Hard character budget for the assembled context block.
    #[serde(default = "default_context_max_chars")]
    pub context_max_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            margin: default_margin(),
            code_floor: default_code_floor(),
            max_concurrent_topics: default_max_concurrent_topics(),
            deadline_secs: default_deadline_secs(),
            relevance_threshold: default_relevance_threshold(),
            code_threshold_factor: default_code_threshold_factor(),
            install_rescue_factor: default_install_rescue_factor(),
            keyword_rescue_factor: default_keyword_rescue_factor(),
            min_content_len: default_min_content_len(),
            context_max_chunks: default_context_max_chunks(),
            context_max_chunks_fanout: default_context_max_chunks_fanout(),
            context_max_chars: default_context_max_chars(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_margin() -> usize {
    5
}
fn default_code_floor() -> usize {
    15
}
fn default_max_concurrent_topics() -> usize {
    4
}
fn default_deadline_secs() -> u64 {
    30
}
fn default_relevance_threshold() -> f32 {
    0.3
}
fn default_code_threshold_factor() -> f32 {
    0.8
}
fn default_install_rescue_factor() -> f32 {
    0.7
}
fn default_keyword_rescue_factor() -> f32 {
    0.6
}
fn default_min_content_len() -> usize {
    10
}
fn default_context_max_chunks() -> usize {
    5
}
fn default_context_max_chunks_fanout() -> usize {
    10
}
fn default_context_max_chars() -> usize {
    12_000
}

impl RetrievalConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

/// Result-cache settings for the request layer.
#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            capacity: default_cache_capacity(),
        }
    }
}

fn default_cache_enabled() -> bool {
    true
}
fn default_cache_capacity() -> usize {
    100
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if !(0.0..=1.0).contains(&config.retrieval.relevance_threshold) {
        anyhow::bail!("retrieval.relevance_threshold must be in [0.0, 1.0]");
    }

    for (name, factor) in [
        ("code_threshold_factor", config.retrieval.code_threshold_factor),
        ("install_rescue_factor", config.retrieval.install_rescue_factor),
        ("keyword_rescue_factor", config.retrieval.keyword_rescue_factor),
    ] {
        if !(0.0..=1.0).contains(&factor) {
            anyhow::bail!("retrieval.{} must be in [0.0, 1.0]", name);
        }
    }

    if config.retrieval.max_concurrent_topics == 0 {
        anyhow::bail!("retrieval.max_concurrent_topics must be >= 1");
    }

    if config.retrieval.deadline_secs == 0 {
        anyhow::bail!("retrieval.deadline_secs must be >= 1");
    }

    match config.generation.provider.as_str() {
        "disabled" | "gemini" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled or gemini.",
            other
        ),
    }

    if let Some(0) = config.embedding.prose_dims {
        anyhow::bail!("embedding.prose_dims must be > 0 when set");
    }
    if let Some(0) = config.embedding.code_dims {
        anyhow::bail!("embedding.code_dims must be > 0 when set");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.retrieval.relevance_threshold, 0.3);
        assert_eq!(config.vector_store.prose_collection, "text_chunks");
        assert_eq!(config.vector_store.code_collection, "code_chunks");
        assert!(!config.generation.is_enabled());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [retrieval]
            top_k = 8
            relevance_threshold = 0.2
            "#,
        )
        .unwrap();
        assert_eq!(config.retrieval.top_k, 8);
        assert_eq!(config.retrieval.relevance_threshold, 0.2);
        assert_eq!(config.retrieval.margin, 5);
        assert_eq!(config.retrieval.context_max_chunks_fanout, 10);
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let config: Config = toml::from_str(
            r#"
            [retrieval]
            relevance_threshold = 1.5
            "#,
        )
        .unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_unknown_generation_provider() {
        let config: Config = toml::from_str(
            r#"
            [generation]
            provider = "openai"
            "#,
        )
        .unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn load_config_reports_missing_file() {
        let err = load_config(Path::new("/nonexistent/ragdocs.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn load_config_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ragdocs.toml");
        std::fs::write(
            &path,
            r#"
            [vector_store]
            url = "http://qdrant:6333"

            [retrieval]
            top_k = 10
            "#,
        )
        .unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.vector_store.url, "http://qdrant:6333");
        assert_eq!(config.retrieval.top_k, 10);
    }
}
