//! Text-generation service abstraction and implementations.
//!
//! Two call sites use this service: the query analyzer asks it to enhance a
//! query into a structured retrieval plan, and the pipeline asks it to write
//! the final answer from the assembled context. Both are best-effort; every
//! caller has a deterministic fallback, so failures here never fail a request.
//!
//! Implementations:
//! - **[`DisabledGenerator`]**: returns errors / `None`; used when no
//!   provider is configured. The pipeline then falls back to heuristic plans
//!   and extract-style answers.
//! - **[`GeminiGenerator`]**: calls a `generateContent`-style REST endpoint
//!   with bounded retry and exponential backoff.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::models::SourceRef;

/// External text-generation collaborator.
#[async_trait]
pub trait TextGenService: Send + Sync {
    /// Ask the model to rewrite the query into a structured retrieval plan.
    ///
    /// Returns the model's raw text; the analyzer is responsible for
    /// extracting JSON from it and backfilling anything malformed.
    async fn enhance(&self, query: &str) -> Result<String>;

    /// Write an answer from the retrieved context. `None` on any failure;
    /// callers fall back to [`format_basic_answer`].
    async fn generate_answer(&self, query: &str, context: &str) -> Option<String>;

    fn is_enabled(&self) -> bool {
        true
    }
}

/// No-op generator used when `generation.provider = "disabled"`.
pub struct DisabledGenerator;

#[async_trait]
impl TextGenService for DisabledGenerator {
    async fn enhance(&self, _query: &str) -> Result<String> {
        bail!("Text generation is disabled")
    }

    async fn generate_answer(&self, _query: &str, _context: &str) -> Option<String> {
        None
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Generator backed by a Gemini-style `generateContent` REST endpoint.
pub struct GeminiGenerator {
    url: String,
    model: String,
    api_key: String,
    timeout_secs: u64,
    max_retries: u32,
}

impl GeminiGenerator {
    /// Create a generator from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key environment variable is not set.
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", config.api_key_env))?;

        Ok(Self {
            url: config.url.clone(),
            model: config.model.clone(),
            api_key,
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        })
    }

    /// Call `generateContent` with retry/backoff and return the first
    /// candidate's text.
    ///
    /// Retry strategy mirrors the other collaborator clients:
    /// - HTTP 429 or 5xx → retry with exponential backoff
    /// - other 4xx → fail immediately
    /// - network error → retry
    async fn generate(&self, prompt: &str) -> Result<String> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?;

        let endpoint = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.url, self.model, self.api_key
        );

        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": 0.3,
                "topP": 0.8,
                "maxOutputTokens": 2048,
            },
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client.post(&endpoint).json(&body).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_generate_response(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "Generation API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Generation API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Generation failed after retries")))
    }
}

#[async_trait]
impl TextGenService for GeminiGenerator {
    async fn enhance(&self, query: &str) -> Result<String> {
        self.generate(&enhancement_prompt(query)).await
    }

    async fn generate_answer(&self, query: &str, context: &str) -> Option<String> {
        match self.generate(&answer_prompt(query, context)).await {
            Ok(text) => Some(text),
            Err(err) => {
                tracing::warn!(error = %err, "answer generation failed, using basic formatting");
                None
            }
        }
    }
}

/// Extract `candidates[0].content.parts[0].text` from a response.
fn parse_generate_response(json: &serde_json::Value) -> Result<String> {
    json.get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.pointer("/content/parts/0/text"))
        .and_then(|t| t.as_str())
        .map(|t| t.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid generation response: missing candidate text"))
}

/// Prompt asking the model to turn a query into a structured retrieval plan.
fn enhancement_prompt(query: &str) -> String {
    format!(
        r#"You are a query enhancement system for a documentation question-answering service.
Analyze the user query and decide how to retrieve information from the documentation corpus.

Original Query: "{query}"

Provide:
1. An enhanced/rewritten query that works better for semantic search
2. Key keywords and important terms
3. Main concepts to search for
4. Query type (definition, how-to, example, comparison, troubleshooting, multi-step, general)
5. REQUIRED TOPICS: distinct topics/sections that must each be retrieved
   (e.g. ["customer creation", "payment charging", "error handling"])
6. RECOMMENDED_TOP_K: chunks to fetch (default 5; raise it when several topics are needed)
7. MULTI_QUERY_NEEDED: whether separate targeted searches per topic are needed (true/false)

Consider:
- "what is X?" queries also match "X definition", "X overview", "X introduction"
- "how to" queries also match "steps", "tutorial", "guide", "example"
- queries combining several actions (e.g. "create a customer AND charge them") need multiple topics

Respond in JSON:
{{
    "enhanced_query": "rewritten query",
    "keywords": ["key", "terms"],
    "concepts": ["main", "concepts"],
    "query_type": "definition|how-to|example|comparison|troubleshooting|multi-step|general",
    "required_topics": ["topic1", "topic2"],
    "recommended_top_k": 5,
    "multi_query_needed": false
}}

Be concise. Focus on terms that improve vector search."#
    )
}

/// Prompt asking the model to answer from the assembled context only.
fn answer_prompt(query: &str, context: &str) -> String {
    format!(
        r#"You are a helpful documentation assistant. Answer the user's question based on the provided context.

Context from documentation:

{context}

User Question: {query}

Instructions:
- FIRST look for explicit definitions or explanations in the context (headings like "What is X?", "Introduction", "Overview")
- Answer strictly from the context; if it lacks the information, say so clearly
- Include code examples from the context using markdown code blocks with language identifiers
- Be concise but complete

Answer:"#
    )
}

/// Fallback answer when no generator is available: an extract of the top
/// sources, code fenced by language.
pub fn format_basic_answer(sources: &[SourceRef]) -> String {
    let mut parts = vec!["Based on the retrieved documentation:\n".to_string()];

    for (i, source) in sources.iter().take(3).enumerate() {
        let heading = source.heading.as_deref().unwrap_or("Document");
        parts.push(format!("\n**Source {}** ({}):", i + 1, heading));

        if source.kind == crate::models::ChunkKind::Code {
            let language = source.language.as_deref().unwrap_or("");
            parts.push(format!("```{}\n{}\n```", language, source.content));
        } else if source.content.len() > 300 {
            let cut: String = source.content.chars().take(300).collect();
            parts.push(format!("{}...", cut));
        } else {
            parts.push(source.content.clone());
        }
    }

    parts.join("\n")
}
