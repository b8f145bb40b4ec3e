//! The retrieval pipeline, end to end.
//!
//! [`RetrievalEngine`] owns its collaborators; vector store, embedding
//! service, text generator; as injected dependencies with an explicit
//! construction and provisioning lifecycle; there are no process-wide
//! singletons. One call to [`RetrievalEngine::answer`] runs the whole chain:
//!
//! ```text
//! analyze → search fan-out → rank/boost → select/filter → assemble → answer
//! ```
//!
//! Nothing in the pipeline is fatal to a request. Degraded collaborators
//! shrink the hit set; an empty evidence set becomes the fixed
//! insufficient-evidence outcome rather than an error.

use std::sync::Arc;

use anyhow::Result;

use crate::analyze;
use crate::config::Config;
use crate::context;
use crate::embedding::{EmbeddingService, HttpEmbeddingService};
use crate::generation::{format_basic_answer, DisabledGenerator, GeminiGenerator, TextGenService};
use crate::models::{
    EvidenceSet, Query, QueryOutcome, QueryPlan, SourceRef, INSUFFICIENT_EVIDENCE,
};
use crate::rank;
use crate::search::SearchContext;
use crate::select;
use crate::store::{QdrantStore, VectorStore};

/// The hybrid retrieval and ranking engine.
pub struct RetrievalEngine {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingService>,
    generator: Arc<dyn TextGenService>,
    config: Config,
}

impl RetrievalEngine {
    /// Assemble an engine from explicit collaborators.
    pub fn new(
        config: Config,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingService>,
        generator: Arc<dyn TextGenService>,
    ) -> Self {
        Self {
            store,
            embedder,
            generator,
            config,
        }
    }

    /// Build an engine with the HTTP collaborators named in the config.
    ///
    /// A generation provider that cannot initialize (typically a missing API
    /// key) downgrades to disabled with a warning rather than failing;
    /// heuristic plans and extract answers keep the engine usable.
    pub fn from_config(config: Config) -> Result<Self> {
        let store = Arc::new(QdrantStore::new(config.vector_store.clone())?);
        let embedder = Arc::new(HttpEmbeddingService::new(config.embedding.clone()));

        let generator: Arc<dyn TextGenService> = if config.generation.is_enabled() {
            match GeminiGenerator::new(&config.generation) {
                Ok(generator) => Arc::new(generator),
                Err(err) => {
                    tracing::warn!(error = %err, "generation disabled, falling back to heuristics");
                    Arc::new(DisabledGenerator)
                }
            }
        } else {
            Arc::new(DisabledGenerator)
        };

        Ok(Self::new(config, store, embedder, generator))
    }

    /// Provision both collections with their embedding dimensionalities.
    ///
    /// Optional: lookups also provision lazily on first use. Calling this at
    /// startup surfaces store/embedder misconfiguration early.
    pub async fn ensure_collections(&self) -> Result<()> {
        let prose_dim = self.embedder.prose_dim().await?;
        self.store
            .ensure_collection(&self.config.vector_store.prose_collection, prose_dim)
            .await?;

        let code_dim = self.embedder.code_dim().await?;
        self.store
            .ensure_collection(&self.config.vector_store.code_collection, code_dim)
            .await?;

        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run retrieval only: plan the query, gather and rank hits, filter
    /// them, and assemble the context block.
    pub async fn retrieve(&self, query: &Query) -> (QueryPlan, EvidenceSet) {
        let plan = analyze::analyze(
            self.generator.as_ref(),
            &query.text,
            self.config.retrieval.top_k,
        )
        .await;
        tracing::debug!(
            query_type = ?plan.query_type,
            topics = plan.topics.len(),
            fan_out = plan.fan_out,
            "query analyzed"
        );

        // The caller's ask and the analyzer's recommendation both set a
        // floor on how much to retrieve.
        let top_k = query.top_k.max(plan.top_k);

        let search = SearchContext {
            store: self.store.as_ref(),
            embedder: self.embedder.as_ref(),
            retrieval: &self.config.retrieval,
            collections: &self.config.vector_store,
        };
        let hits = search
            .run(&plan, &query.text, query.doc_id.as_deref(), top_k)
            .await;
        tracing::debug!(count = hits.len(), "raw hits gathered");

        let ranked = rank::rank(hits, &plan, &query.text, top_k);
        let mut evidence = select::select(&ranked, &plan, &query.text, &self.config.retrieval);
        evidence.context = context::assemble(&evidence.hits, &plan, &self.config.retrieval);

        (plan, evidence)
    }

    /// Answer a question: retrieve evidence, then write (or fall back to
    /// formatting) an answer from it.
    pub async fn answer(&self, query: &Query) -> QueryOutcome {
        let (plan, evidence) = self.retrieve(query).await;

        if evidence.is_empty() {
            tracing::debug!("no evidence survived filtering");
            return QueryOutcome {
                answer: INSUFFICIENT_EVIDENCE.to_string(),
                sources: Vec::new(),
                context_used: Vec::new(),
            };
        }

        let sources: Vec<SourceRef> = evidence.hits.iter().map(SourceRef::from).collect();
        let context_used = context::assemble_parts(&evidence.hits, &plan, &self.config.retrieval);

        let answer = if self.generator.is_enabled() {
            match self
                .generator
                .generate_answer(&query.text, &evidence.context)
                .await
            {
                Some(text) => text,
                None => format_basic_answer(&sources),
            }
        } else {
            format_basic_answer(&sources)
        };

        QueryOutcome {
            answer,
            sources,
            context_used,
        }
    }
}
