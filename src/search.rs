//! Collection search fan-out: execute a query plan against the vector store.
//!
//! One plan becomes one or many lookup pairs. Without fan-out, the enhanced
//! query is embedded once and the prose and code collections are searched
//! concurrently. With fan-out, every required sub-topic gets its own
//! embed-and-search branch; branches run concurrently under a semaphore
//! bound so a many-topic plan cannot stampede the vector store.
//!
//! Failures stay local to their branch; an embedding failure, a missing
//! collection, or a timed-out lookup degrades to an empty partial result
//! while sibling branches proceed. Results are collected in branch order,
//! giving the ranking stage a deterministic discovery order regardless of
//! which branch finished first.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::{timeout, Instant};

use crate::config::{RetrievalConfig, VectorStoreConfig};
use crate::embedding::{embed_dual, EmbeddingService};
use crate::models::{Collection, QueryPlan, QueryType, ScoredHit};
use crate::store::VectorStore;

/// Trigger words indicating the code collection is worth searching.
const CODE_TRIGGERS: &[&str] = &[
    "code", "example", "snippet", "function", "class", "method", "api", "endpoint",
    "implementation", "syntax", "import", "install", "what is",
];

/// Everything one search run needs, borrowed from the engine.
pub struct SearchContext<'a> {
    pub store: &'a dyn VectorStore,
    pub embedder: &'a dyn EmbeddingService,
    pub retrieval: &'a RetrievalConfig,
    pub collections: &'a VectorStoreConfig,
}

impl SearchContext<'_> {
    /// Execute the plan and return the merged raw hit set.
    pub async fn run(
        &self,
        plan: &QueryPlan,
        raw_query: &str,
        doc_id: Option<&str>,
        top_k: usize,
    ) -> Vec<ScoredHit> {
        let deadline = Instant::now() + self.retrieval.deadline();
        let want_code = code_relevant(plan);

        if plan.fan_out && plan.topics.len() > 1 {
            self.fan_out(plan, raw_query, doc_id, top_k, want_code, deadline)
                .await
        } else {
            let prose_budget = top_k + self.retrieval.margin;
            let code_budget = (top_k + self.retrieval.margin).max(self.retrieval.code_floor);
            self.search_one(
                &plan.enhanced_query,
                doc_id,
                want_code,
                prose_budget,
                code_budget,
                deadline,
            )
            .await
        }
    }

    /// One embed-and-search branch per required sub-topic, bounded by a
    /// fixed-size worker pool.
    async fn fan_out(
        &self,
        plan: &QueryPlan,
        raw_query: &str,
        doc_id: Option<&str>,
        top_k: usize,
        want_code: bool,
        deadline: Instant,
    ) -> Vec<ScoredHit> {
        let topic_count = plan.topics.len();
        let budget = top_k.div_ceil(topic_count) + self.retrieval.margin;
        let pool = Arc::new(Semaphore::new(self.retrieval.max_concurrent_topics));

        let branches = plan.topics.iter().map(|topic| {
            let pool = pool.clone();
            let search_text = format!("{} {}", topic, raw_query);
            async move {
                let _permit = match pool.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return Vec::new(),
                };
                tracing::debug!(topic = %topic, budget, "searching sub-topic");
                self.search_one(&search_text, doc_id, want_code, budget, budget, deadline)
                    .await
            }
        });

        // join_all returns branch results in topic order regardless of
        // completion order, which keeps discovery order deterministic.
        join_all(branches).await.into_iter().flatten().collect()
    }

    /// Embed one search string and look it up in both collections.
    async fn search_one(
        &self,
        search_text: &str,
        doc_id: Option<&str>,
        want_code: bool,
        prose_budget: usize,
        code_budget: usize,
        deadline: Instant,
    ) -> Vec<ScoredHit> {
        let Some(remaining) = remaining_time(deadline) else {
            tracing::warn!("request deadline elapsed before embedding");
            return Vec::new();
        };

        let dual = match timeout(remaining, embed_dual(self.embedder, search_text, want_code)).await
        {
            Ok(dual) => dual,
            Err(_) => {
                tracing::warn!("embedding timed out, skipping branch");
                return Vec::new();
            }
        };

        if dual.is_empty() {
            return Vec::new();
        }

        let prose = async {
            match &dual.prose {
                Some(vector) => {
                    self.lookup(
                        &self.collections.prose_collection,
                        vector,
                        doc_id,
                        prose_budget,
                        Collection::Prose,
                        deadline,
                    )
                    .await
                }
                None => Vec::new(),
            }
        };
        let code = async {
            match &dual.code {
                Some(vector) => {
                    self.lookup(
                        &self.collections.code_collection,
                        vector,
                        doc_id,
                        code_budget,
                        Collection::Code,
                        deadline,
                    )
                    .await
                }
                None => Vec::new(),
            }
        };

        let (mut hits, code_hits) = tokio::join!(prose, code);
        hits.extend(code_hits);
        hits
    }

    /// One collection lookup: lazily provision, then search, under the
    /// remaining deadline. Every failure mode degrades to an empty result.
    async fn lookup(
        &self,
        collection: &str,
        vector: &[f32],
        doc_id: Option<&str>,
        limit: usize,
        tag: Collection,
        deadline: Instant,
    ) -> Vec<ScoredHit> {
        let Some(remaining) = remaining_time(deadline) else {
            tracing::warn!(collection, "request deadline elapsed before lookup");
            return Vec::new();
        };

        let result = timeout(remaining, async {
            // The vector's own length is the collection's dimensionality.
            self.store.ensure_collection(collection, vector.len()).await?;
            self.store.search(collection, vector, doc_id, limit).await
        })
        .await;

        match result {
            Ok(Ok(store_hits)) => {
                tracing::debug!(collection, count = store_hits.len(), "lookup returned");
                store_hits
                    .into_iter()
                    .map(|h| ScoredHit {
                        chunk: h.chunk,
                        distance: h.distance,
                        collection: tag,
                    })
                    .collect()
            }
            Ok(Err(err)) => {
                tracing::warn!(collection, error = %err, "lookup failed");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(collection, "lookup timed out");
                Vec::new()
            }
        }
    }
}

/// Deterministic predicate: does this plan warrant searching code chunks?
fn code_relevant(plan: &QueryPlan) -> bool {
    if matches!(
        plan.query_type,
        QueryType::Example | QueryType::HowTo | QueryType::MultiStep
    ) {
        return true;
    }

    let query = plan.enhanced_query.to_lowercase();
    if CODE_TRIGGERS.iter().any(|t| query.contains(t)) {
        return true;
    }

    plan.keywords
        .iter()
        .any(|k| CODE_TRIGGERS.contains(&k.to_lowercase().as_str()))
}

fn remaining_time(deadline: Instant) -> Option<Duration> {
    let now = Instant::now();
    if now >= deadline {
        None
    } else {
        Some(deadline - now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ChunkKind};
    use crate::store::{MemoryStore, StoreHit};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn make_chunk(id: &str, kind: ChunkKind, content: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            doc_id: "d1".to_string(),
            source_file: "doc.md".to_string(),
            start: 0,
            end: content.len(),
            kind,
            heading: None,
            language: None,
            content: content.to_string(),
        }
    }

    fn make_plan(query_type: QueryType, enhanced: &str) -> QueryPlan {
        QueryPlan {
            enhanced_query: enhanced.to_string(),
            keywords: Vec::new(),
            topics: Vec::new(),
            query_type,
            top_k: 5,
            fan_out: false,
        }
    }

    struct StubEmbedder {
        fail_code: bool,
        delay: Option<Duration>,
    }

    impl StubEmbedder {
        fn new() -> Self {
            Self { fail_code: false, delay: None }
        }
    }

    #[async_trait]
    impl EmbeddingService for StubEmbedder {
        async fn embed_prose(&self, _text: &str) -> Result<Vec<f32>> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(vec![1.0, 0.0])
        }
        async fn embed_code(&self, _text: &str) -> Result<Vec<f32>> {
            if self.fail_code {
                anyhow::bail!("code space down")
            }
            Ok(vec![0.0, 1.0])
        }
        async fn prose_dim(&self) -> Result<usize> {
            Ok(2)
        }
        async fn code_dim(&self) -> Result<usize> {
            Ok(2)
        }
    }

    /// Store wrapper that records every search call.
    struct CountingStore {
        inner: MemoryStore,
        calls: Mutex<Vec<(String, usize)>>,
    }

    impl CountingStore {
        fn new(inner: MemoryStore) -> Self {
            Self { inner, calls: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl VectorStore for CountingStore {
        async fn ensure_collection(&self, collection: &str, dim: usize) -> Result<()> {
            self.inner.ensure_collection(collection, dim).await
        }
        async fn search(
            &self,
            collection: &str,
            vector: &[f32],
            doc_id: Option<&str>,
            limit: usize,
        ) -> Result<Vec<StoreHit>> {
            self.calls.lock().unwrap().push((collection.to_string(), limit));
            self.inner.search(collection, vector, doc_id, limit).await
        }
        async fn scroll(
            &self,
            collection: &str,
            doc_id: Option<&str>,
            limit: usize,
        ) -> Result<Vec<Chunk>> {
            self.inner.scroll(collection, doc_id, limit).await
        }
    }

    fn retrieval_config() -> RetrievalConfig {
        RetrievalConfig::default()
    }

    fn store_config() -> VectorStoreConfig {
        VectorStoreConfig::default()
    }

    #[tokio::test]
    async fn prose_only_for_non_code_query() {
        let store = CountingStore::new(MemoryStore::new());
        store.inner.insert(
            "text_chunks",
            vec![1.0, 0.0],
            make_chunk("p1", ChunkKind::Prose, "deployment overview text"),
        );
        let embedder = StubEmbedder::new();
        let retrieval = retrieval_config();
        let collections = store_config();
        let ctx = SearchContext {
            store: &store,
            embedder: &embedder,
            retrieval: &retrieval,
            collections: &collections,
        };

        let plan = make_plan(QueryType::General, "deployment overview");
        let hits = ctx.run(&plan, "deployment overview", None, 5).await;

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].collection, Collection::Prose);
        let calls = store.calls.lock().unwrap();
        assert_eq!(calls.len(), 1, "code lookup must be skipped");
        assert_eq!(calls[0], ("text_chunks".to_string(), 10));
    }

    #[tokio::test]
    async fn code_query_searches_both_collections() {
        let store = CountingStore::new(MemoryStore::new());
        let embedder = StubEmbedder::new();
        let retrieval = retrieval_config();
        let collections = store_config();
        let ctx = SearchContext {
            store: &store,
            embedder: &embedder,
            retrieval: &retrieval,
            collections: &collections,
        };

        let plan = make_plan(QueryType::Example, "show me an example");
        ctx.run(&plan, "show me an example", None, 5).await;

        let calls = store.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        // top_k + margin = 10 for prose; code floor lifts code to 15.
        assert!(calls.iter().any(|c| c == &("text_chunks".to_string(), 10)));
        assert!(calls.iter().any(|c| c == &("code_chunks".to_string(), 15)));
    }

    #[tokio::test]
    async fn fan_out_issues_one_lookup_pair_per_topic() {
        let store = CountingStore::new(MemoryStore::new());
        let embedder = StubEmbedder::new();
        let retrieval = retrieval_config();
        let collections = store_config();
        let ctx = SearchContext {
            store: &store,
            embedder: &embedder,
            retrieval: &retrieval,
            collections: &collections,
        };

        let mut plan = make_plan(QueryType::MultiStep, "create and charge");
        plan.fan_out = true;
        plan.topics = vec![
            "customer creation".to_string(),
            "payment charging".to_string(),
            "error handling".to_string(),
        ];

        ctx.run(&plan, "create and charge", None, 9).await;

        let calls = store.calls.lock().unwrap();
        assert_eq!(calls.len(), 6, "three topics x two collections");
        // ceil(9 / 3) + margin = 8 for every lookup.
        assert!(calls.iter().all(|(_, limit)| *limit == 8));
    }

    #[tokio::test]
    async fn code_embedding_failure_degrades_to_prose_only() {
        let store = CountingStore::new(MemoryStore::new());
        store.inner.insert(
            "text_chunks",
            vec![1.0, 0.0],
            make_chunk("p1", ChunkKind::Prose, "example usage in prose"),
        );
        let embedder = StubEmbedder { fail_code: true, delay: None };
        let retrieval = retrieval_config();
        let collections = store_config();
        let ctx = SearchContext {
            store: &store,
            embedder: &embedder,
            retrieval: &retrieval,
            collections: &collections,
        };

        let plan = make_plan(QueryType::Example, "example usage");
        let hits = ctx.run(&plan, "example usage", None, 5).await;

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].collection, Collection::Prose);
        let calls = store.calls.lock().unwrap();
        assert_eq!(calls.len(), 1, "code collection skipped without a vector");
    }

    #[tokio::test]
    async fn empty_corpus_returns_empty_without_error() {
        let store = MemoryStore::new();
        let embedder = StubEmbedder::new();
        let retrieval = retrieval_config();
        let collections = store_config();
        let ctx = SearchContext {
            store: &store,
            embedder: &embedder,
            retrieval: &retrieval,
            collections: &collections,
        };

        let plan = make_plan(QueryType::General, "anything at all");
        let hits = ctx.run(&plan, "anything at all", None, 5).await;
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn lookups_provision_missing_collections() {
        let store = MemoryStore::new();
        let embedder = StubEmbedder::new();
        let retrieval = retrieval_config();
        let collections = store_config();
        let ctx = SearchContext {
            store: &store,
            embedder: &embedder,
            retrieval: &retrieval,
            collections: &collections,
        };

        let plan = make_plan(QueryType::Example, "code example");
        ctx.run(&plan, "code example", None, 5).await;
        assert_eq!(store.collection_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_deadline_yields_partial_results() {
        let store = CountingStore::new(MemoryStore::new());
        // Embedding takes longer than the whole request deadline.
        let embedder = StubEmbedder {
            fail_code: false,
            delay: Some(Duration::from_secs(120)),
        };
        let retrieval = retrieval_config();
        let collections = store_config();
        let ctx = SearchContext {
            store: &store,
            embedder: &embedder,
            retrieval: &retrieval,
            collections: &collections,
        };

        let plan = make_plan(QueryType::General, "slow query");
        let hits = ctx.run(&plan, "slow query", None, 5).await;

        assert!(hits.is_empty(), "deadline expiry degrades, never errors");
        assert!(store.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn discovery_order_follows_collection_order() {
        let store = MemoryStore::new();
        store.insert(
            "text_chunks",
            vec![1.0, 0.0],
            make_chunk("prose-hit", ChunkKind::Prose, "prose about examples"),
        );
        store.insert(
            "code_chunks",
            vec![0.0, 1.0],
            make_chunk("code-hit", ChunkKind::Code, "fn example() {}"),
        );
        let embedder = StubEmbedder::new();
        let retrieval = retrieval_config();
        let collections = store_config();
        let ctx = SearchContext {
            store: &store,
            embedder: &embedder,
            retrieval: &retrieval,
            collections: &collections,
        };

        let plan = make_plan(QueryType::Example, "example");
        let hits = ctx.run(&plan, "example", None, 5).await;

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.chunk_id, "prose-hit");
        assert_eq!(hits[1].chunk.chunk_id, "code-hit");
    }
}
