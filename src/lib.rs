//! # ragdocs
//!
//! A hybrid retrieval and ranking engine for answering natural-language
//! questions over an ingested documentation corpus.
//!
//! One query flows through a single pipeline: the analyzer turns it into a
//! plan (keywords, intent, sub-topics), the plan is embedded into two
//! independent vector spaces and fanned out across the prose and code
//! collections, the merged hits are boosted and filtered, and the surviving
//! evidence is assembled into a bounded context block for the answer writer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────────┐   ┌────────────┐
//! │ Analyzer │──▶│ Embed (x2)  │──▶│ Fan-out over │──▶│ Rank/Boost │
//! │ LLM+heur │   │ prose, code │   │ collections  │   │  + Filter  │
//! └──────────┘   └─────────────┘   └──────────────┘   └─────┬──────┘
//!                                                           ▼
//!                                              ┌─────────────────────┐
//!                                              │ Context → Answer    │
//!                                              └─────────────────────┘
//! ```
//!
//! The embedding model, vector index, and answer generator are external
//! collaborators behind narrow traits; every one of them may fail or time
//! out without failing the request; the pipeline degrades to partial
//! results, heuristic plans, and extract-style answers instead.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`analyze`] | Query analysis and planning |
//! | [`embedding`] | Dual-space embedding coordinator |
//! | [`store`] | Vector store trait and clients |
//! | [`search`] | Concurrent collection fan-out |
//! | [`rank`] | Boosting and deterministic ordering |
//! | [`select`] | Relevance filtering |
//! | [`context`] | Context assembly |
//! | [`generation`] | Query enhancement and answer writing |
//! | [`cache`] | LFU result cache for the request layer |
//! | [`pipeline`] | The engine tying it all together |

pub mod analyze;
pub mod cache;
pub mod config;
pub mod context;
pub mod embedding;
pub mod generation;
pub mod models;
pub mod pipeline;
pub mod rank;
pub mod search;
pub mod select;
pub mod store;

pub use config::{load_config, Config};
pub use models::{Chunk, ChunkKind, EvidenceSet, Query, QueryOutcome, QueryPlan, QueryType};
pub use pipeline::RetrievalEngine;
