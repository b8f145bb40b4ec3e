//! Core data models used throughout ragdocs.
//!
//! These types represent the chunks, query plans, and scored results that flow
//! through the retrieval pipeline, from query analysis to context assembly.

use serde::{Deserialize, Serialize};

/// Whether a chunk holds prose or code.
///
/// The two kinds live in separate vector collections and are embedded with
/// different models, so the distinction follows a chunk everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    #[serde(alias = "text")]
    Prose,
    Code,
}

/// A retrieval unit: one contiguous fragment of an ingested document.
///
/// Chunks are owned by the corpus store; the engine only sees them inside
/// search results. `chunk_id` is unique within a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub source_file: String,
    pub start: usize,
    pub end: usize,
    #[serde(rename = "type")]
    pub kind: ChunkKind,
    #[serde(default)]
    pub heading: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    pub content: String,
}

/// The vector collection a hit was retrieved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Collection {
    Prose,
    Code,
}

/// A raw hit from a single collection lookup.
///
/// `distance` is what the vector store reported: non-negative, smaller is
/// more similar. Ranking multiplies it by boost factors; the selector
/// converts it to a similarity only at the very end.
#[derive(Debug, Clone)]
pub struct ScoredHit {
    pub chunk: Chunk,
    pub distance: f32,
    pub collection: Collection,
}

/// Closed set of query intents the analyzer can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryType {
    Definition,
    HowTo,
    Example,
    Comparison,
    Troubleshooting,
    MultiStep,
    General,
}

impl QueryType {
    /// Parse the analyzer's wire form (`"how-to"`, `"multi-step"`, ...).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "definition" => Some(Self::Definition),
            "how-to" | "howto" => Some(Self::HowTo),
            "example" => Some(Self::Example),
            "comparison" => Some(Self::Comparison),
            "troubleshooting" => Some(Self::Troubleshooting),
            "multi-step" | "multistep" => Some(Self::MultiStep),
            "general" => Some(Self::General),
            _ => None,
        }
    }
}

/// The immutable input to one retrieval request.
#[derive(Debug, Clone)]
pub struct Query {
    pub text: String,
    /// Restrict retrieval to a single document when set.
    pub doc_id: Option<String>,
    pub top_k: usize,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            doc_id: None,
            top_k: 5,
        }
    }
}

/// Derived, read-only plan for executing one query.
///
/// Produced once by the analyzer and never mutated afterward. When `fan_out`
/// is false the whole query counts as the single conceptual topic.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    /// Search string combining the rewritten query with top keywords.
    pub enhanced_query: String,
    /// Unique search keywords; order carries no meaning.
    pub keywords: Vec<String>,
    /// Ordered sub-topics that each need their own lookup pair.
    pub topics: Vec<String>,
    pub query_type: QueryType,
    /// How many chunks the analyzer recommends retrieving.
    pub top_k: usize,
    /// Issue one lookup pair per topic instead of a single pair.
    pub fan_out: bool,
}

/// A hit that survived selection, carrying its final similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceHit {
    pub chunk: Chunk,
    /// `1 / (1 + distance)`, always in `(0, 1]`.
    pub similarity: f32,
    pub collection: Collection,
}

/// User-facing message returned when filtering leaves nothing behind.
pub const INSUFFICIENT_EVIDENCE: &str =
    "No relevant information was found in the ingested documents. \
     Try rephrasing the question or ingesting more documentation.";

/// The filtered, ordered evidence handed to the answer writer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvidenceSet {
    pub hits: Vec<EvidenceHit>,
    /// The literal context block sent to the generator. Empty until the
    /// assembler fills it in.
    pub context: String,
}

impl EvidenceSet {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// One source entry surfaced to the caller alongside the answer.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub chunk_id: String,
    pub doc_id: String,
    pub source_file: String,
    pub heading: Option<String>,
    pub kind: ChunkKind,
    pub language: Option<String>,
    pub relevance_score: f32,
    pub content: String,
}

impl From<&EvidenceHit> for SourceRef {
    fn from(hit: &EvidenceHit) -> Self {
        Self {
            chunk_id: hit.chunk.chunk_id.clone(),
            doc_id: hit.chunk.doc_id.clone(),
            source_file: hit.chunk.source_file.clone(),
            heading: hit.chunk.heading.clone(),
            kind: hit.chunk.kind,
            language: hit.chunk.language.clone(),
            relevance_score: hit.similarity,
            content: hit.chunk.content.clone(),
        }
    }
}

/// Terminal result of one request: answer plus the evidence behind it.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    /// The context chunks that were actually sent to the generator.
    pub context_used: Vec<String>,
}
