//! Context assembly: render the evidence into the block sent to the
//! answer writer.
//!
//! Chunk count is capped by the plan shape; fan-out over several topics
//! earns a larger cap because each topic needs representation. The output is
//! the literal text the generator receives.

use crate::config::RetrievalConfig;
use crate::models::{EvidenceHit, QueryPlan};

/// Separator between rendered chunks.
pub const CHUNK_SEPARATOR: &str = "\n\n---\n\n";

/// Render one chunk: heading above content when a heading exists.
pub fn render_chunk(hit: &EvidenceHit) -> String {
    match hit.chunk.heading.as_deref().filter(|h| !h.trim().is_empty()) {
        Some(heading) => format!("{}\n{}", heading, hit.chunk.content),
        None => hit.chunk.content.clone(),
    }
}

/// Render the admitted chunks, capped by the plan shape and the character
/// budget.
pub fn assemble_parts(
    hits: &[EvidenceHit],
    plan: &QueryPlan,
    config: &RetrievalConfig,
) -> Vec<String> {
    let cap = if plan.fan_out && plan.topics.len() > 1 {
        config.context_max_chunks_fanout
    } else {
        config.context_max_chunks
    };

    let mut parts: Vec<String> = Vec::new();
    let mut used = 0usize;

    for hit in hits.iter().take(cap) {
        let part = render_chunk(hit);
        let cost = part.len() + if parts.is_empty() { 0 } else { CHUNK_SEPARATOR.len() };
        if used + cost > config.context_max_chars {
            break;
        }
        used += cost;
        parts.push(part);
    }

    parts
}

/// Assemble the bounded context block from the selected evidence.
pub fn assemble(hits: &[EvidenceHit], plan: &QueryPlan, config: &RetrievalConfig) -> String {
    assemble_parts(hits, plan, config).join(CHUNK_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ChunkKind, Collection, QueryType};

    fn make_hit(id: &str, heading: Option<&str>, content: &str) -> EvidenceHit {
        EvidenceHit {
            chunk: Chunk {
                chunk_id: id.to_string(),
                doc_id: "d1".to_string(),
                source_file: "doc.md".to_string(),
                start: 0,
                end: content.len(),
                kind: ChunkKind::Prose,
                heading: heading.map(|h| h.to_string()),
                language: None,
                content: content.to_string(),
            },
            similarity: 0.9,
            collection: Collection::Prose,
        }
    }

    fn make_plan(fan_out: bool, topics: usize) -> QueryPlan {
        QueryPlan {
            enhanced_query: String::new(),
            keywords: Vec::new(),
            topics: (0..topics).map(|i| format!("topic {}", i)).collect(),
            query_type: QueryType::General,
            top_k: 10,
            fan_out,
        }
    }

    #[test]
    fn heading_prefixes_content() {
        let hit = make_hit("c1", Some("## Install"), "pip install fastapi");
        assert_eq!(render_chunk(&hit), "## Install\npip install fastapi");
    }

    #[test]
    fn missing_heading_renders_raw_content() {
        let hit = make_hit("c1", None, "just content");
        assert_eq!(render_chunk(&hit), "just content");
        let blank = make_hit("c2", Some("  "), "still just content");
        assert_eq!(render_chunk(&blank), "still just content");
    }

    #[test]
    fn chunks_joined_with_separator() {
        let hits = vec![make_hit("a", None, "first"), make_hit("b", None, "second")];
        let context = assemble(&hits, &make_plan(false, 0), &RetrievalConfig::default());
        assert_eq!(context, "first\n\n---\n\nsecond");
    }

    #[test]
    fn single_topic_plans_cap_at_five() {
        let hits: Vec<EvidenceHit> = (0..12)
            .map(|i| make_hit(&format!("c{}", i), None, &format!("content {}", i)))
            .collect();
        let context = assemble(&hits, &make_plan(false, 0), &RetrievalConfig::default());
        assert_eq!(context.matches("---").count(), 4);
        assert!(context.contains("content 4"));
        assert!(!context.contains("content 5"));
    }

    #[test]
    fn fan_out_plans_cap_at_ten() {
        let hits: Vec<EvidenceHit> = (0..12)
            .map(|i| make_hit(&format!("c{}", i), None, &format!("content {}", i)))
            .collect();
        let context = assemble(&hits, &make_plan(true, 3), &RetrievalConfig::default());
        assert!(context.contains("content 9"));
        assert!(!context.contains("content 10"));
    }

    #[test]
    fn character_budget_bounds_the_context() {
        let config = RetrievalConfig {
            context_max_chars: 30,
            ..Default::default()
        };
        let hits = vec![
            make_hit("a", None, "twenty-eight characters long"),
            make_hit("b", None, "this chunk no longer fits in"),
        ];
        let context = assemble(&hits, &make_plan(false, 0), &config);
        assert!(context.len() <= 30);
        assert!(context.contains("twenty-eight"));
        assert!(!context.contains("no longer fits"));
    }

    #[test]
    fn empty_evidence_assembles_empty_context() {
        let context = assemble(&[], &make_plan(false, 0), &RetrievalConfig::default());
        assert!(context.is_empty());
    }
}
