//! Result selection: turn ranked hits into the final evidence set.
//!
//! This is a pure function over the ranked hits; no I/O, no failure modes.
//! Distances become similarities here (`1/(1+d)`), duplicates from separate
//! fan-out branches collapse to their first occurrence, short or empty
//! chunks are dropped, and a relevance floor is applied with two narrow
//! rescues for install snippets and strong keyword matches. Arrival order
//! from the ranking stage is preserved among survivors; an empty result is a
//! normal outcome, not an error.

use crate::config::RetrievalConfig;
use crate::models::{ChunkKind, EvidenceHit, EvidenceSet, QueryPlan, ScoredHit};
use crate::rank::{contains_install_indicator, count_matches, query_keywords};

/// Convert a raw distance to a similarity in `(0, 1]`.
pub fn distance_to_similarity(distance: f32) -> f32 {
    if distance > 0.0 {
        1.0 / (1.0 + distance)
    } else {
        1.0
    }
}

/// Filter ranked hits into an [`EvidenceSet`].
///
/// Running this twice over the same input yields an identical set. The
/// returned set's `context` is left empty; the assembler fills it in.
pub fn select(
    ranked: &[ScoredHit],
    plan: &QueryPlan,
    raw_query: &str,
    config: &RetrievalConfig,
) -> EvidenceSet {
    let keywords = query_keywords(plan, raw_query);
    let install_query = contains_install_indicator(raw_query);

    let mut seen = std::collections::HashSet::new();
    let mut hits = Vec::new();

    for hit in ranked {
        // The same chunk can arrive through several fan-out branches.
        if !seen.insert(hit.chunk.chunk_id.clone()) {
            continue;
        }

        let content = hit.chunk.content.trim();
        if content.is_empty() || content.len() < config.min_content_len {
            continue;
        }

        let similarity = distance_to_similarity(hit.distance);

        // Code similarity distributions run lower, so code hits get a
        // proportionally lower floor.
        let threshold = if hit.chunk.kind == ChunkKind::Code {
            config.relevance_threshold * config.code_threshold_factor
        } else {
            config.relevance_threshold
        };

        let admitted = if similarity >= threshold {
            true
        } else if install_query
            && hit.chunk.kind == ChunkKind::Code
            && contains_install_indicator(content)
        {
            similarity >= config.install_rescue_factor * threshold
        } else {
            let heading = hit.chunk.heading.as_deref().unwrap_or("");
            let lead: String = content.chars().take(200).collect();
            let matches = count_matches(heading, &keywords) + count_matches(&lead, &keywords);
            matches >= 2 && similarity >= config.keyword_rescue_factor * threshold
        };

        if admitted {
            hits.push(EvidenceHit {
                chunk: hit.chunk.clone(),
                similarity,
                collection: hit.collection,
            });
        } else {
            tracing::debug!(
                chunk_id = %hit.chunk.chunk_id,
                similarity,
                threshold,
                "dropping hit below relevance floor"
            );
        }
    }

    EvidenceSet {
        hits,
        context: String::new(),
    }
}
