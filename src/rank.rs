//! Ranking and boosting: merge raw hits into one deterministic order.
//!
//! Everything here works on raw distances (smaller is better); the
//! distance-to-similarity conversion happens later in selection. Boosts are
//! multiplicative and applied by a fixed precedence; the first matching rule
//! wins per hit; so the final order depends only on the hits, the plan, and
//! the query text, never on the arrival order of concurrent lookups.

use crate::analyze::STOP_WORDS;
use crate::models::{ChunkKind, QueryPlan, QueryType, ScoredHit};

/// Phrases that mark a definition-style question.
pub(crate) const DEFINITION_TRIGGERS: &[&str] =
    &["what is", "what are", "define", "explain", "describe"];

/// Heading markers for definition/introduction sections.
const DEFINITION_MARKERS: &[&str] = &["what is", "what are", "definition", "introduction", "overview"];

/// Keywords marking installation-oriented content.
pub(crate) const INSTALL_KEYWORDS: &[&str] =
    &["install", "pip install", "npm install", "cargo add", "setup", "requirements"];

/// Language tags recognizable in a query, mapped to chunk language tags.
const LANGUAGE_TAGS: &[&str] = &[
    "python", "javascript", "typescript", "rust", "golang", "java", "ruby", "php", "bash",
    "shell", "sql",
];

/// Rank hits by boosted distance and re-partition by type priority.
///
/// Returns at most `top_k` hits, ascending by transformed distance. The sort
/// is stable: hits with equal distance keep their discovery order.
pub fn rank(hits: Vec<ScoredHit>, plan: &QueryPlan, raw_query: &str, top_k: usize) -> Vec<ScoredHit> {
    let keywords = query_keywords(plan, raw_query);

    let mut boosted: Vec<ScoredHit> = hits
        .into_iter()
        .map(|mut hit| {
            hit.distance = boost_distance(&hit, &keywords, plan, raw_query);
            hit
        })
        .collect();

    boosted.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    if prioritize_code(plan, raw_query) {
        reorder_code_first(boosted, plan, raw_query, top_k)
    } else {
        boosted.truncate(top_k);
        boosted
    }
}

/// Union of the plan's keywords and significant raw-query words, lowercased
/// and deduplicated. Shared with selection's keyword-rescue rule.
pub(crate) fn query_keywords(plan: &QueryPlan, raw_query: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut keywords: Vec<String> = plan
        .keywords
        .iter()
        .map(|k| k.to_lowercase())
        .filter(|k| !k.is_empty() && seen.insert(k.clone()))
        .collect();

    keywords.extend(
        raw_query
            .to_lowercase()
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
            .filter(|w| w.len() > 3 && !STOP_WORDS.contains(&w.as_str()))
            .filter(|w| seen.insert(w.clone())),
    );

    keywords
}

/// Total occurrences of any keyword in `text` (already lowercased keywords).
pub(crate) fn count_matches(text: &str, keywords: &[String]) -> usize {
    let lower = text.to_lowercase();
    keywords.iter().map(|k| lower.matches(k.as_str()).count()).sum()
}

/// Whether the text carries an installation indicator.
pub(crate) fn contains_install_indicator(text: &str) -> bool {
    let lower = text.to_lowercase();
    INSTALL_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Apply the boost precedence to one hit and return its transformed distance.
fn boost_distance(
    hit: &ScoredHit,
    keywords: &[String],
    plan: &QueryPlan,
    raw_query: &str,
) -> f32 {
    let heading = hit.chunk.heading.as_deref().unwrap_or("");
    let lead: String = hit.chunk.content.chars().take(200).collect();

    let heading_matches = count_matches(heading, keywords);
    let content_matches = count_matches(&lead, keywords);

    // Rule 1: keyword match strength.
    if heading_matches >= 2 || (heading_matches >= 1 && content_matches >= 2) {
        return hit.distance * 0.1;
    }
    if heading_matches >= 1 || content_matches >= 2 {
        return hit.distance * 0.4;
    }
    if heading_matches + content_matches >= 1 {
        return hit.distance * 0.7;
    }

    // Rule 2: definition questions match definition headings even without
    // keyword overlap.
    let query_lower = raw_query.to_lowercase();
    let is_definition = plan.query_type == QueryType::Definition
        || DEFINITION_TRIGGERS.iter().any(|t| query_lower.contains(t));

    if is_definition {
        let topic = definition_topic(&query_lower);
        let heading_lower = heading.to_lowercase();
        if !topic.is_empty() && heading_lower.contains(&topic) {
            if DEFINITION_MARKERS.iter().any(|m| heading_lower.contains(m)) {
                return hit.distance * 0.1;
            }
            return hit.distance * 0.6;
        }
    }

    hit.distance
}

/// Strip definition trigger phrases and question marks to isolate the topic.
fn definition_topic(query_lower: &str) -> String {
    let mut topic = query_lower.to_string();
    for trigger in DEFINITION_TRIGGERS {
        topic = topic.replace(trigger, "");
    }
    topic.replace('?', "").trim().to_string()
}

/// Whether this plan wants code hits surfaced ahead of prose.
fn prioritize_code(plan: &QueryPlan, raw_query: &str) -> bool {
    matches!(
        plan.query_type,
        QueryType::MultiStep | QueryType::HowTo | QueryType::Example
    ) || raw_query.to_lowercase().contains("code")
}

/// Infer a target language from the query text, if it names one.
fn infer_language(raw_query: &str) -> Option<&'static str> {
    let lower = raw_query.to_lowercase();
    LANGUAGE_TAGS.iter().find(|tag| lower.contains(*tag)).copied()
}

/// Surface code hits before prose, topic by topic when the plan fanned out.
///
/// For each required sub-topic, up to three code hits mentioning the topic
/// label lead the output (hits in the query's target language first). The
/// remaining code hits follow, then prose, until `top_k` is filled. Without
/// fan-out, install-flavored queries pull install-indicator code hits to the
/// front of the code partition.
fn reorder_code_first(
    boosted: Vec<ScoredHit>,
    plan: &QueryPlan,
    raw_query: &str,
    top_k: usize,
) -> Vec<ScoredHit> {
    let (mut code, prose): (Vec<ScoredHit>, Vec<ScoredHit>) = boosted
        .into_iter()
        .partition(|h| h.chunk.kind == ChunkKind::Code);

    let mut result: Vec<ScoredHit> = Vec::new();

    if plan.fan_out && plan.topics.len() > 1 {
        let target_lang = infer_language(raw_query);

        for topic in &plan.topics {
            let topic_lower = topic.to_lowercase();
            let mut picked = 0usize;

            // Two passes: target-language hits outrank other languages.
            for lang_pass in [true, false] {
                if target_lang.is_none() && lang_pass {
                    continue;
                }
                let mut i = 0;
                while i < code.len() && picked < 3 {
                    let hit = &code[i];
                    let lang_ok = match (target_lang, lang_pass) {
                        (Some(lang), true) => {
                            hit.chunk.language.as_deref().map_or(false, |l| {
                                l.to_lowercase().contains(lang)
                            })
                        }
                        _ => true,
                    };
                    let mentions_topic = hit.chunk.content.to_lowercase().contains(&topic_lower)
                        || hit
                            .chunk
                            .heading
                            .as_deref()
                            .map_or(false, |h| h.to_lowercase().contains(&topic_lower));
                    if lang_ok && mentions_topic {
                        result.push(code.remove(i));
                        picked += 1;
                    } else {
                        i += 1;
                    }
                }
            }
        }
    } else if contains_install_indicator(raw_query) {
        // Installation how-to: install snippets lead the code partition.
        let (install_hits, other): (Vec<ScoredHit>, Vec<ScoredHit>) = code
            .into_iter()
            .partition(|h| contains_install_indicator(&h.chunk.content));
        result.extend(install_hits);
        code = other;
    }

    result.extend(code);
    result.extend(prose);
    result.truncate(top_k);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, Collection};

    fn make_hit(
        id: &str,
        kind: ChunkKind,
        heading: Option<&str>,
        content: &str,
        distance: f32,
    ) -> ScoredHit {
        ScoredHit {
            chunk: Chunk {
                chunk_id: id.to_string(),
                doc_id: "d1".to_string(),
                source_file: "doc.md".to_string(),
                start: 0,
                end: content.len(),
                kind,
                heading: heading.map(|h| h.to_string()),
                language: None,
                content: content.to_string(),
            },
            distance,
            collection: if kind == ChunkKind::Code {
                Collection::Code
            } else {
                Collection::Prose
            },
        }
    }

    fn make_plan(query_type: QueryType, keywords: &[&str]) -> QueryPlan {
        QueryPlan {
            enhanced_query: String::new(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            topics: Vec::new(),
            query_type,
            top_k: 10,
            fan_out: false,
        }
    }

    #[test]
    fn no_matches_leaves_distance_untouched() {
        let plan = make_plan(QueryType::General, &["kubernetes"]);
        let hits = vec![make_hit(
            "c1",
            ChunkKind::Prose,
            Some("Unrelated section"),
            "nothing relevant here at all",
            0.42,
        )];
        let ranked = rank(hits, &plan, "tell me about deployments", 10);
        assert!((ranked[0].distance - 0.42).abs() < 1e-6);
    }

    #[test]
    fn stable_sort_preserves_discovery_order_on_ties() {
        let plan = make_plan(QueryType::General, &[]);
        let hits = vec![
            make_hit("first", ChunkKind::Prose, None, "some content here", 0.5),
            make_hit("second", ChunkKind::Prose, None, "other content here", 0.5),
        ];
        let ranked = rank(hits, &plan, "unrelated", 10);
        assert_eq!(ranked[0].chunk.chunk_id, "first");
        assert_eq!(ranked[1].chunk.chunk_id, "second");
    }

    #[test]
    fn definition_heading_gets_strong_boost_and_ranks_first() {
        let plan = make_plan(QueryType::Definition, &["fastapi"]);
        let hits = vec![
            make_hit(
                "other",
                ChunkKind::Prose,
                Some("Deployment"),
                "deploying services to production",
                0.2,
            ),
            make_hit(
                "def",
                ChunkKind::Prose,
                Some("## What is FastAPI?"),
                "FastAPI is a modern web framework. FastAPI gives you type hints and speed.",
                0.5,
            ),
        ];
        let ranked = rank(hits, &plan, "What is FastAPI?", 10);
        // heading has one keyword match, content lead has two: x0.1
        assert_eq!(ranked[0].chunk.chunk_id, "def");
        assert!(ranked[0].distance <= 0.05 + 1e-6);
    }

    #[test]
    fn single_heading_match_gets_medium_boost() {
        let plan = make_plan(QueryType::General, &["fastapi"]);
        let hits = vec![make_hit(
            "c1",
            ChunkKind::Prose,
            Some("FastAPI deployment"),
            "run the server with uvicorn",
            0.5,
        )];
        let ranked = rank(hits, &plan, "deploying the app", 10);
        assert!((ranked[0].distance - 0.2).abs() < 1e-6);
    }

    #[test]
    fn weak_match_gets_small_boost() {
        let plan = make_plan(QueryType::General, &["uvicorn"]);
        let hits = vec![make_hit(
            "c1",
            ChunkKind::Prose,
            None,
            "start uvicorn on port 8000",
            1.0,
        )];
        let ranked = rank(hits, &plan, "server startup", 10);
        assert!((ranked[0].distance - 0.7).abs() < 1e-6);
    }

    #[test]
    fn definition_boost_without_keyword_overlap() {
        // "api" is too short to count as a keyword, so rule 1 never fires;
        // the stripped topic still matches both headings.
        let plan = make_plan(QueryType::Definition, &[]);
        let hits = vec![
            make_hit(
                "marked",
                ChunkKind::Prose,
                Some("## What is an API?"),
                "layers that wrap request handling",
                0.5,
            ),
            make_hit(
                "unmarked",
                ChunkKind::Prose,
                Some("Working with an API"),
                "sending requests and reading responses",
                0.5,
            ),
        ];
        let ranked = rank(hits, &plan, "what is an api", 10);
        assert_eq!(ranked[0].chunk.chunk_id, "marked");
        assert!((ranked[0].distance - 0.05).abs() < 1e-6, "x0.1 with marker word");
        assert!((ranked[1].distance - 0.3).abs() < 1e-6, "x0.6 without marker word");
    }

    #[test]
    fn example_queries_surface_code_before_prose() {
        let plan = make_plan(QueryType::Example, &[]);
        let hits = vec![
            make_hit("prose", ChunkKind::Prose, None, "explanatory text here", 0.1),
            make_hit("code", ChunkKind::Code, None, "def handler(): pass", 0.9),
        ];
        let ranked = rank(hits, &plan, "show an example", 10);
        assert_eq!(ranked[0].chunk.chunk_id, "code");
        assert_eq!(ranked[1].chunk.chunk_id, "prose");
    }

    #[test]
    fn install_snippets_lead_code_partition() {
        let plan = make_plan(QueryType::HowTo, &[]);
        let hits = vec![
            make_hit("other-code", ChunkKind::Code, None, "app = FastAPI()", 0.1),
            make_hit("install", ChunkKind::Code, None, "pip install fastapi", 0.4),
            make_hit("prose", ChunkKind::Prose, None, "about installation steps", 0.05),
        ];
        let ranked = rank(hits, &plan, "how to install fastapi", 10);
        assert_eq!(ranked[0].chunk.chunk_id, "install");
        assert_eq!(ranked[1].chunk.chunk_id, "other-code");
        assert_eq!(ranked[2].chunk.chunk_id, "prose");
    }

    #[test]
    fn fan_out_interleaves_code_per_topic() {
        let mut plan = make_plan(QueryType::MultiStep, &[]);
        plan.fan_out = true;
        plan.topics = vec!["customer creation".to_string(), "payment charging".to_string()];

        let hits = vec![
            make_hit("pay-code", ChunkKind::Code, None, "payment charging: charge(card)", 0.3),
            make_hit("cust-code", ChunkKind::Code, None, "customer creation: Customer.create()", 0.4),
            make_hit("prose", ChunkKind::Prose, None, "overview of the billing flow", 0.1),
            make_hit("stray-code", ChunkKind::Code, None, "unrelated helper()", 0.2),
        ];
        let ranked = rank(hits, &plan, "create a customer and charge them", 10);
        // Topic-matching code first (in topic order), then stray code, then prose.
        assert_eq!(ranked[0].chunk.chunk_id, "cust-code");
        assert_eq!(ranked[1].chunk.chunk_id, "pay-code");
        assert_eq!(ranked[2].chunk.chunk_id, "stray-code");
        assert_eq!(ranked[3].chunk.chunk_id, "prose");
    }

    #[test]
    fn truncates_to_top_k() {
        let plan = make_plan(QueryType::General, &[]);
        let hits: Vec<ScoredHit> = (0..10)
            .map(|i| {
                make_hit(
                    &format!("c{}", i),
                    ChunkKind::Prose,
                    None,
                    "filler content",
                    0.1 * i as f32,
                )
            })
            .collect();
        let ranked = rank(hits, &plan, "anything", 3);
        assert_eq!(ranked.len(), 3);
    }
}
