//! Query analysis: turn a raw question into an executable [`QueryPlan`].
//!
//! Two paths produce a plan. The text-generation service is asked first; its
//! JSON output is validated field by field, and anything missing or malformed
//! is backfilled from the deterministic heuristic path. When the service is
//! disabled or fails entirely, the heuristic plan is used as-is. Analysis
//! therefore never fails; the rest of the pipeline always has a plan to run.

use crate::generation::TextGenService;
use crate::models::{QueryPlan, QueryType};

/// Stop words excluded from keyword extraction and significance checks.
pub(crate) const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "do", "does", "did", "will", "would", "should", "could", "can", "may", "might", "must",
    "what", "when", "where", "why", "how", "who", "which", "this", "that", "these", "those",
    "to", "for", "of", "in", "on", "at", "by", "from", "as", "with", "about", "into", "through",
    "during", "including", "against", "among",
];

/// Action verbs whose co-occurrence marks a multi-step query.
const ACTION_VERBS: &[&str] = &[
    "create", "make", "add", "charge", "process", "handle", "include",
];

/// Domain-indicator keyword groups used to infer required sub-topics.
const TOPIC_GROUPS: &[(&str, &[&str])] = &[
    ("customer creation", &["customer", "create customer", "new customer"]),
    ("payment charging", &["payment", "charge", "pay ", "amount", "$"]),
    ("error handling", &["error", "try", "catch", "exception"]),
    ("subscription", &["subscription"]),
    ("webhooks", &["webhook"]),
];

/// Analyze a query, preferring the generation service but always falling
/// back to deterministic heuristics.
pub async fn analyze(
    generator: &dyn TextGenService,
    query: &str,
    default_top_k: usize,
) -> QueryPlan {
    let heuristic = heuristic_plan(query, default_top_k);

    if !generator.is_enabled() {
        return heuristic;
    }

    match generator.enhance(query).await {
        Ok(raw) => match extract_json(&raw) {
            Some(value) => merge_plan(query, value, heuristic),
            None => {
                tracing::warn!("query enhancement returned no parseable JSON, using heuristics");
                heuristic
            }
        },
        Err(err) => {
            tracing::warn!(error = %err, "query enhancement failed, using heuristics");
            heuristic
        }
    }
}

/// Build a plan from deterministic heuristics alone.
pub fn heuristic_plan(query: &str, default_top_k: usize) -> QueryPlan {
    let keywords = extract_keywords(query);
    let topics = infer_topics(query);
    let query_type = detect_query_type(query);
    let fan_out = topics.len() > 1;
    let top_k = if fan_out {
        default_top_k.max(3 * topics.len())
    } else {
        default_top_k
    };

    QueryPlan {
        enhanced_query: query.to_string(),
        keywords,
        topics,
        query_type,
        top_k,
        fan_out,
    }
}

/// Merge a service-produced plan into the heuristic one.
///
/// Each field is trusted independently: present and well-typed wins, anything
/// else keeps the heuristic value. Fan-out and the result-count floor are
/// enforced after the merge regardless of what the service claimed.
fn merge_plan(query: &str, value: serde_json::Value, heuristic: QueryPlan) -> QueryPlan {
    let enhanced = string_field(&value, "enhanced_query")
        .unwrap_or_else(|| heuristic.enhanced_query.clone());
    let keywords =
        string_list_field(&value, "keywords").unwrap_or_else(|| heuristic.keywords.clone());
    let concepts = string_list_field(&value, "concepts").unwrap_or_default();
    let query_type = string_field(&value, "query_type")
        .and_then(|s| QueryType::parse(&s))
        .unwrap_or(heuristic.query_type);
    let topics = string_list_field(&value, "required_topics")
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| heuristic.topics.clone());
    let mut top_k = value
        .get("recommended_top_k")
        .and_then(|v| v.as_u64())
        .filter(|&k| k > 0)
        .map(|k| k as usize)
        .unwrap_or(heuristic.top_k);
    let mut fan_out = value
        .get("multi_query_needed")
        .and_then(|v| v.as_bool())
        .unwrap_or(heuristic.fan_out);

    // More than one topic always means fan-out, and enough budget to cover
    // every topic.
    if topics.len() > 1 {
        fan_out = true;
        top_k = top_k.max(3 * topics.len());
    }

    QueryPlan {
        enhanced_query: build_search_query(&enhanced, &keywords, &concepts, query),
        keywords,
        topics,
        query_type,
        top_k,
        fan_out,
    }
}

fn string_field(value: &serde_json::Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn string_list_field(value: &serde_json::Value, key: &str) -> Option<Vec<String>> {
    let items = value.get(key)?.as_array()?;
    let strings: Vec<String> = items
        .iter()
        .filter_map(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if strings.is_empty() {
        None
    } else {
        Some(strings)
    }
}

/// Combine the rewritten query with its top keywords and concepts into one
/// search string, deduplicated, preserving first occurrence.
fn build_search_query(
    enhanced: &str,
    keywords: &[String],
    concepts: &[String],
    original: &str,
) -> String {
    let mut terms: Vec<String> = vec![enhanced.to_string()];
    terms.extend(keywords.iter().take(3).cloned());
    terms.extend(concepts.iter().take(3).cloned());

    let mut seen = std::collections::HashSet::new();
    let combined: Vec<String> = terms
        .into_iter()
        .filter(|t| !t.is_empty() && seen.insert(t.to_lowercase()))
        .collect();

    if combined.is_empty() {
        original.to_string()
    } else {
        combined.join(" ")
    }
}

/// Extract the first JSON object embedded in model output.
///
/// Models sometimes wrap the JSON in markdown fences or prose; take the
/// outermost `{...}` span and parse that before giving up.
fn extract_json(text: &str) -> Option<serde_json::Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end])
        .ok()
        .or_else(|| serde_json::from_str(text).ok())
}

/// Stop-word-filtered keyword extraction, capped at ten terms.
pub fn extract_keywords(query: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    query
        .to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| w.len() > 2 && !STOP_WORDS.contains(&w.as_str()))
        .filter(|w| seen.insert(w.clone()))
        .take(10)
        .collect()
}

/// Infer the query type from fixed trigger tables.
///
/// Multi-step is checked first: several action verbs, or an explicit
/// conjunction, outranks the other categories.
pub fn detect_query_type(query: &str) -> QueryType {
    let q = query.to_lowercase();

    let action_count = ACTION_VERBS.iter().filter(|v| q.contains(*v)).count();
    if action_count > 1
        || [" and ", " then ", " also ", " plus "].iter().any(|w| q.contains(w))
    {
        return QueryType::MultiStep;
    }

    if ["what is", "what are", "define", "definition", "explain"]
        .iter()
        .any(|w| q.contains(w))
    {
        QueryType::Definition
    } else if ["how to", "how do", "how can", "steps", "tutorial"]
        .iter()
        .any(|w| q.contains(w))
    {
        QueryType::HowTo
    } else if ["example", "sample", "code", "snippet"].iter().any(|w| q.contains(w)) {
        QueryType::Example
    } else if ["compare", "difference", " vs ", "versus"].iter().any(|w| q.contains(w)) {
        QueryType::Comparison
    } else if ["error", "fix", "issue", "problem", "troubleshoot"]
        .iter()
        .any(|w| q.contains(w))
    {
        QueryType::Troubleshooting
    } else {
        QueryType::General
    }
}

/// Infer required sub-topics from domain-indicator keyword groups.
///
/// Empty when nothing matches; the whole query then counts as the single
/// topic and no fan-out happens.
pub fn infer_topics(query: &str) -> Vec<String> {
    let q = query.to_lowercase();
    TOPIC_GROUPS
        .iter()
        .filter(|(_, indicators)| indicators.iter().any(|i| q.contains(i)))
        .map(|(topic, _)| topic.to_string())
        .collect()
}
