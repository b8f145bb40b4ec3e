//! In-memory result cache for the request layer.
//!
//! Capacity-bounded map keyed by a digest of the normalized query and scope,
//! with least-frequently-used eviction. The retrieval pipeline itself stays
//! pure; only the outer request handler consults this cache.

use std::collections::HashMap;
use std::sync::Mutex;

use sha2::{Digest, Sha256};

use crate::models::QueryOutcome;

struct CacheEntry {
    outcome: QueryOutcome,
    uses: u64,
}

/// LFU cache of query outcomes, safe for concurrent use.
pub struct QueryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    capacity: usize,
}

impl QueryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    fn key(query: &str, doc_id: Option<&str>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(query.trim().to_lowercase().as_bytes());
        hasher.update(b":");
        hasher.update(doc_id.unwrap_or("all").as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Look up a cached outcome, bumping its use count on a hit.
    pub fn get(&self, query: &str, doc_id: Option<&str>) -> Option<QueryOutcome> {
        let key = Self::key(query, doc_id);
        let mut entries = self.entries.lock().unwrap();
        entries.get_mut(&key).map(|entry| {
            entry.uses += 1;
            entry.outcome.clone()
        })
    }

    /// Store an outcome, evicting the least-frequently-used entry at
    /// capacity.
    pub fn put(&self, query: &str, doc_id: Option<&str>, outcome: QueryOutcome) {
        let key = Self::key(query, doc_id);
        let mut entries = self.entries.lock().unwrap();

        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            if let Some(lfu_key) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.uses)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&lfu_key);
            }
        }

        entries.insert(key, CacheEntry { outcome, uses: 1 });
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_outcome(answer: &str) -> QueryOutcome {
        QueryOutcome {
            answer: answer.to_string(),
            sources: Vec::new(),
            context_used: Vec::new(),
        }
    }

    #[test]
    fn miss_then_hit() {
        let cache = QueryCache::new(10);
        assert!(cache.get("what is fastapi", None).is_none());
        cache.put("what is fastapi", None, make_outcome("an answer"));
        let hit = cache.get("what is fastapi", None).unwrap();
        assert_eq!(hit.answer, "an answer");
    }

    #[test]
    fn key_normalizes_query_text() {
        let cache = QueryCache::new(10);
        cache.put("  What Is FastAPI  ", None, make_outcome("a"));
        assert!(cache.get("what is fastapi", None).is_some());
    }

    #[test]
    fn scope_separates_entries() {
        let cache = QueryCache::new(10);
        cache.put("query", Some("doc-a"), make_outcome("a"));
        assert!(cache.get("query", Some("doc-b")).is_none());
        assert!(cache.get("query", None).is_none());
        assert!(cache.get("query", Some("doc-a")).is_some());
    }

    #[test]
    fn evicts_least_frequently_used() {
        let cache = QueryCache::new(2);
        cache.put("popular", None, make_outcome("p"));
        cache.put("unpopular", None, make_outcome("u"));

        // Three hits for "popular", none for "unpopular".
        for _ in 0..3 {
            cache.get("popular", None);
        }

        cache.put("newcomer", None, make_outcome("n"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("unpopular", None).is_none());
        assert!(cache.get("popular", None).is_some());
        assert!(cache.get("newcomer", None).is_some());
    }

    #[test]
    fn clear_empties_cache() {
        let cache = QueryCache::new(10);
        cache.put("query", None, make_outcome("a"));
        cache.clear();
        assert!(cache.is_empty());
    }
}
