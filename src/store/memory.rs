//! In-memory [`VectorStore`] implementation for testing.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Search is brute-force cosine distance over all stored vectors, reported
//! as `1 - cos(θ)` so that smaller means more similar, matching the real
//! store's distance convention.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Chunk;

use super::{StoreHit, VectorStore};

struct StoredPoint {
    vector: Vec<f32>,
    chunk: Chunk,
}

struct MemoryCollection {
    dim: usize,
    points: Vec<StoredPoint>,
}

/// Brute-force in-memory store for tests.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one chunk with its vector, creating the collection on demand.
    pub fn insert(&self, collection: &str, vector: Vec<f32>, chunk: Chunk) {
        let mut collections = self.collections.write().unwrap();
        let entry = collections
            .entry(collection.to_string())
            .or_insert_with(|| MemoryCollection {
                dim: vector.len(),
                points: Vec::new(),
            });
        entry.points.push(StoredPoint { vector, chunk });
    }

    /// Number of collections currently provisioned.
    pub fn collection_count(&self) -> usize {
        self.collections.read().unwrap().len()
    }
}

fn cosine_sim(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn ensure_collection(&self, collection: &str, dim: usize) -> Result<()> {
        let mut collections = self.collections.write().unwrap();
        collections
            .entry(collection.to_string())
            .or_insert_with(|| MemoryCollection {
                dim,
                points: Vec::new(),
            });
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        doc_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoreHit>> {
        let collections = self.collections.read().unwrap();
        let Some(coll) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<StoreHit> = coll
            .points
            .iter()
            .filter(|p| doc_id.map_or(true, |id| p.chunk.doc_id == id))
            .map(|p| StoreHit {
                chunk: p.chunk.clone(),
                // Cosine distance: 0 = identical, larger = less similar.
                distance: (1.0 - cosine_sim(vector, &p.vector)).max(0.0),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn scroll(
        &self,
        collection: &str,
        doc_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Chunk>> {
        let collections = self.collections.read().unwrap();
        let Some(coll) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        Ok(coll
            .points
            .iter()
            .filter(|p| doc_id.map_or(true, |id| p.chunk.doc_id == id))
            .take(limit)
            .map(|p| p.chunk.clone())
            .collect())
    }
}
