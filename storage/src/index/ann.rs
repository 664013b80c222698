use scholia_core::vecmath::cosine_similarity;
use std::collections::HashMap;

/// Linear-scan vector index over the reduced (index) embeddings.
pub struct VectorIndex {
    embeddings: HashMap<u64, Vec<f32>>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self {
            embeddings: HashMap::new(),
        }
    }

    pub fn insert(&mut self, id: u64, embedding: Vec<f32>) {
        self.embeddings.insert(id, embedding);
    }

    pub fn delete(&mut self, id: u64) -> bool {
        self.embeddings.remove(&id).is_some()
    }

    /// Top-k by cosine similarity among ids accepted by `filter`, keeping
    /// only scores at or above `threshold`. Ties break on ascending id so
    /// results are deterministic.
    pub fn search<F>(&self, query: &[f32], k: usize, threshold: f32, filter: F) -> Vec<(u64, f32)>
    where
        F: Fn(u64) -> bool,
    {
        let mut scores: Vec<(u64, f32)> = self
            .embeddings
            .iter()
            .filter(|(id, _)| filter(**id))
            .filter_map(|(id, emb)| cosine_similarity(query, emb).map(|score| (*id, score)))
            .filter(|(_, score)| *score >= threshold)
            .collect();

        scores.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scores.truncate(k);
        scores
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new()
    }
}
