use serde::{Deserialize, Serialize};

/// Brute-force backend: vectors are L2-normalized on insert, so the inner
/// product against a normalized query is cosine similarity.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub(crate) struct ExactIndex {
    vectors: Vec<Vec<f32>>,
}

impl ExactIndex {
    pub(crate) fn insert_all(&mut self, embeddings: &[Vec<f32>]) {
        for embedding in embeddings {
            let mut vector = embedding.clone();
            l2_normalize(&mut vector);
            self.vectors.push(vector);
        }
    }

    pub(crate) fn search(&self, query: &[f32], top_k: usize) -> Vec<(usize, f32)> {
        let mut normalized = query.to_vec();
        l2_normalize(&mut normalized);
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(label, vector)| (label, dot(&normalized, vector)))
            .collect();
        // stable sort keeps insertion order for equal scores
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }

    pub(crate) fn len(&self) -> usize {
        self.vectors.len()
    }

    /// Drops trailing vectors with no metadata entry, which can exist after
    /// a crash between the two artifact writes.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.vectors.truncate(len);
    }
}

pub(crate) fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
