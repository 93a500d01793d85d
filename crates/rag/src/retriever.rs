use std::sync::Arc;

use contract_miner_core::Result;
use contract_miner_index::{RetrievedChunk, VectorIndex};

/// Thin adapter between the query path and the index. Owns nothing; exists
/// so the engine never touches the index type directly.
#[derive(Clone)]
pub struct Retriever {
    index: Arc<VectorIndex>,
}

impl Retriever {
    pub fn new(index: Arc<VectorIndex>) -> Self {
        Self { index }
    }

    pub fn retrieve(&self, embedding: &[f32], top_k: usize) -> Result<Vec<RetrievedChunk>> {
        self.index.query(embedding, top_k)
    }
}
