use hora::core::ann_index::{ANNIndex, SerializableIndex};
use hora::core::metrics::Metric;
use hora::index::hnsw_idx::HNSWIndex;
use hora::index::hnsw_params::HNSWParams;

use contract_miner_core::{MinerError, Result};

/// Graph backend over hora's HNSW. The graph is created lazily because the
/// dimension is only known once the first vectors arrive.
pub(crate) struct HnswBackend {
    index: Option<HNSWIndex<f32, usize>>,
}

impl HnswBackend {
    pub(crate) fn empty() -> Self {
        Self { index: None }
    }

    pub(crate) fn load(path: &str) -> Result<Self> {
        let index = HNSWIndex::load(path).map_err(|e| MinerError::Index(e.to_string()))?;
        Ok(Self { index: Some(index) })
    }

    pub(crate) fn insert_all(
        &mut self,
        embeddings: &[Vec<f32>],
        start_label: usize,
        dimension: usize,
    ) -> Result<()> {
        let index = self
            .index
            .get_or_insert_with(|| HNSWIndex::new(dimension, &HNSWParams::default()));
        for (offset, embedding) in embeddings.iter().enumerate() {
            index
                .add(embedding, start_label + offset)
                .map_err(|e| MinerError::Index(e.to_string()))?;
        }
        index
            .build(Metric::CosineSimilarity)
            .map_err(|e| MinerError::Index(e.to_string()))?;
        Ok(())
    }

    pub(crate) fn search(&self, query: &[f32], top_k: usize) -> Vec<(usize, f32)> {
        let Some(index) = &self.index else {
            return Vec::new();
        };
        index
            .search_nodes(query, top_k)
            .into_iter()
            .filter_map(|(node, metric_value)| {
                // hora orders cosine neighbors by negated similarity; flip it
                // back so callers see the same score semantic as the exact
                // backend
                node.idx().as_ref().map(|label| (*label, -metric_value))
            })
            .collect()
    }

    pub(crate) fn dump(&mut self, path: &str) -> Result<()> {
        if let Some(index) = &mut self.index {
            index
                .dump(path)
                .map_err(|e| MinerError::Index(e.to_string()))?;
        }
        Ok(())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.index.is_none()
    }
}
