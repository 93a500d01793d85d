use contract_miner_core::{Chunk, Embedder, HashEmbedder, HashEmbedderConfig, MinerError};
use contract_miner_index::{BackendKind, VectorIndex};

fn embedder() -> HashEmbedder {
    HashEmbedder::new(HashEmbedderConfig {
        dimensions: 32,
        seed: 42,
    })
}

fn chunk(id: &str, text: &str) -> Chunk {
    Chunk {
        id: id.to_string(),
        text: text.to_string(),
    }
}

fn sample_chunks() -> Vec<Chunk> {
    vec![
        chunk("chunk-0", "the supplier delivers goods within thirty days"),
        chunk("chunk-1", "either party may terminate with ninety days notice"),
        chunk("chunk-2", "payment is due net sixty from invoice date"),
    ]
}

#[test]
fn add_then_query_returns_descending_scores() {
    let dir = tempfile::tempdir().unwrap();
    let index = VectorIndex::open(dir.path().join("index"), BackendKind::Exact).unwrap();
    let embedder = embedder();
    let ids = index.add(&sample_chunks(), &embedder).unwrap();
    assert_eq!(ids, vec!["chunk-0", "chunk-1", "chunk-2"]);

    let query = embedder.embed("terminate with ninety days notice").unwrap();
    let hits = index.query(&query, 3).unwrap();
    assert!(hits.len() <= 3);
    assert_eq!(hits[0].id, "chunk-1");
    for pair in hits.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[test]
fn top_k_caps_the_result_count() {
    let dir = tempfile::tempdir().unwrap();
    let index = VectorIndex::open(dir.path().join("index"), BackendKind::Exact).unwrap();
    let embedder = embedder();
    index.add(&sample_chunks(), &embedder).unwrap();
    let query = embedder.embed("payment terms").unwrap();
    assert_eq!(index.query(&query, 1).unwrap().len(), 1);
    assert_eq!(index.query(&query, 10).unwrap().len(), 3);
}

#[test]
fn index_reloads_from_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("index");
    let embedder = embedder();
    {
        let index = VectorIndex::open(&base, BackendKind::Exact).unwrap();
        index.add(&sample_chunks(), &embedder).unwrap();
    }
    let reloaded = VectorIndex::open(&base, BackendKind::Exact).unwrap();
    assert_eq!(reloaded.len(), 3);
    assert_eq!(reloaded.dimension(), Some(32));
    let query = embedder.embed("net sixty invoice").unwrap();
    assert_eq!(reloaded.query(&query, 1).unwrap()[0].id, "chunk-2");
}

#[test]
fn recorded_backend_wins_over_requested_backend() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("index");
    let embedder = embedder();
    {
        let index = VectorIndex::open(&base, BackendKind::Exact).unwrap();
        index.add(&sample_chunks(), &embedder).unwrap();
    }
    // asking for hnsw on reload must not flip an exact index
    let reloaded = VectorIndex::open(&base, BackendKind::Hnsw).unwrap();
    assert_eq!(reloaded.backend_kind(), BackendKind::Exact);
}

#[test]
fn dimension_mismatch_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let index = VectorIndex::open(dir.path().join("index"), BackendKind::Exact).unwrap();
    index.add(&sample_chunks(), &embedder()).unwrap();
    let err = index.query(&vec![0.5f32; 8], 2).unwrap_err();
    assert!(matches!(
        err,
        MinerError::DimensionMismatch {
            expected: 32,
            actual: 8
        }
    ));
}

#[test]
fn duplicate_ids_keep_metadata_and_vectors_aligned() {
    let dir = tempfile::tempdir().unwrap();
    let index = VectorIndex::open(dir.path().join("index"), BackendKind::Exact).unwrap();
    let embedder = embedder();
    let twice = vec![
        chunk("chunk-0", "renewal is automatic unless cancelled"),
        chunk("chunk-0", "renewal is automatic unless cancelled"),
    ];
    index.add(&twice, &embedder).unwrap();
    index.add(&twice, &embedder).unwrap();
    assert_eq!(index.len(), 4);
    let query = embedder.embed("automatic renewal").unwrap();
    assert_eq!(index.query(&query, 10).unwrap().len(), 4);
}

#[test]
fn embedding_failure_leaves_disk_untouched() {
    struct FailingEmbedder;
    impl Embedder for FailingEmbedder {
        fn embed(&self, _text: &str) -> contract_miner_core::Result<Vec<f32>> {
            Err(MinerError::Embedding("provider unreachable".to_string()))
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("index");
    let good = embedder();
    {
        let index = VectorIndex::open(&base, BackendKind::Exact).unwrap();
        index.add(&sample_chunks(), &good).unwrap();
        let err = index
            .add(&[chunk("chunk-3", "late fee accrues daily")], &FailingEmbedder)
            .unwrap_err();
        assert!(matches!(err, MinerError::Embedding(_)));
    }
    let reloaded = VectorIndex::open(&base, BackendKind::Exact).unwrap();
    assert_eq!(reloaded.len(), 3);
}

#[test]
fn query_on_empty_index_returns_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let index = VectorIndex::open(dir.path().join("index"), BackendKind::Exact).unwrap();
    assert!(index.query(&[1.0, 0.0], 5).unwrap().is_empty());
}

#[test]
fn hnsw_backend_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("index");
    let embedder = embedder();
    {
        let index = VectorIndex::open(&base, BackendKind::Hnsw).unwrap();
        index.add(&sample_chunks(), &embedder).unwrap();
        let query = embedder.embed("terminate with ninety days notice").unwrap();
        let hits = index.query(&query, 2).unwrap();
        assert_eq!(hits[0].id, "chunk-1");
    }
    let reloaded = VectorIndex::open(&base, BackendKind::Exact).unwrap();
    assert_eq!(reloaded.backend_kind(), BackendKind::Hnsw);
    assert_eq!(reloaded.len(), 3);
    let query = embedder.embed("terminate with ninety days notice").unwrap();
    assert_eq!(reloaded.query(&query, 1).unwrap()[0].id, "chunk-1");
}
