use proptest::prelude::*;

use contract_miner_core::{collapse_whitespace, ChunkConfig, Chunker};

proptest! {
    #[test]
    fn chunks_reconstruct_the_normalized_text(
        text in "[ a-z0-9.,]{0,400}",
        window in 2usize..40,
        overlap_frac in 0usize..100,
    ) {
        let overlap = overlap_frac * (window - 1) / 100;
        let chunker = Chunker::new(ChunkConfig { window_size: window, overlap }).unwrap();
        let normalized = collapse_whitespace(&text);
        let chunks = chunker.chunk(&text);

        if normalized.is_empty() {
            prop_assert!(chunks.is_empty());
            return Ok(());
        }

        // every chunk except possibly the last is exactly one window wide
        for chunk in &chunks[..chunks.len() - 1] {
            prop_assert_eq!(chunk.text.chars().count(), window);
        }

        // dropping each chunk's leading overlap re-assembles the input
        let mut rebuilt: String = chunks[0].text.clone();
        for chunk in &chunks[1..] {
            let fresh: String = chunk.text.chars().skip(overlap).collect();
            rebuilt.push_str(&fresh);
        }
        prop_assert_eq!(rebuilt, normalized);
    }

    #[test]
    fn ids_are_sequential(text in "[a-z ]{1,200}") {
        let chunker = Chunker::new(ChunkConfig { window_size: 10, overlap: 4 }).unwrap();
        for (idx, chunk) in chunker.chunk(&text).iter().enumerate() {
            prop_assert_eq!(chunk.id.clone(), format!("chunk-{idx}"));
        }
    }
}
