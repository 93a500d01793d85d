use serde::{Deserialize, Serialize};

use crate::error::{MinerError, Result};
use crate::sanitize::collapse_whitespace;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkConfig {
    pub window_size: usize,
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            window_size: 1000,
            overlap: 200,
        }
    }
}

impl ChunkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(MinerError::InvalidChunking("window_size must be positive"));
        }
        if self.overlap >= self.window_size {
            return Err(MinerError::InvalidChunking(
                "overlap must be smaller than window_size",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub text: String,
}

pub struct Chunker {
    config: ChunkConfig,
}

impl Chunker {
    pub fn new(config: ChunkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Windows are measured in characters so a multi-byte boundary can never
    /// split a chunk mid-codepoint.
    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        let normalized = collapse_whitespace(text);
        if normalized.is_empty() {
            return Vec::new();
        }
        let chars: Vec<char> = normalized.chars().collect();
        let step = self.config.window_size - self.config.overlap;
        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut idx = 0usize;
        loop {
            let end = (start + self.config.window_size).min(chars.len());
            chunks.push(Chunk {
                id: format!("chunk-{idx}"),
                text: chars[start..end].iter().collect(),
            });
            idx += 1;
            if end == chars.len() {
                break;
            }
            start += step;
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(window_size: usize, overlap: usize) -> Chunker {
        Chunker::new(ChunkConfig {
            window_size,
            overlap,
        })
        .unwrap()
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(chunker(10, 2).chunk("").is_empty());
        assert!(chunker(10, 2).chunk("  \n\t ").is_empty());
    }

    #[test]
    fn windows_overlap_and_cover_the_text() {
        let text = "abcdefghij";
        let chunks = chunker(4, 1).chunk(text);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["abcd", "defg", "ghij"]);
        let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["chunk-0", "chunk-1", "chunk-2"]);
    }

    #[test]
    fn all_but_the_last_window_are_full_width() {
        let text = "one two three four five six seven eight nine ten";
        let chunks = chunker(12, 3).chunk(text);
        for chunk in &chunks[..chunks.len() - 1] {
            assert_eq!(chunk.text.chars().count(), 12);
        }
        assert!(chunks.last().unwrap().text.chars().count() <= 12);
    }

    #[test]
    fn whitespace_runs_collapse_before_windowing() {
        let chunks = chunker(100, 10).chunk("alpha\n\n  beta\t\tgamma ");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "alpha beta gamma");
    }

    #[test]
    fn short_tail_terminates() {
        // tail shorter than the overlap used to be an easy way to loop forever
        let chunks = chunker(4, 3).chunk("abcde");
        assert_eq!(chunks.last().unwrap().text, "bcde");
    }

    #[test]
    fn overlap_must_stay_below_window() {
        assert!(Chunker::new(ChunkConfig {
            window_size: 4,
            overlap: 4
        })
        .is_err());
        assert!(Chunker::new(ChunkConfig {
            window_size: 0,
            overlap: 0
        })
        .is_err());
    }
}
