mod chunk;
mod confidence;
mod embedding;
mod error;
mod filter;
mod sanitize;

pub use chunk::{Chunk, ChunkConfig, Chunker};
pub use confidence::{
    avg_logprob, compute_confidence, model_confidence, Calibrator, IdentityCalibrator,
    MODEL_WEIGHT, RETRIEVAL_WEIGHT,
};
pub use embedding::{Embedder, HashEmbedder, HashEmbedderConfig};
pub use error::{MinerError, Result};
pub use filter::{FilterConfig, OutputFilter, Redaction, RedactionReport, POLICY_TOKEN};
pub use sanitize::{collapse_whitespace, detect_injection, input_hash, sanitize, URL_TOKEN};
