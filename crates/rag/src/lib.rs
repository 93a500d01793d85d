mod audit;
mod explain;
mod pipeline;
mod prompt;
mod retriever;

pub use audit::{AuditRecord, AuditStore, StoredAudit};
pub use explain::{explain_response, Explanation, TokenImportance, MASK_TOKEN};
pub use pipeline::{EngineConfig, QueryEngine, QueryOutcome, QueryRequest};
pub use prompt::{Prompt, PromptBuilder, SYSTEM_INSTRUCTIONS, TEMPLATE_ID};
pub use retriever::Retriever;

pub use contract_miner_index::{BackendKind, RetrievedChunk, VectorIndex};
pub use contract_miner_llm::{GenerationResult, ModelAdapter, ModelClient, ModelProvider, RetryPolicy};
