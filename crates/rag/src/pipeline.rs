use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use contract_miner_core::{
    compute_confidence, detect_injection, input_hash, sanitize, Chunk, FilterConfig, MinerError,
    OutputFilter, Result,
};
use contract_miner_index::VectorIndex;
use contract_miner_llm::ModelAdapter;

use crate::audit::{AuditRecord, AuditStore};
use crate::explain::{explain_response, Explanation};
use crate::prompt::PromptBuilder;
use crate::retriever::Retriever;

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub text: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub include_explain: bool,
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub response: String,
    pub confidence_score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<Explanation>,
    pub model_version: String,
    pub input_hash: String,
    pub audit_id: i64,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub filter: FilterConfig,
    pub explain_top_n: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            filter: FilterConfig::default(),
            explain_top_n: 5,
        }
    }
}

/// The retrieval-augmented answer pipeline. Every collaborator is passed in
/// at construction; there is no ambient client or index anywhere below.
pub struct QueryEngine {
    retriever: Retriever,
    index: Arc<VectorIndex>,
    model: Arc<dyn ModelAdapter>,
    prompts: PromptBuilder,
    filter: OutputFilter,
    audit: AuditStore,
    explain_top_n: usize,
}

impl QueryEngine {
    pub fn new(
        index: Arc<VectorIndex>,
        model: Arc<dyn ModelAdapter>,
        audit: AuditStore,
        config: EngineConfig,
    ) -> Self {
        Self {
            retriever: Retriever::new(index.clone()),
            index,
            model,
            prompts: PromptBuilder::default(),
            filter: OutputFilter::new(config.filter),
            audit,
            explain_top_n: config.explain_top_n,
        }
    }

    pub fn audit_store(&self) -> &AuditStore {
        &self.audit
    }

    /// Embeds and indexes chunks already produced by the chunker. Returns
    /// the assigned ids.
    pub fn ingest(&self, chunks: &[Chunk]) -> Result<Vec<String>> {
        let ids = self.index.add(chunks, self.model.as_ref())?;
        info!(chunks = ids.len(), "document ingested");
        Ok(ids)
    }

    /// Stages run strictly in order: sanitize, injection gate, embed,
    /// retrieve, prompt, generate, filter, optional explain, confidence,
    /// audit. The injection gate fires before any paid call, and nothing is
    /// audited for a request that fails mid-pipeline.
    pub fn query(&self, request: &QueryRequest) -> Result<QueryOutcome> {
        let sanitized = sanitize(&request.text);
        if detect_injection(&sanitized) {
            return Err(MinerError::InjectionDetected);
        }

        let query_embedding = self.model.embed(&sanitized)?;
        let retrieved = self.retriever.retrieve(&query_embedding, request.top_k)?;
        let prompt = self.prompts.build(&sanitized, &retrieved);
        let generation = self.model.generate(&prompt.text, true)?;
        let (filtered, redaction) = self.filter.apply(&generation.text);

        let explanation = if request.include_explain {
            Some(explain_response(
                self.model.as_ref(),
                &prompt,
                &generation.text,
                &retrieved,
                self.explain_top_n,
            )?)
        } else {
            None
        };

        let retrieval_scores: Vec<f32> = retrieved.iter().map(|chunk| chunk.score).collect();
        let confidence = compute_confidence(generation.logprobs.as_deref(), &retrieval_scores);
        let hash = input_hash(&sanitized);

        let record = AuditRecord {
            ts: AuditRecord::now(),
            input_hash: hash.clone(),
            prompt_template: prompt.template_id.to_string(),
            prompt_text: prompt.text.clone(),
            retrieved_ids: retrieved.iter().map(|chunk| chunk.id.clone()).collect(),
            model_version: generation.model_version.clone(),
            raw_response: generation.text.clone(),
            filtered_response: filtered.clone(),
            confidence,
            explanation: explanation.clone(),
            redaction,
        };
        let audit_id = self.audit.log(&record)?;
        info!(
            audit_id,
            confidence,
            retrieved = record.retrieved_ids.len(),
            "query answered"
        );

        Ok(QueryOutcome {
            response: filtered,
            confidence_score: confidence,
            explanation,
            model_version: generation.model_version,
            input_hash: hash,
            audit_id,
        })
    }
}
