use serde::{Deserialize, Serialize};
use tracing::debug;

use contract_miner_core::{avg_logprob, Result};
use contract_miner_index::RetrievedChunk;
use contract_miner_llm::ModelAdapter;

use crate::prompt::Prompt;

pub const MASK_TOKEN: &str = "[MASK]";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenImportance {
    pub token: String,
    pub delta: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Explanation {
    pub token_importance: Vec<TokenImportance>,
    pub provenance: Vec<String>,
}

/// Perturbation-based token importance: mask one response token at a time
/// and measure how much the model's likelihood of the answer drops.
///
/// Costs `1 + top_n` generation calls, so callers gate it behind an
/// explicit request flag. An empty response short-circuits with zero calls.
pub fn explain_response(
    model: &dyn ModelAdapter,
    prompt: &Prompt,
    response: &str,
    retrieved_chunks: &[RetrievedChunk],
    top_n: usize,
) -> Result<Explanation> {
    let provenance: Vec<String> = retrieved_chunks
        .iter()
        .map(|chunk| chunk.id.clone())
        .collect();
    let tokens: Vec<&str> = response.split_whitespace().collect();
    if tokens.is_empty() {
        return Ok(Explanation {
            token_importance: Vec::new(),
            provenance,
        });
    }

    let baseline = model.generate(&prompt.text, true)?;
    let base_score = avg_logprob(baseline.logprobs.as_deref());

    let mut token_importance = Vec::new();
    for (position, token) in tokens.iter().take(top_n).enumerate() {
        let mut masked = tokens.clone();
        masked[position] = MASK_TOKEN;
        let paraphrase = masked.join(" ");
        let probe = format!(
            "{}\n\nEVALUATE: Is the following paraphrase equivalent? \"{}\"",
            prompt.text, paraphrase
        );
        let perturbed = model.generate(&probe, true)?;
        let masked_score = avg_logprob(perturbed.logprobs.as_deref());
        let delta = match (base_score, masked_score) {
            (Some(base), Some(masked)) => base - masked,
            _ => 0.0,
        };
        token_importance.push(TokenImportance {
            token: (*token).to_string(),
            delta,
        });
    }
    token_importance.sort_by(|a, b| {
        b.delta
            .partial_cmp(&a.delta)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    debug!(
        tokens = token_importance.len(),
        chunks = provenance.len(),
        "explanation computed"
    );
    Ok(Explanation {
        token_importance,
        provenance,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use contract_miner_core::{Embedder, MinerError};
    use contract_miner_llm::GenerationResult;

    use crate::prompt::PromptBuilder;

    use super::*;

    /// Scripted adapter: the baseline call gets the first logprob set, each
    /// probe gets the next one.
    struct ScriptedModel {
        scores: Vec<Option<Vec<f32>>>,
        calls: AtomicUsize,
    }

    impl ScriptedModel {
        fn new(scores: Vec<Option<Vec<f32>>>) -> Self {
            Self {
                scores,
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Embedder for ScriptedModel {
        fn embed(&self, _text: &str) -> contract_miner_core::Result<Vec<f32>> {
            Err(MinerError::Embedding("not part of this test".to_string()))
        }
    }

    impl ModelAdapter for ScriptedModel {
        fn generate(
            &self,
            _prompt_text: &str,
            _want_logprobs: bool,
        ) -> contract_miner_core::Result<GenerationResult> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(GenerationResult {
                text: "ok".to_string(),
                model_version: "scripted".to_string(),
                logprobs: self.scores.get(call).cloned().flatten(),
            })
        }
    }

    fn retrieved(id: &str) -> RetrievedChunk {
        RetrievedChunk {
            id: id.to_string(),
            text: "text".to_string(),
            score: 0.8,
        }
    }

    #[test]
    fn empty_response_makes_no_generation_calls() {
        let model = ScriptedModel::new(vec![]);
        let prompt = PromptBuilder::default().build("q", &[]);
        let explanation =
            explain_response(&model, &prompt, "   ", &[retrieved("chunk-0")], 5).unwrap();
        assert!(explanation.token_importance.is_empty());
        assert_eq!(explanation.provenance, vec!["chunk-0"]);
        assert_eq!(model.call_count(), 0);
    }

    #[test]
    fn deltas_come_back_sorted_descending() {
        // baseline avg -0.5; probes at -2.0, -0.6, -1.0 give deltas
        // 1.5, 0.1, 0.5
        let model = ScriptedModel::new(vec![
            Some(vec![-0.5]),
            Some(vec![-2.0]),
            Some(vec![-0.6]),
            Some(vec![-1.0]),
        ]);
        let prompt = PromptBuilder::default().build("q", &[]);
        let explanation =
            explain_response(&model, &prompt, "net thirty days", &[], 3).unwrap();
        let deltas: Vec<f32> = explanation
            .token_importance
            .iter()
            .map(|t| t.delta)
            .collect();
        assert_eq!(deltas.len(), 3);
        for pair in deltas.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
        assert_eq!(explanation.token_importance[0].token, "net");
        assert!((deltas[0] - 1.5).abs() < 1e-5);
    }

    #[test]
    fn missing_scores_produce_zero_deltas() {
        let model = ScriptedModel::new(vec![None, None, None]);
        let prompt = PromptBuilder::default().build("q", &[]);
        let explanation = explain_response(&model, &prompt, "two words", &[], 5).unwrap();
        assert!(explanation.token_importance.iter().all(|t| t.delta == 0.0));
        // baseline + one probe per token
        assert_eq!(model.call_count(), 3);
    }

    #[test]
    fn top_n_bounds_the_probe_count() {
        let model = ScriptedModel::new(vec![Some(vec![-0.5]); 10]);
        let prompt = PromptBuilder::default().build("q", &[]);
        let explanation =
            explain_response(&model, &prompt, "one two three four five six", &[], 2).unwrap();
        assert_eq!(explanation.token_importance.len(), 2);
        assert_eq!(model.call_count(), 3);
    }

    #[test]
    fn provenance_lists_all_retrieved_chunks() {
        let model = ScriptedModel::new(vec![Some(vec![-0.5]); 4]);
        let prompt = PromptBuilder::default().build("q", &[]);
        let explanation = explain_response(
            &model,
            &prompt,
            "short answer",
            &[retrieved("chunk-0"), retrieved("chunk-2")],
            1,
        )
        .unwrap();
        assert_eq!(explanation.provenance, vec!["chunk-0", "chunk-2"]);
    }
}
