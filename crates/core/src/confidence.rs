pub const MODEL_WEIGHT: f32 = 0.4;
pub const RETRIEVAL_WEIGHT: f32 = 0.6;

/// Average per-token log-probability, if any tokens were reported.
pub fn avg_logprob(logprobs: Option<&[f32]>) -> Option<f32> {
    match logprobs {
        Some(tokens) if !tokens.is_empty() => {
            Some(tokens.iter().sum::<f32>() / tokens.len() as f32)
        }
        _ => None,
    }
}

/// Pseudo-probability from token logprobs; neutral 0.5 when the provider
/// reported none.
pub fn model_confidence(logprobs: Option<&[f32]>) -> f32 {
    match avg_logprob(logprobs) {
        Some(avg) => avg.exp().clamp(0.0, 1.0),
        None => 0.5,
    }
}

/// Fuses model likelihood with retrieval similarity. The retrieval side
/// carries the larger weight: for grounded answers the match quality of the
/// context is the stronger signal.
pub fn compute_confidence(logprobs: Option<&[f32]>, retrieval_scores: &[f32]) -> f32 {
    let model_conf = model_confidence(logprobs);
    let retrieval_conf = if retrieval_scores.is_empty() {
        0.0
    } else {
        retrieval_scores
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max)
    };
    (MODEL_WEIGHT * model_conf + RETRIEVAL_WEIGHT * retrieval_conf).clamp(0.0, 1.0)
}

/// Post-processing hook for calibrated deployments (Platt scaling,
/// isotonic regression). The core ships only the identity.
pub trait Calibrator: Send + Sync {
    fn calibrate(&self, raw: f32) -> f32;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCalibrator;

impl Calibrator for IdentityCalibrator {
    fn calibrate(&self, raw: f32) -> f32 {
        raw
    }
}
