use vigil_core::{Verdict, VerdictThresholds};

/// Fused investigation outcome, before it is wrapped into a report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fused {
    pub risk_score: f64,
    pub verdict: Verdict,
    pub uncertainty: f64,
    pub confidence: f64,
}

/// Fuse the alert's model score with the provider scores that answered.
///
/// `risk = clamp(alpha * model + (1 - alpha) * mean(provider scores), 0, 1)`.
/// Uncertainty is the fraction of configured providers that did not answer;
/// confidence is its complement. With zero present providers the caller
/// should fall back to the alert-only report instead.
#[must_use]
pub fn fuse(
    model_score: f64,
    provider_scores: &[f64],
    total_configured: usize,
    alpha: f64,
    thresholds: &VerdictThresholds,
) -> Fused {
    let mean = if provider_scores.is_empty() {
        0.0
    } else {
        provider_scores.iter().sum::<f64>() / provider_scores.len() as f64
    };

    let risk_score = if provider_scores.is_empty() {
        model_score.clamp(0.0, 1.0)
    } else {
        (alpha * model_score + (1.0 - alpha) * mean).clamp(0.0, 1.0)
    };

    let present = provider_scores.len().min(total_configured);
    let uncertainty = if total_configured == 0 {
        1.0
    } else {
        1.0 - present as f64 / total_configured as f64
    };

    Fused {
        risk_score,
        verdict: thresholds.bucket(risk_score),
        uncertainty,
        confidence: 1.0 - uncertainty,
    }
}
