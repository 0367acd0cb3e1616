use crate::error::DetectError;
use crate::features::FeatureVector;

/// A pure batch scoring function.
///
/// Implementations must return exactly one score in `[0, 1]` per input
/// vector. Scoring runs on the detection worker pool, so implementations
/// must be cheap and side-effect free.
pub trait Scorer: Send + Sync {
    /// Score a batch. The output length must equal the input length.
    fn score_batch(&self, batch: &[FeatureVector]) -> Result<Vec<f64>, DetectError>;

    /// Whether scores are calibrated probabilities. Drives the alert
    /// confidence: probabilistic scorers use `max(p, 1-p)`, others use the
    /// score itself.
    fn is_probabilistic(&self) -> bool {
        false
    }
}

/// Fallback scorer used when no trained model is configured.
///
/// Weighted sum of normalized bytes, packets and an inverse-IAT activity
/// term, clamped to `[0, 1]`. The score is monotone non-decreasing in both
/// bytes and packets: every term is non-negative and non-decreasing in
/// those inputs, holding the others fixed.
#[derive(Debug, Clone)]
pub struct HeuristicScorer {
    /// Byte count that saturates the volume term.
    pub bytes_saturation: f64,
    /// Packet count that saturates the rate terms.
    pub packets_saturation: f64,
    pub bytes_weight: f64,
    pub packets_weight: f64,
    pub iat_weight: f64,
}

impl Default for HeuristicScorer {
    fn default() -> Self {
        Self {
            bytes_saturation: 1_000_000.0,
            packets_saturation: 500.0,
            bytes_weight: 0.4,
            packets_weight: 0.3,
            iat_weight: 0.3,
        }
    }
}

impl HeuristicScorer {
    fn score_one(&self, fv: &FeatureVector) -> f64 {
        let bytes = fv.values[0];
        let packets = fv.values[1];
        let iat_mean = fv.values[2];

        let volume = (bytes / self.bytes_saturation).min(1.0);
        let rate = (packets / self.packets_saturation).min(1.0);
        // Tight inter-arrivals only matter on flows with real packet counts;
        // scaling by the rate term keeps one-packet flows near zero while
        // staying monotone in packets.
        let burst = (1.0 / (1.0 + iat_mean)) * rate;

        (self.bytes_weight * volume + self.packets_weight * rate + self.iat_weight * burst)
            .clamp(0.0, 1.0)
    }
}

impl Scorer for HeuristicScorer {
    fn score_batch(&self, batch: &[FeatureVector]) -> Result<Vec<f64>, DetectError> {
        Ok(batch.iter().map(|fv| self.score_one(fv)).collect())
    }
}
