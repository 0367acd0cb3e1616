use serde::{Deserialize, Serialize};

/// One provider's view of an indicator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Provider name.
    pub source: String,
    /// Provider-native response fields, kept for the audit trail.
    pub raw: serde_json::Value,
    /// Score normalized to `[0, 1]` by the provider's own rule.
    pub normalized_score: f64,
    /// Whether this finding was fabricated in offline mode. A cache hit
    /// preserves the flag of the original lookup.
    pub is_mocked: bool,
}

impl Finding {
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        raw: serde_json::Value,
        normalized_score: f64,
    ) -> Self {
        Self {
            source: source.into(),
            raw,
            normalized_score: normalized_score.clamp(0.0, 1.0),
            is_mocked: false,
        }
    }

    #[must_use]
    pub fn mocked(mut self) -> Self {
        self.is_mocked = true;
        self
    }
}
