use serde::{Deserialize, Serialize};

/// Severity assigned to an alert from its model score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Numeric rank used by monotonicity checks and matrix lookups.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds mapping a model score to a severity bucket.
///
/// A score exactly on a threshold falls into the higher bucket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SeverityThresholds {
    /// Scores at or above this value are `high`.
    pub high: f64,
    /// Scores at or above this value (and below `high`) are `medium`.
    pub medium: f64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            high: 0.8,
            medium: 0.5,
        }
    }
}

impl SeverityThresholds {
    /// Bucket a model score into a severity.
    #[must_use]
    pub fn bucket(&self, score: f64) -> Severity {
        if score >= self.high {
            Severity::High
        } else if score >= self.medium {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

/// Verdict of an investigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Benign,
    Suspicious,
    Malicious,
}

impl Verdict {
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Benign => 0,
            Self::Suspicious => 1,
            Self::Malicious => 2,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Benign => "benign",
            Self::Suspicious => "suspicious",
            Self::Malicious => "malicious",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds mapping a fused risk score to a verdict. Inclusive-high.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VerdictThresholds {
    /// Risk scores at or above this value are `malicious`.
    pub malicious: f64,
    /// Risk scores at or above this value (and below `malicious`) are
    /// `suspicious`.
    pub suspicious: f64,
}

impl Default for VerdictThresholds {
    fn default() -> Self {
        Self {
            malicious: 0.7,
            suspicious: 0.4,
        }
    }
}

impl VerdictThresholds {
    /// Bucket a fused risk score into a verdict.
    #[must_use]
    pub fn bucket(&self, risk_score: f64) -> Verdict {
        if risk_score >= self.malicious {
            Verdict::Malicious
        } else if risk_score >= self.suspicious {
            Verdict::Suspicious
        } else {
            Verdict::Benign
        }
    }
}

/// Thresholds mapping a risk score onto the decision matrix's risk axis.
///
/// The matrix axis reuses the severity shape: three buckets, inclusive-high.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub high: f64,
    pub medium: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            high: 0.7,
            medium: 0.4,
        }
    }
}

impl RiskThresholds {
    /// Bucket a risk score into the matrix's secondary axis.
    #[must_use]
    pub fn bucket(&self, risk_score: f64) -> Severity {
        if risk_score >= self.high {
            Severity::High
        } else if risk_score >= self.medium {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}
