use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::levels::{Severity, Verdict};
use crate::types::AlertId;

/// The outcome of investigating one alert against external threat intel.
///
/// Exactly one report is emitted per alert. The report is deterministic
/// given the alert, the cache state and the fused score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestigationReport {
    /// The alert this report investigates.
    pub alert_id: AlertId,

    /// When the report was emitted.
    pub ts: DateTime<Utc>,

    /// Raw findings keyed by provider name. Provider failures are recorded
    /// here under an `error` field rather than aborting the investigation.
    pub ioc_findings: BTreeMap<String, serde_json::Value>,

    /// Names of the providers that contributed a finding.
    pub sources: Vec<String>,

    /// Fused risk score in `[0, 1]`.
    pub risk_score: f64,

    /// Verdict bucketed from the risk score.
    pub verdict: Verdict,

    /// `1 - present_providers / total_configured_providers`.
    pub uncertainty: f64,

    /// `1 - uncertainty`.
    pub confidence: f64,

    /// Severity of the originating alert, carried for the decision matrix.
    pub alert_severity: Severity,

    /// Free-form notes (e.g. "all providers failed").
    pub notes: String,
}

impl InvestigationReport {
    /// Report used when every provider failed and the cache had nothing:
    /// the verdict falls back to the alert alone.
    #[must_use]
    pub fn from_alert_only(
        alert_id: AlertId,
        model_score: f64,
        alert_severity: Severity,
        ioc_findings: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        let verdict = if alert_severity == Severity::High {
            Verdict::Suspicious
        } else {
            Verdict::Benign
        };
        Self {
            alert_id,
            ts: Utc::now(),
            ioc_findings,
            sources: Vec::new(),
            risk_score: model_score.clamp(0.0, 1.0),
            verdict,
            uncertainty: 1.0,
            confidence: 0.0,
            alert_severity,
            notes: "no threat-intel sources available".to_owned(),
        }
    }
}
