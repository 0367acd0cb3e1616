use std::net::IpAddr;

use ipnet::IpNet;
use tracing::warn;

use vigil_core::GateLevel;

use crate::actions::ActionRegistry;

/// What the gate decided for one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateDecision {
    /// The action type that will actually run.
    pub action_type: String,
    /// Downgrade chain for the audit trail, e.g. `["whitelist"]`.
    pub trace: Vec<String>,
    /// Intervention level recorded on the action record.
    pub level: GateLevel,
}

/// Pre-dispatch rule set that may downgrade an action.
///
/// Checks run in order: whitelist, protected networks (loopback and the
/// management subnets), then the confidence bar for intrusive actions.
/// Whitelist and protected-network hits force `log_only`; a confidence
/// failure downgrades one level (intrusive → `rate_limit` → `log_only`).
pub struct SafetyGate {
    whitelist: Vec<IpNet>,
    management: Vec<IpNet>,
    min_confidence: f64,
}

impl SafetyGate {
    /// Parse whitelist and management-subnet entries. Bare addresses are
    /// accepted as /32 (or /128) networks; unparseable entries are skipped
    /// with a WARN.
    #[must_use]
    pub fn new(whitelist: &[String], management: &[String], min_confidence: f64) -> Self {
        Self {
            whitelist: parse_networks(whitelist),
            management: parse_networks(management),
            min_confidence,
        }
    }

    /// Apply the gate to a selected action.
    #[must_use]
    pub fn apply(
        &self,
        selected: &str,
        target: IpAddr,
        confidence: f64,
        registry: &ActionRegistry,
    ) -> GateDecision {
        let mut trace = Vec::new();

        if self.whitelist.iter().any(|net| net.contains(&target)) {
            trace.push("whitelist".to_owned());
            return GateDecision {
                action_type: "log_only".to_owned(),
                trace,
                level: GateLevel::High,
            };
        }

        if target.is_loopback() || self.management.iter().any(|net| net.contains(&target)) {
            trace.push("protected_network".to_owned());
            return GateDecision {
                action_type: "log_only".to_owned(),
                trace,
                level: GateLevel::High,
            };
        }

        let intrusive = registry
            .get(selected)
            .is_some_and(|action| action.is_intrusive());
        if intrusive && selected != "rate_limit" && confidence < self.min_confidence {
            trace.push("low_confidence".to_owned());
            return GateDecision {
                action_type: "rate_limit".to_owned(),
                trace,
                level: GateLevel::Medium,
            };
        }

        GateDecision {
            action_type: selected.to_owned(),
            trace,
            level: GateLevel::Low,
        }
    }
}

fn parse_networks(entries: &[String]) -> Vec<IpNet> {
    entries
        .iter()
        .filter_map(|entry| {
            entry
                .parse::<IpNet>()
                .or_else(|_| entry.parse::<IpAddr>().map(IpNet::from))
                .map_err(|e| warn!(entry = %entry, error = %e, "unparseable network entry skipped"))
                .ok()
        })
        .collect()
}
