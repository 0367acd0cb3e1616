use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ActionId, AlertId};

/// How strongly the safety gate intervened before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateLevel {
    /// The selected action passed through untouched.
    Low,
    /// The gate downgraded the action one level.
    Medium,
    /// The gate forced the action all the way down to `log_only`.
    High,
}

/// What an action plug-in reports back after executing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Human-readable result, or `error:<kind>` / `timeout` on failure.
    pub result: String,
    /// Whether this execution can be undone.
    pub reversible: bool,
    /// Opaque token the plug-in needs to revert, when reversible.
    pub revert_token: Option<String>,
}

impl ActionOutcome {
    /// An irreversible, successful outcome.
    #[must_use]
    pub fn irreversible(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            reversible: false,
            revert_token: None,
        }
    }

    /// A reversible outcome carrying its revert token.
    #[must_use]
    pub fn reversible(result: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            reversible: true,
            revert_token: Some(token.into()),
        }
    }
}

/// The durable audit record of one executed (or attempted) action.
///
/// A revert does not mutate the original record; it appends a new record
/// with `reverted = true` whose `parameters.reverts` names the original.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Unique, time-ordered action identifier.
    pub action_id: ActionId,

    /// The alert chain this action belongs to.
    pub alert_id: AlertId,

    /// When the action completed (or timed out).
    pub ts: DateTime<Utc>,

    /// Registered action type that ran (`block_ip`, `log_only`, ...).
    pub action_type: String,

    /// The target the action was applied to (an IP, container name or path).
    pub target: String,

    /// Execution parameters plus audit context: the gate downgrade chain is
    /// recorded under `gate_trace`, simulated runs under `simulated`.
    pub parameters: serde_json::Value,

    /// Result string from the plug-in, or `timeout` / `error:<kind>`.
    pub result: String,

    /// Gate intervention level applied before dispatch.
    pub safety_gate: GateLevel,

    /// Whether the executed action can be reverted.
    pub reversible: bool,

    /// Whether this record documents a revert.
    pub reverted: bool,

    /// Opaque revert token held for later reversal.
    pub revert_token: Option<String>,
}

impl ActionRecord {
    /// Build the record for a fresh execution.
    #[must_use]
    pub fn executed(
        alert_id: AlertId,
        action_type: impl Into<String>,
        target: impl Into<String>,
        parameters: serde_json::Value,
        outcome: &ActionOutcome,
        safety_gate: GateLevel,
    ) -> Self {
        Self {
            action_id: ActionId::generate(),
            alert_id,
            ts: Utc::now(),
            action_type: action_type.into(),
            target: target.into(),
            parameters,
            result: outcome.result.clone(),
            safety_gate,
            reversible: outcome.reversible,
            reverted: false,
            revert_token: outcome.revert_token.clone(),
        }
    }

    /// Build the record documenting a revert of `original`.
    #[must_use]
    pub fn reverted_from(original: &Self, result: impl Into<String>) -> Self {
        Self {
            action_id: ActionId::generate(),
            alert_id: original.alert_id.clone(),
            ts: Utc::now(),
            action_type: original.action_type.clone(),
            target: original.target.clone(),
            parameters: serde_json::json!({ "reverts": original.action_id }),
            result: result.into(),
            safety_gate: original.safety_gate,
            reversible: false,
            reverted: true,
            revert_token: None,
        }
    }
}
