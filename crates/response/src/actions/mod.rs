//! Action plug-ins and their startup-time registry.

mod builtin;

pub use builtin::{
    BlockIpAction, IsolateContainerAction, LogOnlyAction, QuarantineFileAction, RateLimitAction,
    RedirectToHoneypotAction,
};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use vigil_core::ActionOutcome;

use crate::dataplane::DataPlane;
use crate::error::ResponseError;

/// A containment action.
///
/// Implementations honor the data plane's production/simulation split: in
/// simulation they record the intended effect without mutating anything.
/// Reversible actions return a revert token from `execute` and accept it
/// back in `revert`.
#[async_trait]
pub trait ResponseAction: Send + Sync {
    /// Registry name, referenced by decision-matrix cells.
    fn action_type(&self) -> &str;

    /// Whether this action alters data-plane state. Intrusive actions are
    /// subject to the confidence gate.
    fn is_intrusive(&self) -> bool;

    /// Apply the action to a target.
    async fn execute(
        &self,
        target: &str,
        parameters: &serde_json::Value,
    ) -> Result<ActionOutcome, ResponseError>;

    /// Undo a prior execution identified by its revert token.
    async fn revert(&self, token: &str) -> Result<String, ResponseError>;
}

/// Maps action-type names to their implementations. Built once at startup,
/// then shared immutably.
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn ResponseAction>>,
}

impl ActionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    /// Registry pre-populated with the six built-in actions bound to the
    /// given data plane.
    #[must_use]
    pub fn with_builtins(plane: Arc<DataPlane>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(LogOnlyAction));
        registry.register(Arc::new(RateLimitAction::new(Arc::clone(&plane))));
        registry.register(Arc::new(BlockIpAction::new(Arc::clone(&plane))));
        registry.register(Arc::new(IsolateContainerAction::new(Arc::clone(&plane))));
        registry.register(Arc::new(RedirectToHoneypotAction::new(Arc::clone(&plane))));
        registry.register(Arc::new(QuarantineFileAction::new(plane)));
        registry
    }

    /// Register an action under its own name, replacing any existing one.
    pub fn register(&mut self, action: Arc<dyn ResponseAction>) {
        self.actions
            .insert(action.action_type().to_owned(), action);
    }

    #[must_use]
    pub fn get(&self, action_type: &str) -> Option<Arc<dyn ResponseAction>> {
        self.actions.get(action_type).cloned()
    }

    #[must_use]
    pub fn contains(&self, action_type: &str) -> bool {
        self.actions.contains_key(action_type)
    }

    /// Sorted action-type names.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let registry = ActionRegistry::with_builtins(DataPlane::simulated());
        assert_eq!(
            registry.names(),
            vec![
                "block_ip",
                "isolate_container",
                "log_only",
                "quarantine_file",
                "rate_limit",
                "redirect_to_honeypot",
            ]
        );
        assert!(registry.contains("block_ip"));
        assert!(!registry.contains("self_destruct"));
    }

    #[test]
    fn intrusiveness_follows_data_plane_mutation() {
        let registry = ActionRegistry::with_builtins(DataPlane::simulated());
        assert!(!registry.get("log_only").unwrap().is_intrusive());
        assert!(registry.get("rate_limit").unwrap().is_intrusive());
        assert!(registry.get("block_ip").unwrap().is_intrusive());
        assert!(registry.get("isolate_container").unwrap().is_intrusive());
        assert!(registry.get("redirect_to_honeypot").unwrap().is_intrusive());
    }
}
