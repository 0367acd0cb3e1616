use std::sync::Arc;

use async_trait::async_trait;

use vigil_core::ActionOutcome;

use crate::dataplane::DataPlane;
use crate::error::ResponseError;

use super::ResponseAction;

/// Record-only action. Always succeeds, never reversible.
pub struct LogOnlyAction;

#[async_trait]
impl ResponseAction for LogOnlyAction {
    fn action_type(&self) -> &str {
        "log_only"
    }

    fn is_intrusive(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        target: &str,
        _parameters: &serde_json::Value,
    ) -> Result<ActionOutcome, ResponseError> {
        Ok(ActionOutcome::irreversible(format!("logged {target}")))
    }

    async fn revert(&self, _token: &str) -> Result<String, ResponseError> {
        Err(ResponseError::NotReversible("log_only".into()))
    }
}

/// Apply a bandwidth cap on the target flow.
pub struct RateLimitAction {
    plane: Arc<DataPlane>,
    default_kbps: u64,
}

impl RateLimitAction {
    #[must_use]
    pub fn new(plane: Arc<DataPlane>) -> Self {
        Self {
            plane,
            default_kbps: 128,
        }
    }
}

#[async_trait]
impl ResponseAction for RateLimitAction {
    fn action_type(&self) -> &str {
        "rate_limit"
    }

    fn is_intrusive(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        target: &str,
        parameters: &serde_json::Value,
    ) -> Result<ActionOutcome, ResponseError> {
        let kbps = parameters["kbps"].as_u64().unwrap_or(self.default_kbps);
        if !self.plane.is_production() {
            return Ok(ActionOutcome::reversible(
                format!("simulated: would cap {target} at {kbps} kbit/s"),
                target,
            ));
        }
        match self.plane.cap_bandwidth(target, kbps) {
            None => Ok(ActionOutcome::reversible(
                format!("capped {target} at {kbps} kbit/s"),
                target,
            )),
            Some(previous) => Ok(ActionOutcome::reversible(
                format!("cap already present ({previous} kbit/s), now {kbps} kbit/s"),
                target,
            )),
        }
    }

    async fn revert(&self, token: &str) -> Result<String, ResponseError> {
        if !self.plane.is_production() {
            return Ok(format!("simulated: would lift cap on {token}"));
        }
        if self.plane.remove_cap(token) {
            Ok(format!("cap lifted on {token}"))
        } else {
            Ok(format!("no cap present on {token}"))
        }
    }
}

/// Install a drop rule against the target IP. Install is idempotent; a
/// second block reports the existing rule.
pub struct BlockIpAction {
    plane: Arc<DataPlane>,
}

impl BlockIpAction {
    #[must_use]
    pub fn new(plane: Arc<DataPlane>) -> Self {
        Self { plane }
    }
}

#[async_trait]
impl ResponseAction for BlockIpAction {
    fn action_type(&self) -> &str {
        "block_ip"
    }

    fn is_intrusive(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        target: &str,
        _parameters: &serde_json::Value,
    ) -> Result<ActionOutcome, ResponseError> {
        if !self.plane.is_production() {
            return Ok(ActionOutcome::reversible(
                format!("simulated: would block {target}"),
                target,
            ));
        }
        if self.plane.block(target) {
            Ok(ActionOutcome::reversible(format!("blocked {target}"), target))
        } else {
            Ok(ActionOutcome::reversible(
                format!("block already installed for {target}"),
                target,
            ))
        }
    }

    async fn revert(&self, token: &str) -> Result<String, ResponseError> {
        if !self.plane.is_production() {
            return Ok(format!("simulated: would unblock {token}"));
        }
        if self.plane.unblock(token) {
            Ok(format!("unblocked {token}"))
        } else {
            Ok(format!("no block present for {token}"))
        }
    }
}

/// Disconnect a compute unit from its data network.
pub struct IsolateContainerAction {
    plane: Arc<DataPlane>,
}

impl IsolateContainerAction {
    #[must_use]
    pub fn new(plane: Arc<DataPlane>) -> Self {
        Self { plane }
    }
}

#[async_trait]
impl ResponseAction for IsolateContainerAction {
    fn action_type(&self) -> &str {
        "isolate_container"
    }

    fn is_intrusive(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        target: &str,
        _parameters: &serde_json::Value,
    ) -> Result<ActionOutcome, ResponseError> {
        if !self.plane.is_production() {
            return Ok(ActionOutcome::reversible(
                format!("simulated: would isolate {target}"),
                target,
            ));
        }
        if self.plane.isolate(target) {
            Ok(ActionOutcome::reversible(format!("isolated {target}"), target))
        } else {
            Ok(ActionOutcome::reversible(
                format!("{target} already isolated"),
                target,
            ))
        }
    }

    async fn revert(&self, token: &str) -> Result<String, ResponseError> {
        if !self.plane.is_production() {
            return Ok(format!("simulated: would reconnect {token}"));
        }
        if self.plane.reconnect(token) {
            Ok(format!("reconnected {token}"))
        } else {
            Ok(format!("{token} was not isolated"))
        }
    }
}

/// Rewrite the target's destination towards a honeypot.
pub struct RedirectToHoneypotAction {
    plane: Arc<DataPlane>,
    honeypot: String,
}

impl RedirectToHoneypotAction {
    #[must_use]
    pub fn new(plane: Arc<DataPlane>) -> Self {
        Self {
            plane,
            honeypot: "10.255.255.1".to_owned(),
        }
    }

    #[must_use]
    pub fn with_honeypot(mut self, address: impl Into<String>) -> Self {
        self.honeypot = address.into();
        self
    }
}

#[async_trait]
impl ResponseAction for RedirectToHoneypotAction {
    fn action_type(&self) -> &str {
        "redirect_to_honeypot"
    }

    fn is_intrusive(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        target: &str,
        _parameters: &serde_json::Value,
    ) -> Result<ActionOutcome, ResponseError> {
        if !self.plane.is_production() {
            return Ok(ActionOutcome::reversible(
                format!("simulated: would redirect {target} to {}", self.honeypot),
                target,
            ));
        }
        if self.plane.redirect(target, &self.honeypot) {
            Ok(ActionOutcome::reversible(
                format!("redirecting {target} to {}", self.honeypot),
                target,
            ))
        } else {
            Ok(ActionOutcome::reversible(
                format!("redirect already present for {target}"),
                target,
            ))
        }
    }

    async fn revert(&self, token: &str) -> Result<String, ResponseError> {
        if !self.plane.is_production() {
            return Ok(format!("simulated: would remove redirect for {token}"));
        }
        if self.plane.remove_redirect(token) {
            Ok(format!("redirect removed for {token}"))
        } else {
            Ok(format!("no redirect present for {token}"))
        }
    }
}

/// Move a file into the quarantine area. Reversible by move-back while the
/// quarantine mapping exists.
pub struct QuarantineFileAction {
    plane: Arc<DataPlane>,
}

impl QuarantineFileAction {
    #[must_use]
    pub fn new(plane: Arc<DataPlane>) -> Self {
        Self { plane }
    }
}

#[async_trait]
impl ResponseAction for QuarantineFileAction {
    fn action_type(&self) -> &str {
        "quarantine_file"
    }

    fn is_intrusive(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        target: &str,
        _parameters: &serde_json::Value,
    ) -> Result<ActionOutcome, ResponseError> {
        if !self.plane.is_production() {
            return Ok(ActionOutcome::irreversible(format!(
                "simulated: would quarantine {target}"
            )));
        }
        match self.plane.quarantine(target) {
            Some(quarantine_path) => Ok(ActionOutcome::reversible(
                format!("quarantined {target} at {quarantine_path}"),
                target,
            )),
            None => Ok(ActionOutcome::irreversible(format!(
                "{target} already quarantined"
            ))),
        }
    }

    async fn revert(&self, token: &str) -> Result<String, ResponseError> {
        if !self.plane.is_production() {
            return Ok(format!("simulated: would restore {token}"));
        }
        if self.plane.release(token) {
            Ok(format!("restored {token}"))
        } else {
            Err(ResponseError::InvalidToken(format!(
                "{token} is not quarantined"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn block_then_revert_round_trip() {
        let plane = DataPlane::production();
        let action = BlockIpAction::new(Arc::clone(&plane));

        let outcome = action
            .execute("203.0.113.7", &serde_json::Value::Null)
            .await
            .unwrap();
        assert!(outcome.reversible);
        assert!(plane.is_blocked("203.0.113.7"));

        let token = outcome.revert_token.unwrap();
        let result = action.revert(&token).await.unwrap();
        assert_eq!(result, "unblocked 203.0.113.7");
        assert!(!plane.is_blocked("203.0.113.7"));
    }

    #[tokio::test]
    async fn second_block_reports_existing_rule() {
        let plane = DataPlane::production();
        let action = BlockIpAction::new(plane);
        action
            .execute("203.0.113.7", &serde_json::Value::Null)
            .await
            .unwrap();
        let second = action
            .execute("203.0.113.7", &serde_json::Value::Null)
            .await
            .unwrap();
        assert!(second.result.contains("already installed"));
    }

    #[tokio::test]
    async fn simulation_mode_never_touches_the_plane() {
        let plane = DataPlane::simulated();
        let action = BlockIpAction::new(Arc::clone(&plane));
        let outcome = action
            .execute("203.0.113.7", &serde_json::Value::Null)
            .await
            .unwrap();
        assert!(outcome.result.starts_with("simulated:"));
        assert!(!plane.is_blocked("203.0.113.7"));
    }

    #[tokio::test]
    async fn rate_limit_uses_parameter_kbps() {
        let plane = DataPlane::production();
        let action = RateLimitAction::new(Arc::clone(&plane));
        let outcome = action
            .execute("10.0.0.9", &serde_json::json!({ "kbps": 256 }))
            .await
            .unwrap();
        assert!(outcome.result.contains("256"));
        assert_eq!(plane.cap_for("10.0.0.9"), Some(256));
    }

    #[tokio::test]
    async fn log_only_refuses_revert() {
        let action = LogOnlyAction;
        let outcome = action
            .execute("10.0.0.9", &serde_json::Value::Null)
            .await
            .unwrap();
        assert!(!outcome.reversible);
        assert!(action.revert("anything").await.is_err());
    }

    #[tokio::test]
    async fn quarantine_reverts_by_move_back() {
        let plane = DataPlane::production();
        let action = QuarantineFileAction::new(plane);
        let outcome = action
            .execute("/tmp/dropper.bin", &serde_json::Value::Null)
            .await
            .unwrap();
        assert!(outcome.reversible, "move-back is possible right after the move");

        let token = outcome.revert_token.unwrap();
        assert_eq!(action.revert(&token).await.unwrap(), "restored /tmp/dropper.bin");
        assert!(action.revert(&token).await.is_err(), "nothing left to restore");
    }
}
