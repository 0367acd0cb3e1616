use serde::{Deserialize, Serialize};

use vigil_core::Severity;

use crate::actions::ActionRegistry;
use crate::error::ResponseError;

/// The 3×3 decision table: primary axis alert severity, secondary axis risk
/// bucket. Each cell names exactly one registered action type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionMatrix {
    /// `cells[severity.rank()][risk_bucket.rank()]`.
    cells: [[String; 3]; 3],
}

impl Default for DecisionMatrix {
    fn default() -> Self {
        let row = |a: &str, b: &str, c: &str| [a.to_owned(), b.to_owned(), c.to_owned()];
        Self {
            cells: [
                row("log_only", "log_only", "rate_limit"),
                row("log_only", "rate_limit", "block_ip"),
                row("rate_limit", "block_ip", "isolate_container"),
            ],
        }
    }
}

impl DecisionMatrix {
    /// Build from explicit rows, ordered low/medium/high severity and
    /// low/medium/high risk within each row.
    #[must_use]
    pub fn from_rows(low: [String; 3], medium: [String; 3], high: [String; 3]) -> Self {
        Self {
            cells: [low, medium, high],
        }
    }

    /// The action type for a severity × risk cell.
    #[must_use]
    pub fn select(&self, severity: Severity, risk_bucket: Severity) -> &str {
        &self.cells[severity.rank() as usize][risk_bucket.rank() as usize]
    }

    /// Fail startup when any cell names an unregistered action type.
    pub fn validate(&self, registry: &ActionRegistry) -> Result<(), ResponseError> {
        for row in &self.cells {
            for cell in row {
                if !registry.contains(cell) {
                    return Err(ResponseError::UnknownActionType(cell.clone()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::dataplane::DataPlane;

    use super::*;

    #[test]
    fn default_matrix_matches_policy() {
        let m = DecisionMatrix::default();
        assert_eq!(m.select(Severity::Low, Severity::Low), "log_only");
        assert_eq!(m.select(Severity::Low, Severity::High), "rate_limit");
        assert_eq!(m.select(Severity::Medium, Severity::High), "block_ip");
        assert_eq!(m.select(Severity::High, Severity::Low), "rate_limit");
        assert_eq!(m.select(Severity::High, Severity::High), "isolate_container");
    }

    #[test]
    fn validation_rejects_unknown_action() {
        let registry = ActionRegistry::with_builtins(DataPlane::simulated());
        assert!(DecisionMatrix::default().validate(&registry).is_ok());

        let bad = DecisionMatrix::from_rows(
            ["log_only".into(), "log_only".into(), "nuke_site".into()],
            ["log_only".into(), "log_only".into(), "log_only".into()],
            ["log_only".into(), "log_only".into(), "log_only".into()],
        );
        let err = bad.validate(&registry).unwrap_err();
        assert!(matches!(err, ResponseError::UnknownActionType(t) if t == "nuke_site"));
    }
}
