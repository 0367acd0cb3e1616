use vigil_core::{InvestigationReport, Severity};

/// Pre-decision advisor consulted before the safety gate.
///
/// A learned policy may propose a different cell selection than the static
/// matrix, but the matrix stays authoritative when the advisor abstains and
/// every advised selection still passes the full safety gate.
pub trait PolicyAdvisor: Send + Sync {
    /// Propose an action type for this report, or `None` to keep the
    /// matrix's selection.
    fn advise(
        &self,
        report: &InvestigationReport,
        risk_bucket: Severity,
        matrix_selection: &str,
    ) -> Option<String>;
}

/// Default advisor: always defers to the matrix.
pub struct NoopAdvisor;

impl PolicyAdvisor for NoopAdvisor {
    fn advise(
        &self,
        _report: &InvestigationReport,
        _risk_bucket: Severity,
        _matrix_selection: &str,
    ) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use vigil_core::AlertId;

    use super::*;

    #[test]
    fn noop_advisor_defers() {
        let report = InvestigationReport::from_alert_only(
            AlertId::new("a1"),
            0.9,
            Severity::High,
            BTreeMap::new(),
        );
        assert!(NoopAdvisor
            .advise(&report, Severity::High, "block_ip")
            .is_none());
    }
}
