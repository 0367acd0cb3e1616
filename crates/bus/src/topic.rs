use std::fmt;

/// A named channel on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(String);

impl Topic {
    /// Alerts emitted by the detection engine.
    pub const ALERTS: &'static str = "alerts";
    /// Reports emitted by the investigation agent.
    pub const INVESTIGATIONS: &'static str = "investigations";
    /// Audit records emitted by the response engine.
    pub const ACTIONS: &'static str = "actions";
    /// Periodic counter snapshots for dashboards.
    pub const STATS: &'static str = "stats";

    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn alerts() -> Self {
        Self::new(Self::ALERTS)
    }

    #[must_use]
    pub fn investigations() -> Self {
        Self::new(Self::INVESTIGATIONS)
    }

    #[must_use]
    pub fn actions() -> Self {
        Self::new(Self::ACTIONS)
    }

    #[must_use]
    pub fn stats() -> Self {
        Self::new(Self::STATS)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
