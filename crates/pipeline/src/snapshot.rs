use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One point-in-time view of the pipeline counters, published on the
/// `stats` topic at ≥1 Hz and served by the query surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub ts: DateTime<Utc>,

    // Detection
    pub packets: u64,
    pub malformed_packets: u64,
    pub flows_evicted: u64,
    pub alerts_emitted: u64,
    pub alerts_dropped: u64,

    // Investigation
    pub investigations: u64,
    pub provider_errors: u64,
    pub rate_limited_lookups: u64,

    // Response
    pub reports_handled: u64,
    pub actions_executed: u64,
    pub actions_failed: u64,
    pub actions_timed_out: u64,
    pub reverts: u64,

    // Bus
    pub bus_published: u64,
    pub bus_delivered: u64,
    pub bus_dropped: u64,
    pub broker_fallbacks: u64,
}
