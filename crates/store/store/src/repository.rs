use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vigil_core::{ActionId, ActionRecord, AlertEvent, AlertId, InvestigationReport};

use crate::error::StoreError;

/// A paginated listing of records, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    /// Total records in the store (before pagination).
    pub total: u64,
    /// The limit used for this page.
    pub limit: u32,
    /// The offset used for this page.
    pub offset: u32,
    /// The records on this page.
    pub items: Vec<T>,
}

/// Aggregate counters served on the stats surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub alerts: u64,
    pub investigations: u64,
    pub actions: u64,
    /// Alert counts keyed by severity name.
    pub alert_severities: BTreeMap<String, u64>,
    /// Action counts keyed by action type.
    pub action_types: BTreeMap<String, u64>,
    /// Investigation counts keyed by verdict name.
    pub verdicts: BTreeMap<String, u64>,
}

/// Durable, append-only storage for alerts, investigations and actions.
///
/// All saves are idempotent on the record's primary key: saving a record
/// whose id already exists is a silent no-op that returns `false`. Records
/// are never updated in place; corrections (e.g. reverts) append new
/// records.
#[async_trait]
pub trait Repository: Send + Sync + std::fmt::Debug {
    /// Persist an alert. Returns `true` if newly inserted.
    async fn save_alert(&self, alert: &AlertEvent) -> Result<bool, StoreError>;

    /// Persist an investigation report, keyed by its `alert_id`.
    /// Returns `true` if newly inserted.
    async fn save_investigation(&self, report: &InvestigationReport) -> Result<bool, StoreError>;

    /// Persist an action record. Returns `true` if newly inserted.
    async fn save_action(&self, record: &ActionRecord) -> Result<bool, StoreError>;

    /// Fetch one alert by id.
    async fn get_alert(&self, id: &AlertId) -> Result<Option<AlertEvent>, StoreError>;

    /// Fetch the report for an alert, if one exists.
    async fn get_investigation(
        &self,
        alert_id: &AlertId,
    ) -> Result<Option<InvestigationReport>, StoreError>;

    /// Fetch one action record by id.
    async fn get_action(&self, id: &ActionId) -> Result<Option<ActionRecord>, StoreError>;

    /// All action records belonging to one alert, oldest first.
    async fn actions_for_alert(
        &self,
        alert_id: &AlertId,
    ) -> Result<Vec<ActionRecord>, StoreError>;

    /// List alerts, newest first.
    async fn list_alerts(&self, limit: u32, offset: u32) -> Result<Page<AlertEvent>, StoreError>;

    /// List investigation reports, newest first.
    async fn list_investigations(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Page<InvestigationReport>, StoreError>;

    /// List action records, newest first.
    async fn list_actions(&self, limit: u32, offset: u32)
        -> Result<Page<ActionRecord>, StoreError>;

    async fn count_alerts(&self) -> Result<u64, StoreError>;
    async fn count_investigations(&self) -> Result<u64, StoreError>;
    async fn count_actions(&self) -> Result<u64, StoreError>;

    /// Aggregate breakdowns for the stats surface.
    async fn stats(&self) -> Result<StoreStats, StoreError>;
}

/// Clamp a listing limit into `1..=1000`, defaulting oversized requests down.
#[must_use]
pub fn effective_limit(limit: u32) -> u32 {
    limit.clamp(1, 1000)
}
