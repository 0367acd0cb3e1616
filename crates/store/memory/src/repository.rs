use async_trait::async_trait;
use dashmap::DashMap;

use vigil_core::{ActionId, ActionRecord, AlertEvent, AlertId, InvestigationReport};
use vigil_store::repository::effective_limit;
use vigil_store::{Page, Repository, StoreError, StoreStats};

/// In-memory repository backed by `DashMap`.
///
/// Primary maps are keyed by the record id; a secondary index maps alert ids
/// to their action record ids for join queries. Idempotence comes from
/// insert-if-vacant on the primary key.
#[derive(Debug)]
pub struct MemoryRepository {
    alerts: DashMap<String, AlertEvent>,
    investigations: DashMap<String, InvestigationReport>,
    actions: DashMap<String, ActionRecord>,
    /// alert id -> action record ids, in insertion order.
    actions_by_alert: DashMap<String, Vec<String>>,
}

impl MemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self {
            alerts: DashMap::new(),
            investigations: DashMap::new(),
            actions: DashMap::new(),
            actions_by_alert: DashMap::new(),
        }
    }

    /// Insert if the key is vacant; `false` if it already existed.
    fn insert_if_vacant<V>(map: &DashMap<String, V>, key: String, value: V) -> bool {
        match map.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(value);
                true
            }
        }
    }

    fn page_of<T: Clone>(
        items: Vec<T>,
        limit: u32,
        offset: u32,
    ) -> Page<T> {
        let limit = effective_limit(limit);
        let total = items.len() as u64;
        let items = items
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Page {
            total,
            limit,
            offset,
            items,
        }
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn save_alert(&self, alert: &AlertEvent) -> Result<bool, StoreError> {
        Ok(Self::insert_if_vacant(
            &self.alerts,
            alert.id.as_str().to_owned(),
            alert.clone(),
        ))
    }

    async fn save_investigation(&self, report: &InvestigationReport) -> Result<bool, StoreError> {
        Ok(Self::insert_if_vacant(
            &self.investigations,
            report.alert_id.as_str().to_owned(),
            report.clone(),
        ))
    }

    async fn save_action(&self, record: &ActionRecord) -> Result<bool, StoreError> {
        let inserted = Self::insert_if_vacant(
            &self.actions,
            record.action_id.as_str().to_owned(),
            record.clone(),
        );
        if inserted {
            self.actions_by_alert
                .entry(record.alert_id.as_str().to_owned())
                .or_default()
                .push(record.action_id.as_str().to_owned());
        }
        Ok(inserted)
    }

    async fn get_alert(&self, id: &AlertId) -> Result<Option<AlertEvent>, StoreError> {
        Ok(self.alerts.get(id.as_str()).map(|r| r.value().clone()))
    }

    async fn get_investigation(
        &self,
        alert_id: &AlertId,
    ) -> Result<Option<InvestigationReport>, StoreError> {
        Ok(self
            .investigations
            .get(alert_id.as_str())
            .map(|r| r.value().clone()))
    }

    async fn get_action(&self, id: &ActionId) -> Result<Option<ActionRecord>, StoreError> {
        Ok(self.actions.get(id.as_str()).map(|r| r.value().clone()))
    }

    async fn actions_for_alert(
        &self,
        alert_id: &AlertId,
    ) -> Result<Vec<ActionRecord>, StoreError> {
        let Some(ids) = self.actions_by_alert.get(alert_id.as_str()) else {
            return Ok(Vec::new());
        };
        let mut records = Vec::with_capacity(ids.len());
        for id in ids.value() {
            if let Some(rec) = self.actions.get(id) {
                records.push(rec.value().clone());
            }
        }
        Ok(records)
    }

    async fn list_alerts(&self, limit: u32, offset: u32) -> Result<Page<AlertEvent>, StoreError> {
        let mut items: Vec<AlertEvent> =
            self.alerts.iter().map(|e| e.value().clone()).collect();
        items.sort_by(|a, b| b.ts.cmp(&a.ts));
        Ok(Self::page_of(items, limit, offset))
    }

    async fn list_investigations(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Page<InvestigationReport>, StoreError> {
        let mut items: Vec<InvestigationReport> = self
            .investigations
            .iter()
            .map(|e| e.value().clone())
            .collect();
        items.sort_by(|a, b| b.ts.cmp(&a.ts));
        Ok(Self::page_of(items, limit, offset))
    }

    async fn list_actions(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Page<ActionRecord>, StoreError> {
        let mut items: Vec<ActionRecord> =
            self.actions.iter().map(|e| e.value().clone()).collect();
        items.sort_by(|a, b| b.ts.cmp(&a.ts));
        Ok(Self::page_of(items, limit, offset))
    }

    async fn count_alerts(&self) -> Result<u64, StoreError> {
        Ok(self.alerts.len() as u64)
    }

    async fn count_investigations(&self) -> Result<u64, StoreError> {
        Ok(self.investigations.len() as u64)
    }

    async fn count_actions(&self) -> Result<u64, StoreError> {
        Ok(self.actions.len() as u64)
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let mut stats = StoreStats {
            alerts: self.alerts.len() as u64,
            investigations: self.investigations.len() as u64,
            actions: self.actions.len() as u64,
            ..StoreStats::default()
        };
        for entry in &self.alerts {
            *stats
                .alert_severities
                .entry(entry.value().severity.as_str().to_owned())
                .or_default() += 1;
        }
        for entry in &self.actions {
            *stats
                .action_types
                .entry(entry.value().action_type.clone())
                .or_default() += 1;
        }
        for entry in &self.investigations {
            *stats
                .verdicts
                .entry(entry.value().verdict.as_str().to_owned())
                .or_default() += 1;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use vigil_core::{
        ActionOutcome, GateLevel, SensorId, Severity, SeverityThresholds,
    };

    use super::*;

    fn make_alert(score: f64) -> AlertEvent {
        AlertEvent::new(
            "192.0.2.1".parse().unwrap(),
            "10.0.0.5".parse().unwrap(),
            "tcp",
            BTreeMap::new(),
            score,
            score,
            &SeverityThresholds::default(),
            SensorId::new("s1"),
        )
    }

    fn make_action(alert_id: &AlertId) -> ActionRecord {
        ActionRecord::executed(
            alert_id.clone(),
            "block_ip",
            "192.0.2.1",
            serde_json::json!({}),
            &ActionOutcome::reversible("installed", "tok"),
            GateLevel::Low,
        )
    }

    #[tokio::test]
    async fn save_alert_is_idempotent() {
        let repo = MemoryRepository::new();
        let alert = make_alert(0.9);

        assert!(repo.save_alert(&alert).await.unwrap());
        assert!(!repo.save_alert(&alert).await.unwrap(), "duplicate id is a no-op");
        assert_eq!(repo.count_alerts().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn one_investigation_per_alert() {
        let repo = MemoryRepository::new();
        let alert = make_alert(0.9);
        let report = InvestigationReport::from_alert_only(
            alert.id.clone(),
            0.9,
            Severity::High,
            BTreeMap::new(),
        );

        assert!(repo.save_investigation(&report).await.unwrap());
        assert!(!repo.save_investigation(&report).await.unwrap());
        assert_eq!(repo.count_investigations().await.unwrap(), 1);
        assert!(repo.get_investigation(&alert.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn actions_join_on_alert() {
        let repo = MemoryRepository::new();
        let alert = make_alert(0.9);
        let a1 = make_action(&alert.id);
        let a2 = make_action(&alert.id);

        repo.save_action(&a1).await.unwrap();
        repo.save_action(&a2).await.unwrap();

        let joined = repo.actions_for_alert(&alert.id).await.unwrap();
        assert_eq!(joined.len(), 2);
        assert_eq!(joined[0].action_id, a1.action_id, "insertion order preserved");
    }

    #[tokio::test]
    async fn listing_is_newest_first_and_paginated() {
        let repo = MemoryRepository::new();
        for i in 0..10 {
            let mut alert = make_alert(0.5);
            alert.ts += chrono::Duration::seconds(i);
            repo.save_alert(&alert).await.unwrap();
        }

        let page = repo.list_alerts(3, 2).await.unwrap();
        assert_eq!(page.total, 10);
        assert_eq!(page.items.len(), 3);
        assert_eq!(page.limit, 3);
        assert_eq!(page.offset, 2);
        assert!(page.items[0].ts > page.items[1].ts);
    }

    #[tokio::test]
    async fn stats_break_down_by_severity_and_type() {
        let repo = MemoryRepository::new();
        let high = make_alert(0.9);
        let low = make_alert(0.1);
        repo.save_alert(&high).await.unwrap();
        repo.save_alert(&low).await.unwrap();
        repo.save_action(&make_action(&high.id)).await.unwrap();

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.alerts, 2);
        assert_eq!(stats.alert_severities.get("high"), Some(&1));
        assert_eq!(stats.alert_severities.get("low"), Some(&1));
        assert_eq!(stats.action_types.get("block_ip"), Some(&1));
    }
}
