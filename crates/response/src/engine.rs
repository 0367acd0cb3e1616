use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, instrument, warn};

use vigil_bus::{EventBus, EventHandler, SubscriptionHandle, Topic};
use vigil_core::{
    ActionOutcome, ActionRecord, ActionId, InvestigationReport, RiskThresholds,
};
use vigil_store::Repository;

use crate::actions::ActionRegistry;
use crate::advisor::PolicyAdvisor;
use crate::dataplane::DataPlane;
use crate::error::ResponseError;
use crate::gate::SafetyGate;
use crate::matrix::DecisionMatrix;

/// Response tuning. Immutable after startup.
#[derive(Debug, Clone)]
pub struct ResponseConfig {
    pub matrix: DecisionMatrix,
    /// Buckets a report's risk score onto the matrix's secondary axis.
    pub risk: RiskThresholds,
    /// Per-action execution deadline.
    pub execution_deadline: Duration,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            matrix: DecisionMatrix::default(),
            risk: RiskThresholds::default(),
            execution_deadline: Duration::from_secs(5),
        }
    }
}

/// Operational counters for the stats surface.
#[derive(Debug, Default)]
pub struct ResponseCounters {
    pub reports_handled: AtomicU64,
    pub actions_executed: AtomicU64,
    pub actions_failed: AtomicU64,
    pub actions_timed_out: AtomicU64,
    pub reverts: AtomicU64,
    pub records_dropped: AtomicU64,
}

/// The response engine: subscribes to `investigations`, selects an action
/// from the decision matrix (optionally nudged by an advisor), applies the
/// safety gate, executes with a deadline, and appends the audit record.
///
/// Any two actions against the same target are serialized through a
/// per-target lock; independent targets run concurrently.
pub struct ResponseEngine {
    config: ResponseConfig,
    gate: SafetyGate,
    registry: Arc<ActionRegistry>,
    advisor: Arc<dyn PolicyAdvisor>,
    plane: Arc<DataPlane>,
    bus: Arc<dyn EventBus>,
    repository: Arc<dyn Repository>,
    counters: Arc<ResponseCounters>,
    target_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    in_flight: Mutex<HashSet<String>>,
    tracker: TaskTracker,
}

impl std::fmt::Debug for ResponseEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseEngine").finish_non_exhaustive()
    }
}

impl ResponseEngine {
    /// Build the engine, validating the decision matrix against the
    /// registry. Unknown action types are a fatal configuration error.
    pub fn new(
        config: ResponseConfig,
        gate: SafetyGate,
        registry: ActionRegistry,
        advisor: Arc<dyn PolicyAdvisor>,
        plane: Arc<DataPlane>,
        bus: Arc<dyn EventBus>,
        repository: Arc<dyn Repository>,
    ) -> Result<Arc<Self>, ResponseError> {
        config.matrix.validate(&registry)?;
        // The gate downgrades into these two; a registry without them could
        // dispatch into a hole.
        for required in ["log_only", "rate_limit"] {
            if !registry.contains(required) {
                return Err(ResponseError::UnknownActionType(required.to_owned()));
            }
        }

        Ok(Arc::new(Self {
            config,
            gate,
            registry: Arc::new(registry),
            advisor,
            plane,
            bus,
            repository,
            counters: Arc::new(ResponseCounters::default()),
            target_locks: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            tracker: TaskTracker::new(),
        }))
    }

    #[must_use]
    pub fn counters(&self) -> Arc<ResponseCounters> {
        Arc::clone(&self.counters)
    }

    /// Subscribe to the `investigations` topic and start dispatching.
    pub async fn start(self: &Arc<Self>) -> Result<SubscriptionHandle, vigil_bus::BusError> {
        let handler = Arc::new(ReportHandler {
            engine: Arc::clone(self),
        });
        self.bus.subscribe(&Topic::investigations(), handler).await
    }

    /// Wait for in-flight dispatches to finish.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    fn lock_for(&self, target: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.target_locks
                .lock()
                .entry(target.to_owned())
                .or_default(),
        )
    }

    /// Decide and execute the response for one report.
    #[instrument(skip_all, fields(alert_id = %report.alert_id))]
    pub async fn respond(&self, report: &InvestigationReport) {
        self.counters.reports_handled.fetch_add(1, Ordering::Relaxed);

        let alert = match self.repository.get_alert(&report.alert_id).await {
            Ok(Some(alert)) => alert,
            Ok(None) => {
                warn!("report references unknown alert, dropped");
                return;
            }
            Err(e) => {
                warn!(error = %e, "alert lookup failed, report dropped");
                return;
            }
        };
        let target_ip = alert.src_ip;
        let target = target_ip.to_string();

        let risk_bucket = self.config.risk.bucket(report.risk_score);
        let matrix_selection = self
            .config
            .matrix
            .select(report.alert_severity, risk_bucket)
            .to_owned();

        let selected = match self
            .advisor
            .advise(report, risk_bucket, &matrix_selection)
        {
            Some(advised) if self.registry.contains(&advised) => advised,
            Some(advised) => {
                warn!(advised, "advisor proposed unregistered action, ignored");
                matrix_selection.clone()
            }
            None => matrix_selection.clone(),
        };

        let decision = self
            .gate
            .apply(&selected, target_ip, report.confidence, &self.registry);

        let mut parameters = serde_json::json!({
            "gate_trace": decision.trace,
            "risk_bucket": risk_bucket,
            "matrix_selection": matrix_selection,
        });
        if selected != matrix_selection {
            parameters["advised"] = serde_json::Value::String(selected.clone());
        }
        if !self.plane.is_production() {
            parameters["simulated"] = serde_json::Value::Bool(true);
        }

        // Validated at startup plus the gate's own fallbacks, so this only
        // trips if a registry was swapped out from under us.
        let Some(action) = self.registry.get(&decision.action_type) else {
            error!(action_type = %decision.action_type, "selected action disappeared from registry");
            return;
        };

        let lock = self.lock_for(&target);
        let _guard = lock.lock().await;

        let outcome = match tokio::time::timeout(
            self.config.execution_deadline,
            action.execute(&target, &parameters),
        )
        .await
        {
            Ok(Ok(outcome)) => {
                self.counters.actions_executed.fetch_add(1, Ordering::Relaxed);
                outcome
            }
            Ok(Err(e)) => {
                self.counters.actions_failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, action_type = %decision.action_type, "action failed");
                ActionOutcome::irreversible(format!("error:{}", e.kind()))
            }
            Err(_) => {
                self.counters.actions_timed_out.fetch_add(1, Ordering::Relaxed);
                warn!(action_type = %decision.action_type, "action deadline missed, aborted");
                ActionOutcome::irreversible("timeout")
            }
        };

        let record = ActionRecord::executed(
            report.alert_id.clone(),
            decision.action_type,
            target,
            parameters,
            &outcome,
            decision.level,
        );
        self.emit(record).await;
    }

    /// Revert a previously executed action by id.
    ///
    /// Reverting an already-reverted action is a no-op that returns the
    /// existing revert record.
    pub async fn revert(&self, action_id: &ActionId) -> Result<ActionRecord, ResponseError> {
        let record = self
            .repository
            .get_action(action_id)
            .await
            .map_err(|e| ResponseError::Store(e.to_string()))?
            .ok_or_else(|| ResponseError::UnknownAction(action_id.to_string()))?;

        if record.reverted {
            return Err(ResponseError::NotReversible(format!(
                "{action_id} is itself a revert record"
            )));
        }

        let siblings = self
            .repository
            .actions_for_alert(&record.alert_id)
            .await
            .map_err(|e| ResponseError::Store(e.to_string()))?;
        if let Some(existing) = siblings.into_iter().find(|r| {
            r.reverted && r.parameters["reverts"] == serde_json::json!(record.action_id)
        }) {
            debug!(action_id = %action_id, "already reverted, returning existing record");
            return Ok(existing);
        }

        if !record.reversible {
            return Err(ResponseError::NotReversible(action_id.to_string()));
        }
        let token = record
            .revert_token
            .clone()
            .ok_or_else(|| ResponseError::NotReversible(action_id.to_string()))?;
        let action = self
            .registry
            .get(&record.action_type)
            .ok_or_else(|| ResponseError::UnknownActionType(record.action_type.clone()))?;

        let lock = self.lock_for(&record.target);
        let _guard = lock.lock().await;

        let result = tokio::time::timeout(self.config.execution_deadline, action.revert(&token))
            .await
            .map_err(|_| ResponseError::Execution("revert deadline missed".into()))??;

        self.counters.reverts.fetch_add(1, Ordering::Relaxed);
        let revert_record = ActionRecord::reverted_from(&record, result);
        self.emit(revert_record.clone()).await;
        Ok(revert_record)
    }

    /// Persist first (idempotent), publish only on fresh insert.
    async fn emit(&self, record: ActionRecord) {
        let mut saved = self.repository.save_action(&record).await;
        if saved.is_err() {
            saved = self.repository.save_action(&record).await;
        }
        match saved {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                self.counters.records_dropped.fetch_add(1, Ordering::Relaxed);
                error!(action_id = %record.action_id, error = %e, "action record could not be persisted");
                return;
            }
        }

        match serde_json::to_value(&record) {
            Ok(payload) => {
                if let Err(e) = self.bus.publish(&Topic::actions(), payload).await {
                    warn!(action_id = %record.action_id, error = %e, "action record publish dropped");
                }
            }
            Err(e) => {
                error!(action_id = %record.action_id, error = %e, "action record serialization failed");
            }
        }
    }

    /// Replay guard: true when this report already produced a live action.
    async fn already_responded(&self, report: &InvestigationReport) -> bool {
        match self.repository.actions_for_alert(&report.alert_id).await {
            Ok(records) => records.iter().any(|r| !r.reverted),
            Err(e) => {
                warn!(error = %e, "action lookup failed, assuming fresh report");
                false
            }
        }
    }
}

/// Bus handler: decisions stay serial, execution offloads per target.
struct ReportHandler {
    engine: Arc<ResponseEngine>,
}

#[async_trait]
impl EventHandler for ReportHandler {
    async fn handle(&self, _topic: &Topic, payload: serde_json::Value) {
        let report: InvestigationReport = match serde_json::from_value(payload) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "undecodable report payload dropped");
                return;
            }
        };

        let alert_key = report.alert_id.as_str().to_owned();
        if self.engine.already_responded(&report).await {
            debug!(alert_id = %report.alert_id, "report already actioned, replay ignored");
            return;
        }
        {
            let mut in_flight = self.engine.in_flight.lock();
            if !in_flight.insert(alert_key.clone()) {
                return;
            }
        }

        let engine = Arc::clone(&self.engine);
        self.engine.tracker.spawn(async move {
            engine.respond(&report).await;
            engine.in_flight.lock().remove(&alert_key);
        });
    }
}
