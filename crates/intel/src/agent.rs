use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, instrument, warn};

use vigil_bus::{EventBus, EventHandler, SubscriptionHandle, Topic};
use vigil_core::{AlertEvent, InvestigationReport, VerdictThresholds};
use vigil_store::Repository;

use crate::cache::IntelCache;
use crate::error::IntelError;
use crate::fusion::fuse;
use crate::provider::IntelProvider;
use crate::ratelimit::TokenBucket;

/// Investigation tuning. Immutable after startup.
#[derive(Debug, Clone)]
pub struct IntelConfig {
    /// Weight of the alert's model score in the fused risk score.
    pub alpha: f64,
    /// Verdict bucketing thresholds.
    pub verdict: VerdictThresholds,
    /// Shared deadline for the whole provider fan-out.
    pub fanout_timeout: Duration,
    /// Concurrent investigations in flight.
    pub max_concurrent: usize,
}

impl Default for IntelConfig {
    fn default() -> Self {
        Self {
            alpha: 0.4,
            verdict: VerdictThresholds::default(),
            fanout_timeout: Duration::from_secs(3),
            max_concurrent: 16,
        }
    }
}

/// One enabled provider with its private rate limiter.
pub struct ProviderHandle {
    pub provider: Arc<dyn IntelProvider>,
    pub limiter: TokenBucket,
}

/// Operational counters for the stats surface.
#[derive(Debug, Default)]
pub struct IntelCounters {
    pub investigations: AtomicU64,
    pub provider_errors: AtomicU64,
    pub rate_limited: AtomicU64,
    pub reports_dropped: AtomicU64,
}

/// The investigation agent: subscribes to `alerts`, fans out to providers,
/// fuses, and emits one report per alert on `investigations`.
pub struct InvestigationAgent {
    config: IntelConfig,
    providers: Vec<Arc<ProviderHandle>>,
    cache: Arc<IntelCache>,
    bus: Arc<dyn EventBus>,
    repository: Arc<dyn Repository>,
    counters: Arc<IntelCounters>,
    semaphore: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl std::fmt::Debug for InvestigationAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvestigationAgent").finish_non_exhaustive()
    }
}

impl InvestigationAgent {
    #[must_use]
    pub fn new(
        config: IntelConfig,
        providers: Vec<ProviderHandle>,
        cache: Arc<IntelCache>,
        bus: Arc<dyn EventBus>,
        repository: Arc<dyn Repository>,
    ) -> Arc<Self> {
        let permits = config.max_concurrent.max(1);
        Arc::new(Self {
            config,
            providers: providers.into_iter().map(Arc::new).collect(),
            cache,
            bus,
            repository,
            counters: Arc::new(IntelCounters::default()),
            semaphore: Arc::new(Semaphore::new(permits)),
            tracker: TaskTracker::new(),
        })
    }

    #[must_use]
    pub fn counters(&self) -> Arc<IntelCounters> {
        Arc::clone(&self.counters)
    }

    /// Subscribe to the `alerts` topic and start investigating.
    pub async fn start(self: &Arc<Self>) -> Result<SubscriptionHandle, vigil_bus::BusError> {
        let handler = Arc::new(AlertHandler {
            agent: Arc::clone(self),
        });
        self.bus.subscribe(&Topic::alerts(), handler).await
    }

    /// Wait for in-flight investigations to finish.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Investigate one alert: concurrent provider fan-out under a common
    /// deadline, then fusion.
    #[instrument(skip_all, fields(alert_id = %alert.id, ip = %alert.src_ip))]
    pub async fn investigate(&self, alert: &AlertEvent) -> InvestigationReport {
        let ip = alert.src_ip;
        let total = self.providers.len();
        let mut findings: BTreeMap<String, serde_json::Value> = BTreeMap::new();
        let mut scores: Vec<f64> = Vec::new();
        let mut sources: Vec<String> = Vec::new();

        let mut fanout: JoinSet<(String, Result<crate::Finding, IntelError>)> = JoinSet::new();
        for handle in &self.providers {
            let name = handle.provider.name().to_owned();

            // Cache first: a hit spends no rate-limit token and no network.
            if let Some(found) = self.cache.peek(&name, ip).await {
                scores.push(found.normalized_score);
                sources.push(name.clone());
                record_finding(&mut findings, &name, &found);
                continue;
            }

            if !handle.limiter.try_acquire() {
                self.counters.rate_limited.fetch_add(1, Ordering::Relaxed);
                findings.insert(name, serde_json::json!({ "error": "rate_limited" }));
                continue;
            }

            let cache = Arc::clone(&self.cache);
            let handle = Arc::clone(handle);
            fanout.spawn(async move {
                let result = cache.get_or_fetch(&handle.provider, ip).await;
                (name, result)
            });
        }

        let deadline = tokio::time::Instant::now() + self.config.fanout_timeout;
        while !fanout.is_empty() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, fanout.join_next()).await {
                Ok(Some(Ok((name, Ok(found))))) => {
                    scores.push(found.normalized_score);
                    sources.push(name.clone());
                    record_finding(&mut findings, &name, &found);
                }
                Ok(Some(Ok((name, Err(e))))) => {
                    self.counters.provider_errors.fetch_add(1, Ordering::Relaxed);
                    debug!(provider = %name, error = %e, "provider lookup failed");
                    findings.insert(name, serde_json::json!({ "error": e.to_string() }));
                }
                Ok(Some(Err(e))) => {
                    self.counters.provider_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "provider task failed");
                }
                Ok(None) => break,
                Err(_) => {
                    warn!("fan-out deadline hit, proceeding with partial results");
                    fanout.abort_all();
                    break;
                }
            }
        }
        // Providers that neither answered nor errored ran out of time.
        for handle in &self.providers {
            let name = handle.provider.name();
            if !findings.contains_key(name) {
                findings.insert(name.to_owned(), serde_json::json!({ "error": "timeout" }));
            }
        }

        self.counters.investigations.fetch_add(1, Ordering::Relaxed);

        if scores.is_empty() {
            return InvestigationReport::from_alert_only(
                alert.id.clone(),
                alert.model_score,
                alert.severity,
                findings,
            );
        }

        let fused = fuse(
            alert.model_score,
            &scores,
            total,
            self.config.alpha,
            &self.config.verdict,
        );
        InvestigationReport {
            alert_id: alert.id.clone(),
            ts: Utc::now(),
            ioc_findings: findings,
            notes: format!("{}/{total} providers answered", sources.len()),
            sources,
            risk_score: fused.risk_score,
            verdict: fused.verdict,
            uncertainty: fused.uncertainty,
            confidence: fused.confidence,
            alert_severity: alert.severity,
        }
    }

    /// Persist first (idempotent on alert id), publish only on fresh insert.
    async fn emit(&self, report: InvestigationReport) {
        let mut saved = self.repository.save_investigation(&report).await;
        if saved.is_err() {
            saved = self.repository.save_investigation(&report).await;
        }
        match saved {
            Ok(true) => {}
            Ok(false) => {
                debug!(alert_id = %report.alert_id, "alert already investigated, replay ignored");
                return;
            }
            Err(e) => {
                self.counters.reports_dropped.fetch_add(1, Ordering::Relaxed);
                error!(alert_id = %report.alert_id, error = %e, "report could not be persisted, dropped");
                return;
            }
        }

        let payload = match serde_json::to_value(&report) {
            Ok(p) => p,
            Err(e) => {
                self.counters.reports_dropped.fetch_add(1, Ordering::Relaxed);
                error!(alert_id = %report.alert_id, error = %e, "report serialization failed");
                return;
            }
        };
        if let Err(e) = self.bus.publish(&Topic::investigations(), payload).await {
            self.counters.reports_dropped.fetch_add(1, Ordering::Relaxed);
            warn!(alert_id = %report.alert_id, error = %e, "report publish dropped");
        }
    }
}

fn record_finding(
    findings: &mut BTreeMap<String, serde_json::Value>,
    name: &str,
    found: &crate::Finding,
) {
    match serde_json::to_value(found) {
        Ok(v) => {
            findings.insert(name.to_owned(), v);
        }
        Err(e) => {
            warn!(provider = %name, error = %e, "finding not serializable");
        }
    }
}

/// Bus handler: parse the alert, then hand off to a bounded investigation
/// task so slow providers never stall alert delivery.
struct AlertHandler {
    agent: Arc<InvestigationAgent>,
}

#[async_trait]
impl EventHandler for AlertHandler {
    async fn handle(&self, _topic: &Topic, payload: serde_json::Value) {
        let alert: AlertEvent = match serde_json::from_value(payload) {
            Ok(a) => a,
            Err(e) => {
                warn!(error = %e, "undecodable alert payload dropped");
                return;
            }
        };

        let Ok(permit) = Arc::clone(&self.agent.semaphore).acquire_owned().await else {
            return;
        };
        let agent = Arc::clone(&self.agent);
        self.agent.tracker.spawn(async move {
            let report = agent.investigate(&alert).await;
            agent.emit(report).await;
            drop(permit);
        });
    }
}
