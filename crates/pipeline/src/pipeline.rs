use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use vigil_bus::{EventBus, Topic};
use vigil_detect::{DetectCounters, DetectionEngine, PacketSource};
use vigil_intel::{IntelCounters, InvestigationAgent};
use vigil_response::{ResponseCounters, ResponseEngine};
use vigil_store::Repository;

use crate::error::PipelineError;
use crate::snapshot::StatsSnapshot;

/// The assembled pipeline. Workers run under one tracker; `shutdown`
/// cancels them, drains in-flight work and closes the bus.
pub struct Pipeline {
    bus: Arc<dyn EventBus>,
    repository: Arc<dyn Repository>,
    detection: Arc<DetectionEngine>,
    agent: Arc<InvestigationAgent>,
    response: Arc<ResponseEngine>,
    detect_counters: Arc<DetectCounters>,
    intel_counters: Arc<IntelCounters>,
    response_counters: Arc<ResponseCounters>,
    stats_interval: Duration,
    cancel: CancellationToken,
    /// The detection worker; waited on by replay runs.
    detect_tracker: TaskTracker,
    /// Auxiliary tasks (stats publisher) that only stop on shutdown.
    aux_tracker: TaskTracker,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").finish_non_exhaustive()
    }
}

impl Pipeline {
    pub(crate) fn assemble(
        bus: Arc<dyn EventBus>,
        repository: Arc<dyn Repository>,
        detection: Arc<DetectionEngine>,
        agent: Arc<InvestigationAgent>,
        response: Arc<ResponseEngine>,
        stats_interval: Duration,
    ) -> Self {
        let detect_counters = detection.counters();
        let intel_counters = agent.counters();
        let response_counters = response.counters();
        Self {
            bus,
            repository,
            detection,
            agent,
            response,
            detect_counters,
            intel_counters,
            response_counters,
            stats_interval,
            cancel: CancellationToken::new(),
            detect_tracker: TaskTracker::new(),
            aux_tracker: TaskTracker::new(),
        }
    }

    #[must_use]
    pub fn repository(&self) -> Arc<dyn Repository> {
        Arc::clone(&self.repository)
    }

    #[must_use]
    pub fn bus(&self) -> Arc<dyn EventBus> {
        Arc::clone(&self.bus)
    }

    /// The response engine, exposed for the revert API surface.
    #[must_use]
    pub fn response(&self) -> Arc<ResponseEngine> {
        Arc::clone(&self.response)
    }

    /// Subscribe the downstream stages and start ingesting packets.
    pub async fn start(&self, source: Box<dyn PacketSource>) -> Result<(), PipelineError> {
        // Downstream first so the first alert finds its subscribers.
        self.agent.start().await?;
        self.response.start().await?;

        let detection = Arc::clone(&self.detection);
        let cancel = self.cancel.child_token();
        self.detect_tracker.spawn(async move {
            if let Err(e) = detection.run(source, cancel).await {
                error!(error = %e, "detection engine failed");
            }
        });

        let publisher = StatsPublisher {
            bus: Arc::clone(&self.bus),
            detect: Arc::clone(&self.detect_counters),
            intel: Arc::clone(&self.intel_counters),
            response: Arc::clone(&self.response_counters),
        };
        let interval = self.stats_interval;
        let cancel = self.cancel.child_token();
        self.aux_tracker.spawn(async move {
            publisher.run(interval, cancel).await;
        });

        info!("pipeline started");
        Ok(())
    }

    /// Current counter snapshot.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        snapshot_from(
            &self.detect_counters,
            &self.intel_counters,
            &self.response_counters,
            self.bus.as_ref(),
        )
    }

    /// Wait for the detection source to run dry and all emitted work to be
    /// actioned (used by replay runs and tests).
    pub async fn run_to_completion(&self) {
        self.detect_tracker.close();
        self.detect_tracker.wait().await;
        // Alerts may still sit in bus queues after the source runs dry;
        // settle each stage boundary before draining the next stage.
        self.quiesce_bus().await;
        self.agent.drain().await;
        self.quiesce_bus().await;
        self.response.drain().await;
        self.quiesce_bus().await;
    }

    /// Wait until bus traffic stops moving for a few polls.
    async fn quiesce_bus(&self) {
        let mut last = (0u64, 0u64);
        let mut stable = 0u32;
        for _ in 0..500 {
            let counters = self.bus.counters();
            let now = (counters.published(), counters.delivered());
            if now == last {
                stable += 1;
                if stable >= 3 {
                    return;
                }
            } else {
                stable = 0;
                last = now;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Cancel workers, drain in-flight handlers and close the bus.
    pub async fn shutdown(&self) {
        info!("pipeline shutting down");
        self.cancel.cancel();
        self.detect_tracker.close();
        self.aux_tracker.close();
        if tokio::time::timeout(Duration::from_secs(10), async {
            self.detect_tracker.wait().await;
            self.aux_tracker.wait().await;
        })
        .await
        .is_err()
        {
            warn!("pipeline workers did not stop in time");
        }
        self.agent.drain().await;
        self.response.drain().await;
        self.bus.close().await;
    }
}

struct StatsPublisher {
    bus: Arc<dyn EventBus>,
    detect: Arc<DetectCounters>,
    intel: Arc<IntelCounters>,
    response: Arc<ResponseCounters>,
}

impl StatsPublisher {
    async fn run(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let snapshot =
                snapshot_from(&self.detect, &self.intel, &self.response, self.bus.as_ref());
            match serde_json::to_value(&snapshot) {
                Ok(payload) => {
                    // Best effort; a full stats queue should never stall the
                    // pipeline.
                    let _ = self.bus.publish(&Topic::stats(), payload).await;
                }
                Err(e) => error!(error = %e, "stats snapshot serialization failed"),
            }
        }
    }
}

fn snapshot_from(
    detect: &DetectCounters,
    intel: &IntelCounters,
    response: &ResponseCounters,
    bus: &dyn EventBus,
) -> StatsSnapshot {
    let bus_counters = bus.counters();
    StatsSnapshot {
        ts: Utc::now(),
        packets: detect.packets.load(Ordering::Relaxed),
        malformed_packets: detect.malformed.load(Ordering::Relaxed),
        flows_evicted: detect.flows_evicted.load(Ordering::Relaxed),
        alerts_emitted: detect.alerts_emitted.load(Ordering::Relaxed),
        alerts_dropped: detect.alerts_dropped.load(Ordering::Relaxed),
        investigations: intel.investigations.load(Ordering::Relaxed),
        provider_errors: intel.provider_errors.load(Ordering::Relaxed),
        rate_limited_lookups: intel.rate_limited.load(Ordering::Relaxed),
        reports_handled: response.reports_handled.load(Ordering::Relaxed),
        actions_executed: response.actions_executed.load(Ordering::Relaxed),
        actions_failed: response.actions_failed.load(Ordering::Relaxed),
        actions_timed_out: response.actions_timed_out.load(Ordering::Relaxed),
        reverts: response.reverts.load(Ordering::Relaxed),
        bus_published: bus_counters.published(),
        bus_delivered: bus_counters.delivered(),
        bus_dropped: bus_counters.dropped(),
        broker_fallbacks: bus_counters.broker_fallbacks(),
    }
}
