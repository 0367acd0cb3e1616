use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use vigil_bus::{EventBus, Topic};
use vigil_core::{AlertEvent, SensorId, SeverityThresholds};
use vigil_store::Repository;

use crate::batcher::ScoreBatcher;
use crate::error::DetectError;
use crate::features::{FeatureScaler, FeatureVector};
use crate::flow::{Flow, FlowKey, FlowTable};
use crate::scorer::Scorer;
use crate::source::PacketSource;

/// Detection tuning. Immutable after startup.
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Evict flows idle longer than this.
    pub flow_idle_timeout: Duration,
    /// Flow table capacity; beyond it the least-recently-seen flow is
    /// evicted.
    pub max_flows: usize,
    /// Re-emit active flows for scoring at this cadence to bound latency.
    pub flush_interval: Duration,
    /// Micro-batch capacity.
    pub batch_size: usize,
    /// Dispatch a partial batch this long after its first vector.
    pub batch_timeout: Duration,
    /// Alerts are emitted only at or above this score.
    pub emit_threshold: f64,
    /// Severity bucketing thresholds.
    pub severity: SeverityThresholds,
    /// Number of scoring workers.
    pub scoring_workers: usize,
    /// Sensor identity stamped on every alert.
    pub sensor_id: SensorId,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            flow_idle_timeout: Duration::from_secs(30),
            max_flows: 100_000,
            flush_interval: Duration::from_secs(2),
            batch_size: 64,
            batch_timeout: Duration::from_millis(100),
            emit_threshold: 0.3,
            severity: SeverityThresholds::default(),
            scoring_workers: std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(4),
            sensor_id: SensorId::new("sensor-0"),
        }
    }
}

/// Operational counters for the stats surface.
#[derive(Debug, Default)]
pub struct DetectCounters {
    pub packets: AtomicU64,
    pub malformed: AtomicU64,
    pub flows_evicted: AtomicU64,
    pub batches_scored: AtomicU64,
    pub vectors_discarded: AtomicU64,
    pub alerts_emitted: AtomicU64,
    pub alerts_dropped: AtomicU64,
}

/// The detection engine: one ingest worker owning the flow table, a pool of
/// scoring workers fed over per-worker channels keyed by flow so each flow's
/// alerts stay ordered.
pub struct DetectionEngine {
    config: DetectionConfig,
    scorer: Arc<dyn Scorer>,
    scaler: Option<FeatureScaler>,
    bus: Arc<dyn EventBus>,
    repository: Arc<dyn Repository>,
    counters: Arc<DetectCounters>,
}

impl std::fmt::Debug for DetectionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionEngine").finish_non_exhaustive()
    }
}

impl DetectionEngine {
    #[must_use]
    pub fn new(
        config: DetectionConfig,
        scorer: Arc<dyn Scorer>,
        scaler: Option<FeatureScaler>,
        bus: Arc<dyn EventBus>,
        repository: Arc<dyn Repository>,
    ) -> Self {
        Self {
            config,
            scorer,
            scaler,
            bus,
            repository,
            counters: Arc::new(DetectCounters::default()),
        }
    }

    #[must_use]
    pub fn counters(&self) -> Arc<DetectCounters> {
        Arc::clone(&self.counters)
    }

    /// Run ingestion until the source ends or `cancel` fires, then drain.
    ///
    /// Returning means the engine is idle: all flows were flushed, all
    /// batches scored, all alerts emitted.
    #[instrument(skip_all)]
    pub async fn run(
        &self,
        mut source: Box<dyn PacketSource>,
        cancel: CancellationToken,
    ) -> Result<(), DetectError> {
        let workers = self.config.scoring_workers.max(1);

        let mut senders = Vec::with_capacity(workers);
        let mut pool = JoinSet::new();
        for worker in 0..workers {
            let (tx, rx) = mpsc::channel::<Vec<FeatureVector>>(8);
            senders.push(tx);
            pool.spawn(scoring_worker(
                worker,
                rx,
                Arc::clone(&self.scorer),
                self.scaler.clone(),
                Arc::clone(&self.bus),
                Arc::clone(&self.repository),
                Arc::clone(&self.counters),
                self.config.clone(),
            ));
        }

        self.ingest(source.as_mut(), &senders, &cancel).await;

        // Close the channels so workers drain their queues and exit.
        drop(senders);
        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "scoring worker failed");
            }
        }
        info!("detection engine idle");
        Ok(())
    }

    /// The single ingest worker: owns the flow table, routes snapshots into
    /// per-worker batchers keyed by flow.
    async fn ingest(
        &self,
        source: &mut dyn PacketSource,
        senders: &[mpsc::Sender<Vec<FeatureVector>>],
        cancel: &CancellationToken,
    ) {
        let workers = senders.len();
        let mut table = FlowTable::new(self.config.max_flows, self.config.flow_idle_timeout);
        let mut batchers: Vec<ScoreBatcher> = (0..workers)
            .map(|_| ScoreBatcher::new(self.config.batch_size, self.config.batch_timeout))
            .collect();
        // First flush one full interval in, not immediately.
        let mut flush = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.flush_interval,
            self.config.flush_interval,
        );
        flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Event-time watermark: the newest packet timestamp seen.
        let mut watermark = 0.0f64;

        loop {
            let batch_deadline = batchers.iter().filter_map(ScoreBatcher::deadline).min();
            let far_future = tokio::time::Instant::now() + Duration::from_secs(86_400);

            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("ingest cancelled");
                    break;
                }
                packet = source.next_packet() => match packet {
                    Ok(Some(pkt)) => {
                        if !pkt.is_valid() {
                            self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                            warn!("malformed packet dropped");
                            continue;
                        }
                        self.counters.packets.fetch_add(1, Ordering::Relaxed);
                        watermark = watermark.max(pkt.ts);
                        if let Some((key, flow)) = table.upsert(&pkt) {
                            self.counters.flows_evicted.fetch_add(1, Ordering::Relaxed);
                            route(&mut batchers, senders, key, &flow).await;
                        }
                    }
                    Ok(None) => {
                        debug!("packet source ended");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "packet source error, stream abandoned");
                        break;
                    }
                },
                _ = flush.tick() => {
                    for (key, flow) in table.sweep_idle(watermark) {
                        self.counters.flows_evicted.fetch_add(1, Ordering::Relaxed);
                        route(&mut batchers, senders, key, &flow).await;
                    }
                    for (key, flow) in table.take_dirty() {
                        route(&mut batchers, senders, key, &flow).await;
                    }
                }
                () = tokio::time::sleep_until(batch_deadline.unwrap_or(far_future)),
                        if batch_deadline.is_some() => {
                    let now = tokio::time::Instant::now();
                    for (worker, batcher) in batchers.iter_mut().enumerate() {
                        if let Some(batch) = batcher.take_if_due(now) {
                            dispatch(senders, worker, batch).await;
                        }
                    }
                }
            }
        }

        // Final flush: every tracked flow gets one last scoring pass.
        for (key, flow) in table.drain_all() {
            route(&mut batchers, senders, key, &flow).await;
        }
        for (worker, batcher) in batchers.iter_mut().enumerate() {
            if let Some(batch) = batcher.take() {
                dispatch(senders, worker, batch).await;
            }
        }
    }
}

/// Pick the scoring worker for a flow. Affinity by key keeps one flow's
/// snapshots on one worker, preserving per-flow alert order.
fn worker_for(key: &FlowKey, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % workers as u64) as usize
}

async fn route(
    batchers: &mut [ScoreBatcher],
    senders: &[mpsc::Sender<Vec<FeatureVector>>],
    key: FlowKey,
    flow: &Flow,
) {
    let worker = worker_for(&key, senders.len());
    let vector = FeatureVector::from_flow(key, flow);
    if let Some(batch) = batchers[worker].push(vector) {
        dispatch(senders, worker, batch).await;
    }
}

async fn dispatch(
    senders: &[mpsc::Sender<Vec<FeatureVector>>],
    worker: usize,
    batch: Vec<FeatureVector>,
) {
    if senders[worker].send(batch).await.is_err() {
        warn!(worker, "scoring worker gone, batch dropped");
    }
}

/// One scoring worker: scale, score, emit alerts above the threshold.
#[allow(clippy::too_many_arguments)]
async fn scoring_worker(
    worker: usize,
    mut rx: mpsc::Receiver<Vec<FeatureVector>>,
    scorer: Arc<dyn Scorer>,
    scaler: Option<FeatureScaler>,
    bus: Arc<dyn EventBus>,
    repository: Arc<dyn Repository>,
    counters: Arc<DetectCounters>,
    config: DetectionConfig,
) {
    while let Some(batch) = rx.recv().await {
        let scoring_input = if let Some(scaler) = &scaler {
            let mut scaled = batch.clone();
            for fv in &mut scaled {
                scaler.apply(&mut fv.values);
            }
            scaled
        } else {
            batch.clone()
        };

        let scores = match scorer.score_batch(&scoring_input) {
            Ok(scores) if scores.len() == batch.len() => scores,
            Ok(scores) => {
                counters
                    .vectors_discarded
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
                warn!(
                    worker,
                    expected = batch.len(),
                    got = scores.len(),
                    "scorer returned wrong batch shape, batch discarded"
                );
                continue;
            }
            Err(e) => {
                counters
                    .vectors_discarded
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
                warn!(worker, error = %e, "scorer failed, batch discarded");
                continue;
            }
        };
        counters.batches_scored.fetch_add(1, Ordering::Relaxed);

        for (fv, score) in batch.into_iter().zip(scores) {
            if !score.is_finite() || !(0.0..=1.0).contains(&score) {
                counters.vectors_discarded.fetch_add(1, Ordering::Relaxed);
                warn!(worker, score, "out-of-range score, vector discarded");
                continue;
            }
            if score < config.emit_threshold {
                continue;
            }

            let confidence = if scorer.is_probabilistic() {
                score.max(1.0 - score)
            } else {
                score
            };
            let alert = AlertEvent::new(
                fv.key.src_ip,
                fv.key.dst_ip,
                fv.key.proto.as_str(),
                fv.named(),
                score,
                confidence,
                &config.severity,
                config.sensor_id.clone(),
            );
            emit_alert(bus.as_ref(), repository.as_ref(), &counters, alert).await;
        }
    }
}

/// Persist first, then publish. A failed save is retried once, then the
/// alert is dropped with an ERROR; a failed publish drops with the bus's
/// own counter already incremented.
async fn emit_alert(
    bus: &dyn EventBus,
    repository: &dyn Repository,
    counters: &DetectCounters,
    alert: AlertEvent,
) {
    let mut saved = repository.save_alert(&alert).await;
    if saved.is_err() {
        saved = repository.save_alert(&alert).await;
    }
    match saved {
        Ok(_) => {}
        Err(e) => {
            counters.alerts_dropped.fetch_add(1, Ordering::Relaxed);
            error!(alert_id = %alert.id, error = %e, "alert could not be persisted, dropped");
            return;
        }
    }

    let payload = match serde_json::to_value(&alert) {
        Ok(p) => p,
        Err(e) => {
            counters.alerts_dropped.fetch_add(1, Ordering::Relaxed);
            error!(alert_id = %alert.id, error = %e, "alert serialization failed");
            return;
        }
    };
    match bus.publish(&Topic::alerts(), payload).await {
        Ok(()) => {
            counters.alerts_emitted.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            counters.alerts_dropped.fetch_add(1, Ordering::Relaxed);
            warn!(alert_id = %alert.id, error = %e, "alert publish dropped");
        }
    }
}
