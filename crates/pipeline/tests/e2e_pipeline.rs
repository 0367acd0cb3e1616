//! End-to-end pipeline scenarios over the in-memory bus and repository.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use vigil_bus::{EventBus, MemoryBus};
use vigil_core::{Severity, Verdict};
use vigil_detect::{
    DetectError, DetectionConfig, FeatureVector, PacketRecord, PacketSource, Proto, Scorer,
    SyntheticProfile, SyntheticSource, TcpFlags,
};
use vigil_intel::{Finding, IntelCache, IntelError, IntelProvider, ProviderHandle, TokenBucket};
use vigil_pipeline::PipelineBuilder;
use vigil_response::{DataPlane, SafetyGate};
use vigil_store::Repository;
use vigil_store_memory::MemoryRepository;

/// Replays a fixed packet list, then ends.
struct VecSource {
    packets: VecDeque<PacketRecord>,
}

impl VecSource {
    fn new(packets: Vec<PacketRecord>) -> Self {
        Self {
            packets: packets.into(),
        }
    }
}

#[async_trait]
impl PacketSource for VecSource {
    async fn next_packet(&mut self) -> Result<Option<PacketRecord>, DetectError> {
        Ok(self.packets.pop_front())
    }
}

/// A provider that always fails; used to force cache- or alert-only paths.
struct ErrorProvider {
    name: &'static str,
}

#[async_trait]
impl IntelProvider for ErrorProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn check_ip(&self, _ip: IpAddr) -> Result<Finding, IntelError> {
        Err(IntelError::Http("connection refused".into()))
    }
}

fn error_handle(name: &'static str) -> ProviderHandle {
    ProviderHandle {
        provider: Arc::new(ErrorProvider { name }),
        limiter: TokenBucket::new(86_400, 100),
    }
}

/// Scores every flow deterministically in `[0, 0.2]`: pure noise.
struct NoiseScorer;

impl Scorer for NoiseScorer {
    fn score_batch(&self, batch: &[FeatureVector]) -> Result<Vec<f64>, DetectError> {
        Ok(batch
            .iter()
            .enumerate()
            .map(|(i, _)| (i % 21) as f64 / 100.0)
            .collect())
    }
}

/// A detection config that keeps periodic flushes out of short replays, so
/// each flow is scored exactly once at drain.
fn replay_detection_config() -> DetectionConfig {
    DetectionConfig {
        flush_interval: Duration::from_secs(600),
        batch_timeout: Duration::from_millis(10),
        scoring_workers: 2,
        ..DetectionConfig::default()
    }
}

/// The Scenario B flow: 500 packets, 1 MB total, 10 ms mean inter-arrival,
/// from a known-bad source.
fn bulk_flow_packets(src: &str) -> Vec<PacketRecord> {
    (0..500)
        .map(|i| PacketRecord {
            ts: 1_700_000_000.0 + f64::from(i) * 0.01,
            src_ip: src.parse().unwrap(),
            dst_ip: "10.0.0.5".parse().unwrap(),
            proto: Proto::Tcp,
            src_port: 40_100,
            dst_port: 443,
            size: 2_000,
            flags: TcpFlags(TcpFlags::ACK),
        })
        .collect()
}

#[tokio::test]
async fn scenario_noise_is_fully_suppressed() {
    let bus = Arc::new(MemoryBus::default());
    let repo = Arc::new(MemoryRepository::new());
    let pipeline = PipelineBuilder::new()
        .bus(Arc::clone(&bus) as Arc<dyn EventBus>)
        .repository(Arc::clone(&repo) as Arc<dyn Repository>)
        .detection_config(replay_detection_config())
        .scorer(Arc::new(NoiseScorer))
        .stats_interval(Duration::from_secs(3600))
        .build()
        .unwrap();

    // 1000 packets of benign chatter; every flow scores in [0, 0.2].
    let source = Box::new(SyntheticSource::new(SyntheticProfile::Benign, 1000, 11));
    pipeline.start(source).await.unwrap();
    pipeline.run_to_completion().await;

    assert_eq!(repo.count_alerts().await.unwrap(), 0, "all below emit threshold");
    assert_eq!(repo.count_investigations().await.unwrap(), 0);
    assert_eq!(repo.count_actions().await.unwrap(), 0);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn scenario_cached_malicious_ip_is_isolated() {
    let bus = Arc::new(MemoryBus::default());
    let repo = Arc::new(MemoryRepository::new());
    let plane = DataPlane::production();

    // The provider itself always fails; only the seeded cache can answer.
    let cache = Arc::new(IntelCache::new([(
        "reputation".to_owned(),
        Duration::from_secs(3600),
        1000,
    )]));
    cache
        .seed(
            "reputation",
            "203.0.113.7".parse().unwrap(),
            Finding::new("reputation", serde_json::json!({ "reputation": -90 }), 0.95),
        )
        .await;

    let pipeline = PipelineBuilder::new()
        .bus(Arc::clone(&bus) as Arc<dyn EventBus>)
        .repository(Arc::clone(&repo) as Arc<dyn Repository>)
        .detection_config(replay_detection_config())
        .provider(error_handle("reputation"))
        .intel_cache(cache)
        .data_plane(Arc::clone(&plane))
        .stats_interval(Duration::from_secs(3600))
        .build()
        .unwrap();

    let source = Box::new(VecSource::new(bulk_flow_packets("203.0.113.7")));
    pipeline.start(source).await.unwrap();
    pipeline.run_to_completion().await;

    // One alert, high severity, scored by the heuristic.
    let alerts = repo.list_alerts(10, 0).await.unwrap();
    assert_eq!(alerts.total, 1);
    let alert = &alerts.items[0];
    assert_eq!(alert.severity, Severity::High);
    assert!(alert.model_score >= 0.8);

    // One report, malicious, driven by the cached finding.
    let report = repo.get_investigation(&alert.id).await.unwrap().unwrap();
    assert_eq!(report.verdict, Verdict::Malicious);
    assert!(report.risk_score >= 0.7);
    assert_eq!(report.sources, vec!["reputation".to_owned()]);

    // One action: high x high selects isolate_container, and it ran for
    // real against the data plane.
    let actions = repo.actions_for_alert(&alert.id).await.unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].action_type, "isolate_container");
    assert!(plane.is_isolated("203.0.113.7"));
    pipeline.shutdown().await;
}

#[tokio::test]
async fn scenario_whitelisted_target_is_only_logged() {
    let bus = Arc::new(MemoryBus::default());
    let repo = Arc::new(MemoryRepository::new());
    let plane = DataPlane::production();

    let cache = Arc::new(IntelCache::new([(
        "reputation".to_owned(),
        Duration::from_secs(3600),
        1000,
    )]));
    cache
        .seed(
            "reputation",
            "203.0.113.7".parse().unwrap(),
            Finding::new("reputation", serde_json::json!({ "reputation": -90 }), 0.95),
        )
        .await;

    let pipeline = PipelineBuilder::new()
        .bus(Arc::clone(&bus) as Arc<dyn EventBus>)
        .repository(Arc::clone(&repo) as Arc<dyn Repository>)
        .detection_config(replay_detection_config())
        .provider(error_handle("reputation"))
        .intel_cache(cache)
        .safety_gate(SafetyGate::new(&["203.0.113.7".to_owned()], &[], 0.6))
        .data_plane(Arc::clone(&plane))
        .stats_interval(Duration::from_secs(3600))
        .build()
        .unwrap();

    let source = Box::new(VecSource::new(bulk_flow_packets("203.0.113.7")));
    pipeline.start(source).await.unwrap();
    pipeline.run_to_completion().await;

    let actions = repo.list_actions(10, 0).await.unwrap();
    assert_eq!(actions.total, 1);
    let action = &actions.items[0];
    assert_eq!(action.action_type, "log_only");
    assert_eq!(
        action.parameters["gate_trace"],
        serde_json::json!(["whitelist"])
    );
    assert!(!plane.is_isolated("203.0.113.7"), "whitelisted target untouched");
    pipeline.shutdown().await;
}

#[tokio::test]
async fn scenario_all_providers_failing_degrades_gracefully() {
    let bus = Arc::new(MemoryBus::default());
    let repo = Arc::new(MemoryRepository::new());
    let plane = DataPlane::production();

    let pipeline = PipelineBuilder::new()
        .bus(Arc::clone(&bus) as Arc<dyn EventBus>)
        .repository(Arc::clone(&repo) as Arc<dyn Repository>)
        .detection_config(replay_detection_config())
        .provider(error_handle("reputation"))
        .provider(error_handle("abuse_confidence"))
        .data_plane(Arc::clone(&plane))
        .stats_interval(Duration::from_secs(3600))
        .build()
        .unwrap();

    let source = Box::new(VecSource::new(bulk_flow_packets("198.51.100.44")));
    pipeline.start(source).await.unwrap();
    pipeline.run_to_completion().await;

    let alerts = repo.list_alerts(10, 0).await.unwrap();
    assert_eq!(alerts.total, 1);
    let alert = &alerts.items[0];
    assert_eq!(alert.severity, Severity::High);

    // Both providers failed: the verdict falls back to the alert alone.
    let report = repo.get_investigation(&alert.id).await.unwrap().unwrap();
    assert!((report.uncertainty - 1.0).abs() < f64::EPSILON);
    assert_eq!(report.verdict, Verdict::Suspicious);
    assert!((report.risk_score - alert.model_score).abs() < f64::EPSILON);
    assert!(report.ioc_findings["reputation"]["error"].is_string());

    // Matrix cell high x high selects isolate_container, but zero
    // confidence trips the gate: downgraded one level with an audit trace.
    let actions = repo.actions_for_alert(&alert.id).await.unwrap();
    assert_eq!(actions.len(), 1);
    let action = &actions[0];
    assert_eq!(action.action_type, "rate_limit");
    assert_eq!(
        action.parameters["gate_trace"],
        serde_json::json!(["low_confidence"])
    );
    assert_eq!(action.parameters["matrix_selection"], "isolate_container");
    pipeline.shutdown().await;
}

#[tokio::test]
async fn stats_snapshots_are_published_on_the_bus() {
    use std::sync::atomic::{AtomicU64, Ordering};

    use vigil_bus::{EventHandler, Topic};

    struct SnapshotCounter {
        seen: AtomicU64,
    }

    #[async_trait]
    impl EventHandler for SnapshotCounter {
        async fn handle(&self, _topic: &Topic, payload: serde_json::Value) {
            assert!(payload["alerts_emitted"].is_u64());
            assert!(payload["bus_published"].is_u64());
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
    }

    let bus = Arc::new(MemoryBus::default());
    let repo = Arc::new(MemoryRepository::new());
    let handler = Arc::new(SnapshotCounter {
        seen: AtomicU64::new(0),
    });
    bus.subscribe(&Topic::stats(), Arc::clone(&handler) as Arc<dyn EventHandler>)
        .await
        .unwrap();

    let pipeline = PipelineBuilder::new()
        .bus(Arc::clone(&bus) as Arc<dyn EventBus>)
        .repository(Arc::clone(&repo) as Arc<dyn Repository>)
        .detection_config(replay_detection_config())
        .stats_interval(Duration::from_millis(20))
        .build()
        .unwrap();

    let source = Box::new(SyntheticSource::new(SyntheticProfile::Benign, 10, 5));
    pipeline.start(source).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    pipeline.shutdown().await;

    assert!(
        handler.seen.load(Ordering::SeqCst) >= 2,
        "snapshots flow at the configured cadence"
    );
}

#[tokio::test]
async fn builder_requires_bus_and_repository() {
    let err = PipelineBuilder::new().build().unwrap_err();
    assert!(err.to_string().contains("event bus"));

    let err = PipelineBuilder::new()
        .bus(Arc::new(MemoryBus::default()) as Arc<dyn EventBus>)
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("repository"));
}
