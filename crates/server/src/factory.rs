use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use vigil_bus::{BrokerBus, EventBus, MemoryBus, MemoryBusConfig};
use vigil_core::{RiskThresholds, SensorId, SeverityThresholds, VerdictThresholds};
use vigil_detect::{DetectionConfig, PacketSource, ReplaySource, SyntheticProfile, SyntheticSource};
use vigil_intel::providers::{
    AbuseConfidenceProvider, CommunityVotesProvider, FraudScoreProvider, ReputationProvider,
    ScannerProvider, ThreatExchangeProvider,
};
use vigil_intel::{IntelCache, IntelConfig, IntelProvider, ProviderHandle, TokenBucket};
use vigil_response::{DataPlane, DecisionMatrix, ResponseConfig, SafetyGate};
use vigil_store::Repository;
use vigil_store_postgres::PostgresRepository;

use crate::config::{ProviderConfig, VigilConfig};
use crate::error::ServerError;

/// Build the bus transport selected by configuration.
pub fn build_bus(config: &VigilConfig) -> Result<Arc<dyn EventBus>, ServerError> {
    let memory = MemoryBusConfig {
        queue_capacity: config.bus.queue_capacity,
        publish_timeout: Duration::from_millis(config.bus.publish_timeout_ms),
        drain_timeout: Duration::from_secs(config.bus.drain_timeout_secs),
    };
    match config.bus.transport.as_str() {
        "memory" => Ok(Arc::new(MemoryBus::new(memory))),
        "broker" => {
            let url = config.bus.broker_url.as_deref().ok_or_else(|| {
                ServerError::Configuration("bus.transport = 'broker' requires bus.broker_url".into())
            })?;
            let bus = BrokerBus::new(url, memory)
                .map_err(|e| ServerError::Configuration(e.to_string()))?;
            Ok(Arc::new(bus))
        }
        other => Err(ServerError::Configuration(format!(
            "unknown bus transport '{other}'"
        ))),
    }
}

/// Build the repository backend. Postgres must be reachable; the pipeline
/// never starts without durable persistence.
pub async fn build_repository(config: &VigilConfig) -> Result<Arc<dyn Repository>, ServerError> {
    match config.store.backend.as_str() {
        "memory" => Ok(vigil_store_memory::repository()),
        "postgres" => {
            let url = config.store.url.as_deref().ok_or_else(|| {
                ServerError::Configuration("store.backend = 'postgres' requires store.url".into())
            })?;
            let repository = PostgresRepository::connect(url)
                .await
                .map_err(|e| ServerError::Configuration(e.to_string()))?;
            Ok(Arc::new(repository))
        }
        other => Err(ServerError::Configuration(format!(
            "unknown store backend '{other}'"
        ))),
    }
}

/// The six built-in provider names, in a stable order.
const PROVIDER_NAMES: [&str; 6] = [
    "reputation",
    "abuse_confidence",
    "threat_exchange",
    "fraud_score",
    "community_votes",
    "scanner",
];

fn instantiate(name: &str, credential: Option<String>, offline: bool) -> Arc<dyn IntelProvider> {
    match name {
        "abuse_confidence" => Arc::new(AbuseConfidenceProvider::new(credential, offline)),
        "threat_exchange" => Arc::new(ThreatExchangeProvider::new(credential, offline)),
        "fraud_score" => Arc::new(FraudScoreProvider::new(credential, offline)),
        "community_votes" => Arc::new(CommunityVotesProvider::new(credential, offline)),
        "scanner" => Arc::new(ScannerProvider::new(credential, offline)),
        _ => Arc::new(ReputationProvider::new(credential, offline)),
    }
}

/// Resolve the enabled provider set and a matching cache.
///
/// A provider is included when it is enabled and either has a credential or
/// the agent runs in offline mode (mocked findings). Disabled or
/// credential-less providers are skipped at startup, not at query time.
pub fn build_providers(config: &VigilConfig) -> (Vec<ProviderHandle>, Arc<IntelCache>) {
    let offline = config.intel.offline_mode;
    let mut handles = Vec::new();
    let mut cache_specs = Vec::new();

    for name in PROVIDER_NAMES {
        let provider_config = config
            .intel
            .providers
            .get(name)
            .cloned()
            .unwrap_or_else(ProviderConfig::default);
        if !provider_config.enabled {
            continue;
        }
        if provider_config.credential.is_none() && !offline {
            info!(provider = name, "no credential and not offline, skipped");
            continue;
        }

        handles.push(ProviderHandle {
            provider: instantiate(name, provider_config.credential.clone(), offline),
            limiter: TokenBucket::new(provider_config.requests_per_day, provider_config.burst),
        });
        cache_specs.push((
            name.to_owned(),
            Duration::from_secs(provider_config.ttl_secs),
            provider_config.cache_capacity,
        ));
    }

    (handles, Arc::new(IntelCache::new(cache_specs)))
}

/// Map the detection section onto the engine config.
#[must_use]
pub fn detection_config(config: &VigilConfig) -> DetectionConfig {
    let section = &config.detection;
    DetectionConfig {
        flow_idle_timeout: Duration::from_secs(section.flow_idle_timeout_secs),
        max_flows: section.max_flows,
        flush_interval: Duration::from_millis(section.flush_interval_ms),
        batch_size: section.batch_size,
        batch_timeout: Duration::from_millis(section.batch_timeout_ms),
        emit_threshold: section.emit_threshold,
        severity: SeverityThresholds {
            high: section.severity_high,
            medium: section.severity_medium,
        },
        sensor_id: SensorId::new(section.sensor_id.clone()),
        ..DetectionConfig::default()
    }
}

#[must_use]
pub fn intel_config(config: &VigilConfig) -> IntelConfig {
    let section = &config.intel;
    IntelConfig {
        alpha: section.alpha,
        verdict: VerdictThresholds {
            malicious: section.verdict_malicious,
            suspicious: section.verdict_suspicious,
        },
        fanout_timeout: Duration::from_millis(section.fanout_timeout_ms),
        max_concurrent: section.max_concurrent,
    }
}

#[must_use]
pub fn response_config(config: &VigilConfig) -> ResponseConfig {
    let section = &config.response;
    let matrix = section.decision_matrix.as_ref().map_or_else(
        DecisionMatrix::default,
        |rows| DecisionMatrix::from_rows(rows[0].clone(), rows[1].clone(), rows[2].clone()),
    );
    ResponseConfig {
        matrix,
        risk: RiskThresholds {
            high: section.risk_high,
            medium: section.risk_medium,
        },
        execution_deadline: Duration::from_secs(section.execution_deadline_secs),
    }
}

#[must_use]
pub fn safety_gate(config: &VigilConfig) -> SafetyGate {
    SafetyGate::new(
        &config.response.ip_whitelist,
        &config.response.management_subnets,
        config.response.min_confidence_for_intrusive_action,
    )
}

#[must_use]
pub fn data_plane(config: &VigilConfig) -> Arc<DataPlane> {
    if config.response.production_actions_enabled {
        DataPlane::production()
    } else {
        DataPlane::simulated()
    }
}

/// Build the packet source named by configuration.
pub async fn build_source(config: &VigilConfig) -> Result<Box<dyn PacketSource>, ServerError> {
    match config.source.kind.as_str() {
        "replay" => {
            let path = config.source.path.as_deref().ok_or_else(|| {
                ServerError::Configuration("source.kind = 'replay' requires source.path".into())
            })?;
            let source = ReplaySource::open(path)
                .await
                .map_err(|e| ServerError::Configuration(e.to_string()))?;
            Ok(Box::new(source))
        }
        "synthetic" => {
            let profile = match config.source.profile.as_str() {
                "port_scan" => SyntheticProfile::PortScan,
                "exfiltration" => SyntheticProfile::Exfiltration,
                _ => SyntheticProfile::Benign,
            };
            let mut source =
                SyntheticSource::new(profile, config.source.packets, config.source.seed);
            if config.source.pace_ms > 0 {
                source = source.with_pace(Duration::from_millis(config.source.pace_ms));
            }
            Ok(Box::new(source))
        }
        other => Err(ServerError::Configuration(format!(
            "unknown packet source '{other}'"
        ))),
    }
}
