use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use vigil_bus::EventBus;
use vigil_detect::{DetectionConfig, DetectionEngine, FeatureScaler, HeuristicScorer, Scorer};
use vigil_intel::{IntelCache, IntelConfig, InvestigationAgent, ProviderHandle};
use vigil_response::{
    ActionRegistry, DataPlane, NoopAdvisor, PolicyAdvisor, ResponseConfig, ResponseEngine,
    SafetyGate,
};
use vigil_store::Repository;

use crate::error::PipelineError;
use crate::pipeline::Pipeline;

/// Fluent builder for a [`Pipeline`].
///
/// A bus and a repository must be supplied; everything else defaults: the
/// heuristic scorer, an empty provider set (investigations then fall back
/// to alert-only verdicts), the built-in action registry on a simulated
/// data plane, and the default decision matrix.
pub struct PipelineBuilder {
    bus: Option<Arc<dyn EventBus>>,
    repository: Option<Arc<dyn Repository>>,
    detection: DetectionConfig,
    scorer: Arc<dyn Scorer>,
    scaler: Option<FeatureScaler>,
    intel: IntelConfig,
    providers: Vec<ProviderHandle>,
    cache: Option<Arc<IntelCache>>,
    response: ResponseConfig,
    gate: Option<SafetyGate>,
    registry: Option<ActionRegistry>,
    advisor: Arc<dyn PolicyAdvisor>,
    plane: Arc<DataPlane>,
    stats_interval: Duration,
}

impl PipelineBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bus: None,
            repository: None,
            detection: DetectionConfig::default(),
            scorer: Arc::new(HeuristicScorer::default()),
            scaler: None,
            intel: IntelConfig::default(),
            providers: Vec::new(),
            cache: None,
            response: ResponseConfig::default(),
            gate: None,
            registry: None,
            advisor: Arc::new(NoopAdvisor),
            plane: DataPlane::simulated(),
            stats_interval: Duration::from_secs(1),
        }
    }

    #[must_use]
    pub fn bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    #[must_use]
    pub fn repository(mut self, repository: Arc<dyn Repository>) -> Self {
        self.repository = Some(repository);
        self
    }

    #[must_use]
    pub fn detection_config(mut self, config: DetectionConfig) -> Self {
        self.detection = config;
        self
    }

    /// Replace the heuristic scorer with a trained one.
    #[must_use]
    pub fn scorer(mut self, scorer: Arc<dyn Scorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Attach a pre-fitted feature scaler.
    #[must_use]
    pub fn scaler(mut self, scaler: FeatureScaler) -> Self {
        self.scaler = Some(scaler);
        self
    }

    #[must_use]
    pub fn intel_config(mut self, config: IntelConfig) -> Self {
        self.intel = config;
        self
    }

    /// Register an enabled threat-intel provider.
    #[must_use]
    pub fn provider(mut self, handle: ProviderHandle) -> Self {
        self.providers.push(handle);
        self
    }

    /// Supply the intel cache (usually pre-built so TTLs match provider
    /// configuration; tests use it for seeding).
    #[must_use]
    pub fn intel_cache(mut self, cache: Arc<IntelCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn response_config(mut self, config: ResponseConfig) -> Self {
        self.response = config;
        self
    }

    #[must_use]
    pub fn safety_gate(mut self, gate: SafetyGate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Replace the built-in action registry.
    #[must_use]
    pub fn action_registry(mut self, registry: ActionRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn advisor(mut self, advisor: Arc<dyn PolicyAdvisor>) -> Self {
        self.advisor = advisor;
        self
    }

    /// The data plane actions execute against; selects production vs
    /// simulation.
    #[must_use]
    pub fn data_plane(mut self, plane: Arc<DataPlane>) -> Self {
        self.plane = plane;
        self
    }

    #[must_use]
    pub fn stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    /// Validate and assemble. Fatal configuration errors surface here;
    /// the pipeline never starts partial.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let bus = self
            .bus
            .ok_or_else(|| PipelineError::Configuration("an event bus is required".into()))?;
        let repository = self.repository.ok_or_else(|| {
            PipelineError::Configuration("a repository is required".into())
        })?;

        if self.providers.is_empty() {
            warn!("no threat-intel providers enabled, verdicts fall back to alerts alone");
        }

        let cache = self.cache.unwrap_or_else(|| {
            Arc::new(IntelCache::new(self.providers.iter().map(|h| {
                (h.provider.name().to_owned(), Duration::from_secs(3600), 10_000)
            })))
        });
        let gate = self.gate.unwrap_or_else(|| SafetyGate::new(&[], &[], 0.6));
        let registry = self
            .registry
            .unwrap_or_else(|| ActionRegistry::with_builtins(Arc::clone(&self.plane)));

        let detection = Arc::new(DetectionEngine::new(
            self.detection,
            self.scorer,
            self.scaler,
            Arc::clone(&bus),
            Arc::clone(&repository),
        ));
        let agent = InvestigationAgent::new(
            self.intel,
            self.providers,
            cache,
            Arc::clone(&bus),
            Arc::clone(&repository),
        );
        let response = ResponseEngine::new(
            self.response,
            gate,
            registry,
            self.advisor,
            self.plane,
            Arc::clone(&bus),
            Arc::clone(&repository),
        )?;

        Ok(Pipeline::assemble(
            bus,
            repository,
            detection,
            agent,
            response,
            self.stats_interval,
        ))
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
