//! Detection engine: packets in, alerts out.
//!
//! A single ingest worker owns the flow table and aggregates packets into
//! flows with online (Welford) inter-arrival statistics. Evicted and
//! periodically flushed flows become fixed-order feature vectors, which are
//! micro-batched and scored by a pool of workers. Scores at or above the
//! emit threshold become [`vigil_core::AlertEvent`]s, persisted and then
//! published on the `alerts` topic.

pub mod batcher;
pub mod engine;
pub mod error;
pub mod features;
pub mod flow;
pub mod packet;
pub mod scorer;
pub mod source;

pub use engine::{DetectCounters, DetectionConfig, DetectionEngine};
pub use error::DetectError;
pub use features::{FeatureScaler, FeatureVector, FEATURE_NAMES};
pub use flow::{Flow, FlowKey, FlowTable};
pub use packet::{PacketRecord, Proto, TcpFlags};
pub use scorer::{HeuristicScorer, Scorer};
pub use source::{PacketSource, ReplaySource, SyntheticProfile, SyntheticSource};
