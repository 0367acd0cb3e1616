//! Assembly of the full defense pipeline.
//!
//! The [`PipelineBuilder`] wires a bus, a repository and the three stage
//! engines together, validates fatal configuration, and returns a
//! [`Pipeline`] whose workers run under one task tracker with a shared
//! cancellation token. Live counters are published on the `stats` topic
//! once per second for dashboards.

pub mod builder;
pub mod error;
pub mod pipeline;
pub mod snapshot;

pub use builder::PipelineBuilder;
pub use error::PipelineError;
pub use pipeline::Pipeline;
pub use snapshot::StatsSnapshot;
