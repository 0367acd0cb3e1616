//! Response engine: investigation reports in, gated and auditable actions
//! out.
//!
//! A configuration-driven severity × risk decision matrix selects an action
//! type, an ordered safety gate may downgrade it (recording the downgrade
//! chain for audit), and the action executes against the data plane with a
//! deadline — or in simulation when production actions are disabled. Every
//! execution, timeout and revert appends an [`vigil_core::ActionRecord`].

pub mod actions;
pub mod advisor;
pub mod dataplane;
pub mod engine;
pub mod error;
pub mod gate;
pub mod matrix;

pub use actions::{ActionRegistry, ResponseAction};
pub use advisor::{NoopAdvisor, PolicyAdvisor};
pub use dataplane::DataPlane;
pub use engine::{ResponseConfig, ResponseCounters, ResponseEngine};
pub use error::ResponseError;
pub use gate::{GateDecision, SafetyGate};
pub use matrix::DecisionMatrix;
