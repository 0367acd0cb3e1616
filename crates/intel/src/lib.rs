//! Investigation stage: alerts in, verdicts out.
//!
//! For each alert the agent queries every enabled threat-intel provider
//! concurrently under a shared deadline, through a per-provider TTL cache
//! and token-bucket rate limiter, then fuses the normalized scores with the
//! alert's model score into a risk score and verdict.

pub mod agent;
pub mod cache;
pub mod error;
pub mod finding;
pub mod fusion;
pub mod provider;
pub mod providers;
pub mod ratelimit;

pub use agent::{IntelConfig, IntelCounters, InvestigationAgent, ProviderHandle};
pub use cache::IntelCache;
pub use error::IntelError;
pub use finding::Finding;
pub use fusion::fuse;
pub use provider::IntelProvider;
pub use ratelimit::TokenBucket;
