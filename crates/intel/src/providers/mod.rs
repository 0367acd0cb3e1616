//! Built-in threat-intel providers.
//!
//! Six independent reputation sources ship with Vigil; none is
//! load-bearing. Each normalizes its native score shape to `[0, 1]` and
//! fabricates a deterministic finding in offline mode so the whole pipeline
//! runs without credentials.

mod abuse;
mod exchange;
mod fraud;
mod reputation;
mod scanner;
mod votes;

pub use abuse::AbuseConfidenceProvider;
pub use exchange::ThreatExchangeProvider;
pub use fraud::FraudScoreProvider;
pub use reputation::ReputationProvider;
pub use scanner::ScannerProvider;
pub use votes::CommunityVotesProvider;

use std::time::Duration;

/// Shared HTTP client settings for all providers.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .user_agent(concat!("vigil/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
}
