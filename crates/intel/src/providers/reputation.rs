use std::net::IpAddr;

use async_trait::async_trait;

use crate::error::IntelError;
use crate::finding::Finding;
use crate::provider::{offline_score, IntelProvider};

/// Negative-vote reputation service: reputation in `[-100, 100]`, where
/// -100 is maximally malicious.
pub struct ReputationProvider {
    client: reqwest::Client,
    credential: Option<String>,
    endpoint: String,
    offline: bool,
}

pub(crate) const NAME: &str = "reputation";

/// `clamp((-rep + 100) / 200, 0, 1)`: -100 maps to 1.0, +100 to 0.0.
pub(crate) fn normalize(reputation: f64) -> f64 {
    ((-reputation + 100.0) / 200.0).clamp(0.0, 1.0)
}

impl ReputationProvider {
    #[must_use]
    pub fn new(credential: Option<String>, offline: bool) -> Self {
        Self {
            client: super::http_client(),
            credential,
            endpoint: "https://api.reputation.example/v2".to_owned(),
            offline,
        }
    }

    /// Point the provider at a different base URL (tests, proxies).
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn mock(&self, ip: IpAddr) -> Finding {
        let score = offline_score(NAME, ip);
        let reputation = 100.0 - score * 200.0;
        Finding::new(NAME, serde_json::json!({ "reputation": reputation }), score).mocked()
    }
}

#[async_trait]
impl IntelProvider for ReputationProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn check_ip(&self, ip: IpAddr) -> Result<Finding, IntelError> {
        if self.offline {
            return Ok(self.mock(ip));
        }
        let Some(key) = &self.credential else {
            return Err(IntelError::Disabled);
        };

        let body: serde_json::Value = self
            .client
            .get(format!("{}/ip/{ip}", self.endpoint))
            .header("x-api-key", key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let reputation = body["reputation"]
            .as_f64()
            .ok_or_else(|| IntelError::Malformed("missing 'reputation' field".into()))?;
        Ok(Finding::new(NAME, body, normalize(reputation)))
    }
}
