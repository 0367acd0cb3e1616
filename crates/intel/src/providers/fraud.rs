use std::net::IpAddr;

use async_trait::async_trait;

use crate::error::IntelError;
use crate::finding::Finding;
use crate::provider::{offline_score, IntelProvider};

pub(crate) const NAME: &str = "fraud_score";

/// Fraud-scoring service: score in `[0, 100]`.
pub struct FraudScoreProvider {
    client: reqwest::Client,
    credential: Option<String>,
    endpoint: String,
    offline: bool,
}

pub(crate) fn normalize(score: f64) -> f64 {
    (score / 100.0).clamp(0.0, 1.0)
}

impl FraudScoreProvider {
    #[must_use]
    pub fn new(credential: Option<String>, offline: bool) -> Self {
        Self {
            client: super::http_client(),
            credential,
            endpoint: "https://ipqs.example/api/json/ip".to_owned(),
            offline,
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl IntelProvider for FraudScoreProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn check_ip(&self, ip: IpAddr) -> Result<Finding, IntelError> {
        if self.offline {
            let score = offline_score(NAME, ip);
            return Ok(Finding::new(
                NAME,
                serde_json::json!({ "fraud_score": score * 100.0 }),
                score,
            )
            .mocked());
        }
        let Some(key) = &self.credential else {
            return Err(IntelError::Disabled);
        };

        let body: serde_json::Value = self
            .client
            .get(format!("{}/{key}/{ip}", self.endpoint))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let score = body["fraud_score"]
            .as_f64()
            .ok_or_else(|| IntelError::Malformed("missing 'fraud_score' field".into()))?;
        Ok(Finding::new(NAME, body, normalize(score)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_contract() {
        assert!(normalize(0.0).abs() < f64::EPSILON);
        assert!((normalize(75.0) - 0.75).abs() < f64::EPSILON);
        assert!((normalize(100.0) - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn offline_score_bounded() {
        let provider = FraudScoreProvider::new(None, true);
        let found = provider
            .check_ip("198.51.100.99".parse().unwrap())
            .await
            .unwrap();
        assert!(found.is_mocked);
        assert!((0.0..=1.0).contains(&found.normalized_score));
    }
}
