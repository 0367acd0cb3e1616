use std::net::IpAddr;

use async_trait::async_trait;

use crate::error::IntelError;
use crate::finding::Finding;
use crate::provider::{offline_score, IntelProvider};

pub(crate) const NAME: &str = "abuse_confidence";

/// Abuse-confidence service: confidence in `[0, 100]`.
pub struct AbuseConfidenceProvider {
    client: reqwest::Client,
    credential: Option<String>,
    endpoint: String,
    offline: bool,
}

pub(crate) fn normalize(confidence: f64) -> f64 {
    (confidence / 100.0).clamp(0.0, 1.0)
}

impl AbuseConfidenceProvider {
    #[must_use]
    pub fn new(credential: Option<String>, offline: bool) -> Self {
        Self {
            client: super::http_client(),
            credential,
            endpoint: "https://api.abusedb.example/v2/check".to_owned(),
            offline,
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn mock(&self, ip: IpAddr) -> Finding {
        let score = offline_score(NAME, ip);
        Finding::new(
            NAME,
            serde_json::json!({ "abuseConfidenceScore": score * 100.0 }),
            score,
        )
        .mocked()
    }
}

#[async_trait]
impl IntelProvider for AbuseConfidenceProvider {
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
            .get(&self.endpoint)
            .query(&[("ipAddress", ip.to_string())])
            .header("Key", key)
            .header("Accept", "application/json")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let confidence = body["data"]["abuseConfidenceScore"]
            .as_f64()
            .or_else(|| body["abuseConfidenceScore"].as_f64())
            .ok_or_else(|| IntelError::Malformed("missing confidence score".into()))?;
        Ok(Finding::new(NAME, body, normalize(confidence)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_contract() {
        assert!(normalize(0.0).abs() < f64::EPSILON);
        assert!((normalize(100.0) - 1.0).abs() < f64::EPSILON);
        assert!((normalize(55.0) - 0.55).abs() < f64::EPSILON);
        assert!((normalize(250.0) - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn offline_mode_is_deterministic() {
        let provider = AbuseConfidenceProvider::new(None, true);
        let ip: IpAddr = "198.51.100.20".parse().unwrap();
        let a = provider.check_ip(ip).await.unwrap();
        assert!(a.is_mocked);
        assert!((0.0..=1.0).contains(&a.normalized_score));
    }
}
