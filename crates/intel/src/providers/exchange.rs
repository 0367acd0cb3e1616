use std::net::IpAddr;

use async_trait::async_trait;

use crate::error::IntelError;
use crate::finding::Finding;
use crate::provider::{offline_score, IntelProvider};

pub(crate) const NAME: &str = "threat_exchange";

/// Threat-exchange service scoring by pulse count: five or more pulses
/// saturate the score.
pub struct ThreatExchangeProvider {
    client: reqwest::Client,
    credential: Option<String>,
    endpoint: String,
    offline: bool,
}

pub(crate) fn normalize(pulse_count: f64) -> f64 {
    (pulse_count / 5.0).clamp(0.0, 1.0)
}

impl ThreatExchangeProvider {
    #[must_use]
    pub fn new(credential: Option<String>, offline: bool) -> Self {
        Self {
            client: super::http_client(),
            credential,
            endpoint: "https://otx.exchange.example/api/v1".to_owned(),
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
        let pulses = (score * 5.0).round();
        Finding::new(
            NAME,
            serde_json::json!({ "pulse_info": { "count": pulses } }),
            normalize(pulses),
        )
        .mocked()
    }
}

#[async_trait]
impl IntelProvider for ThreatExchangeProvider {
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
            .get(format!("{}/indicators/IPv4/{ip}/general", self.endpoint))
            .header("X-OTX-API-KEY", key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let count = body["pulse_info"]["count"]
            .as_f64()
            .ok_or_else(|| IntelError::Malformed("missing pulse count".into()))?;
        Ok(Finding::new(NAME, body, normalize(count)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_contract() {
        assert!(normalize(0.0).abs() < f64::EPSILON);
        assert!((normalize(2.0) - 0.4).abs() < f64::EPSILON);
        assert!((normalize(5.0) - 1.0).abs() < f64::EPSILON);
        assert!((normalize(40.0) - 1.0).abs() < f64::EPSILON, "saturates at 5");
    }

    #[tokio::test]
    async fn mock_pulse_count_round_trips() {
        let provider = ThreatExchangeProvider::new(None, true);
        let found = provider
            .check_ip("203.0.113.7".parse().unwrap())
            .await
            .unwrap();
        let count = found.raw["pulse_info"]["count"].as_f64().unwrap();
        assert!((normalize(count) - found.normalized_score).abs() < 1e-9);
    }
}
