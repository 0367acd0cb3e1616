use std::net::IpAddr;

use async_trait::async_trait;

use crate::error::IntelError;
use crate::finding::Finding;
use crate::provider::{offline_score, IntelProvider};

pub(crate) const NAME: &str = "scanner";

/// Scanner-detection service: classifies an IP as benign, unknown or
/// malicious.
pub struct ScannerProvider {
    client: reqwest::Client,
    credential: Option<String>,
    endpoint: String,
    offline: bool,
}

pub(crate) fn normalize(classification: &str) -> f64 {
    match classification {
        "malicious" => 0.9,
        "benign" => 0.0,
        _ => 0.3,
    }
}

impl ScannerProvider {
    #[must_use]
    pub fn new(credential: Option<String>, offline: bool) -> Self {
        Self {
            client: super::http_client(),
            credential,
            endpoint: "https://api.scannerdb.example/v3/community".to_owned(),
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
        let classification = if score > 0.66 {
            "malicious"
        } else if score > 0.33 {
            "unknown"
        } else {
            "benign"
        };
        Finding::new(
            NAME,
            serde_json::json!({ "classification": classification }),
            normalize(classification),
        )
        .mocked()
    }
}

#[async_trait]
impl IntelProvider for ScannerProvider {
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
            .get(format!("{}/{ip}", self.endpoint))
            .header("key", key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let classification = body["classification"]
            .as_str()
            .ok_or_else(|| IntelError::Malformed("missing 'classification' field".into()))?;
        let normalized = normalize(classification);
        Ok(Finding::new(NAME, body.clone(), normalized))
    }
}
