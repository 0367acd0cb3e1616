use std::net::IpAddr;

use async_trait::async_trait;

use crate::error::IntelError;
use crate::finding::Finding;
use crate::provider::{offline_score, IntelProvider};

pub(crate) const NAME: &str = "community_votes";

/// Community voting service. The +1 in the denominator keeps a single
/// malicious vote from yielding full confidence.
pub struct CommunityVotesProvider {
    client: reqwest::Client,
    credential: Option<String>,
    endpoint: String,
    offline: bool,
}

pub(crate) fn normalize(votes_malicious: f64, votes_benign: f64) -> f64 {
    let denominator = votes_malicious + votes_benign + 1.0;
    (votes_malicious / denominator).clamp(0.0, 1.0)
}

impl CommunityVotesProvider {
    #[must_use]
    pub fn new(credential: Option<String>, offline: bool) -> Self {
        Self {
            client: super::http_client(),
            credential,
            endpoint: "https://vt.community.example/api/v3".to_owned(),
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
        // Fabricate a vote split consistent with the score.
        let malicious = (score * 20.0).round();
        let benign = ((1.0 - score) * 20.0).round();
        Finding::new(
            NAME,
            serde_json::json!({ "votes": { "malicious": malicious, "harmless": benign } }),
            normalize(malicious, benign),
        )
        .mocked()
    }
}

#[async_trait]
impl IntelProvider for CommunityVotesProvider {
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
            .get(format!("{}/ip_addresses/{ip}", self.endpoint))
            .header("x-apikey", key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let votes = &body["data"]["attributes"]["total_votes"];
        let malicious = votes["malicious"].as_f64().unwrap_or(0.0);
        let benign = votes["harmless"].as_f64().unwrap_or(0.0);
        if !votes.is_object() {
            return Err(IntelError::Malformed("missing vote counts".into()));
        }
        Ok(Finding::new(NAME, body.clone(), normalize(malicious, benign)))
    }
}
