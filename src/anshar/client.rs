use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnsharError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Upstream HTTP {0}")]
    UpstreamStatus(u16),
}

/// Fetches a document from an upstream (Anshar poll pages, Tiamat).
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch_document(&self, url: &str) -> Result<String, AnsharError>;
}

/// Posts a SIRI SubscriptionRequest and reports the response status.
#[async_trait]
pub trait SubscriptionPoster: Send + Sync {
    async fn post_subscription(&self, url: &str, body: String) -> Result<u16, AnsharError>;
}

/// HTTP client towards Anshar and Tiamat.
///
/// Every request carries `ET-Client-Name` (the product name) and
/// `ET-Client-ID` (the host) so the upstreams can attribute traffic.
pub struct AnsharClient {
    client: Client,
    client_name: String,
    client_id: String,
}

impl AnsharClient {
    pub fn new(product_name: &str) -> Result<Self, AnsharError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AnsharError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            client_name: product_name.to_string(),
            client_id: client_host_id(product_name),
        })
    }
}

#[async_trait]
impl FeedFetcher for AnsharClient {
    async fn fetch_document(&self, url: &str) -> Result<String, AnsharError> {
        let response = self
            .client
            .get(url)
            .header("ET-Client-Name", &self.client_name)
            .header("ET-Client-ID", &self.client_id)
            .send()
            .await
            .map_err(|e| AnsharError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AnsharError::UpstreamStatus(response.status().as_u16()));
        }

        response
            .text()
            .await
            .map_err(|e| AnsharError::Network(e.to_string()))
    }
}

#[async_trait]
impl SubscriptionPoster for AnsharClient {
    async fn post_subscription(&self, url: &str, body: String) -> Result<u16, AnsharError> {
        let response = self
            .client
            .post(url)
            .header("ET-Client-Name", &self.client_name)
            .header("ET-Client-ID", &self.client_id)
            .header("Content-Type", "application/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| AnsharError::Network(e.to_string()))?;

        Ok(response.status().as_u16())
    }
}

/// Host identifier for the `ET-Client-ID` header. Containers set
/// `HOSTNAME`; outside of them we fall back to a recognizable marker.
pub fn client_host_id(product_name: &str) -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| format!("{product_name}-UnknownHost"))
}
