//! Outbound webhook delivery

use crate::error::{ClientError, Result};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Posts JSON payloads to a fixed URL
#[derive(Debug, Clone)]
pub struct WebhookClient {
    url: String,
    client: Client,
}

impl WebhookClient {
    /// Create a webhook client with a bounded request timeout
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ClientError::InvalidRequest(format!(
                "webhook url must start with http:// or https://: {}",
                url
            )));
        }

        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { url, client })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST the payload as JSON
    pub async fn deliver<T: Serialize + ?Sized>(&self, payload: &T) -> Result<()> {
        let response = self.client.post(&self.url).json(payload).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(ClientError::UnexpectedStatus {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        debug!("Delivered webhook to {}", self.url);
        Ok(())
    }
}
