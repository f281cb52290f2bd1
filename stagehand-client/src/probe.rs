//! Application probe endpoints

use crate::AppClient;
use crate::error::Result;
use tracing::debug;

/// What an endpoint answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body_len: usize,
}

impl ProbeResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl AppClient {
    /// Issue a GET and report whatever the endpoint answered
    ///
    /// Only transport failures are errors; any HTTP status is returned as-is.
    pub async fn probe(&self, path: &str) -> Result<ProbeResponse> {
        let url = self.url(path);
        let response = self.client.get(&url).send().await?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let body = response.bytes().await?;

        debug!("Probe {} -> {} ({} bytes)", url, status, body.len());

        Ok(ProbeResponse {
            url,
            status,
            content_type,
            body_len: body.len(),
        })
    }
}
