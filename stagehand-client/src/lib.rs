//! Stagehand HTTP Client
//!
//! A small, type-safe HTTP client for the two outbound conversations the
//! pipeline has:
//! - probing the deployed application's endpoints during health checks
//! - delivering notification payloads to a webhook
//!
//! # Example
//!
//! ```no_run
//! use stagehand_client::AppClient;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> stagehand_client::Result<()> {
//!     let client = AppClient::with_timeout("http://127.0.0.1:3000", Duration::from_secs(5))?;
//!
//!     let probe = client.probe("/api/poems").await?;
//!     println!("status {}", probe.status);
//!     Ok(())
//! }
//! ```

pub mod error;
mod probe;
mod webhook;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use probe::ProbeResponse;
pub use webhook::WebhookClient;

use reqwest::Client;
use std::time::Duration;

/// HTTP client for a deployed application instance
#[derive(Debug, Clone)]
pub struct AppClient {
    /// Base URL of the application (e.g., "http://127.0.0.1:3000")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl AppClient {
    /// Create a new application client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the application (e.g., "http://127.0.0.1:3000")
    ///
    /// # Example
    /// ```
    /// use stagehand_client::AppClient;
    ///
    /// let client = AppClient::new("http://127.0.0.1:3000");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a client whose every request is bounded by `timeout`
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self::with_client(base_url, client))
    }

    /// Create a new application client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the application
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the absolute URL for a path
    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}
