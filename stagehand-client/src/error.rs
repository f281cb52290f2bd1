//! Error types for the Stagehand client

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to the deployed application or a webhook
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed (connection refused, timeout, ...)
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Endpoint answered with a non-success status code
    #[error("Unexpected status {status} from {url}")]
    UnexpectedStatus {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}
