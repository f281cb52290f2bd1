//! Notification Service
//!
//! Fans a [`Notification`] out to every configured channel: the log, a JSON
//! lines file, and a webhook. Delivery is best-effort; a failing channel is
//! logged and never changes the outcome of a run.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use stagehand_client::{ClientError, WebhookClient};
use stagehand_core::config::NotificationSettings;
use stagehand_core::domain::notification::{Notification, NotificationKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Failed to write notification file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize notification: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Webhook delivery failed: {0}")]
    Webhook(#[from] ClientError),
}

/// A destination for notifications
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Short channel name used in log messages
    fn name(&self) -> &str;

    /// Delivers one notification
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications through `tracing`
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let data = notification.data.to_string();
        match notification.kind {
            NotificationKind::Success => info!("[notification] success: {}", data),
            NotificationKind::Failure => warn!("[notification] failure: {}", data),
            NotificationKind::Rollback => warn!("[notification] rollback: {}", data),
            NotificationKind::CriticalFailure => {
                error!("[notification] CRITICAL FAILURE, requires human attention: {}", data)
            }
        }
        Ok(())
    }
}

/// Appends notifications as JSON lines
pub struct FileChannel {
    path: PathBuf,
}

impl FileChannel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl NotificationChannel for FileChannel {
    fn name(&self) -> &str {
        "file"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let mut line = serde_json::to_vec(notification)?;
        line.push(b'\n');

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// POSTs notifications to a URL
pub struct WebhookChannel {
    client: WebhookClient,
}

impl WebhookChannel {
    pub fn new(client: WebhookClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.client.deliver(notification).await?;
        Ok(())
    }
}

/// Fan-out over all channels
#[derive(Clone, Default)]
pub struct NotificationHub {
    channels: Vec<Arc<dyn NotificationChannel>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the channels enabled in settings
    ///
    /// A webhook that cannot be configured is skipped with a warning.
    pub fn from_settings(settings: &NotificationSettings) -> Self {
        let mut hub = Self::new();

        if settings.log {
            hub = hub.with_channel(Arc::new(LogChannel));
        }

        if let Some(path) = &settings.file {
            hub = hub.with_channel(Arc::new(FileChannel::new(path.clone())));
        }

        if let Some(url) = &settings.webhook_url {
            match WebhookClient::new(url.clone(), Duration::from_secs(settings.webhook_timeout_secs)) {
                Ok(client) => hub = hub.with_channel(Arc::new(WebhookChannel::new(client))),
                Err(e) => warn!("Webhook notifications disabled: {}", e),
            }
        }

        hub
    }

    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// Builds a notification and delivers it to every channel
    ///
    /// # Arguments
    /// * `kind` - Notification type
    /// * `data` - Payload, carrying at least run_id, environment and status
    ///
    /// # Returns
    /// The notification that was sent
    pub async fn notify(&self, kind: NotificationKind, data: JsonValue) -> Notification {
        let notification = Notification::new(kind, data);

        for channel in &self.channels {
            if let Err(e) = channel.send(&notification).await {
                warn!(
                    "Notification channel {} failed to deliver {}: {}",
                    channel.name(),
                    kind,
                    e
                );
            }
        }

        notification
    }
}
