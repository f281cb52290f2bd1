//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services sit on top of the state repository and the runner crate.

pub mod history;
pub mod notification;
pub mod orchestrator;

// Re-export for convenience
pub use history::HistorySink;
pub use notification::{
    FileChannel, LogChannel, NotificationChannel, NotificationHub, NotifyError, WebhookChannel,
};
pub use orchestrator::Orchestrator;
