//! Stagehand Orchestrator
//!
//! Runs release pipelines against configured environments:
//! - Sequences stages and decides when a rollback is needed
//! - Persists the deployment state (busy markers and run history)
//! - Sends notifications about finished runs
//! - Recovers runs whose owning process died

pub mod error;
pub mod repository;
pub mod service;

pub use error::{OrchestratorError, Result};
pub use repository::{StateError, StateRepository};
pub use service::{NotificationChannel, NotificationHub, Orchestrator};
