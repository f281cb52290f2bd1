//! Repository Module
//!
//! Persistence layer for the orchestrator. Deployment state lives in a single
//! JSON document rewritten atomically on every transition.

pub mod state;

// Re-export for convenience
pub use state::{StateError, StateRepository};
