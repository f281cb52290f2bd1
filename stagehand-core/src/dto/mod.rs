//! Data Transfer Objects for CLI output
//!
//! This module contains the summaries the CLI prints as machine-readable JSON.
//! DTOs are lightweight, flattened views of domain entities.

pub mod backup;
pub mod run;
pub mod status;
