//! Core domain types
//!
//! This module contains the core domain structures used across Stagehand crates.
//! These types represent the fundamental business entities and are shared between
//! orchestrator (for persistence) and runner (for execution).

pub mod backup;
pub mod health;
pub mod notification;
pub mod pipeline;
pub mod stage;
pub mod state;
