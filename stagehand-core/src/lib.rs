//! Stagehand Core
//!
//! Core types and abstractions for the Stagehand release pipeline.
//!
//! This crate contains:
//! - Domain types: Core business entities (PipelineRun, Backup, etc.)
//! - DTOs: Summaries printed by the CLI
//! - Configuration: Settings file loading and validation

pub mod config;
pub mod domain;
pub mod dto;
