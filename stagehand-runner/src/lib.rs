//! Stagehand runner
//!
//! The pieces that touch the outside world during a pipeline run: the
//! snapshot store, the application process controller, the health prober,
//! external commands, and the stage runners built on top of them.

pub mod command;
pub mod context;
pub mod fsutil;
pub mod health;
pub mod process;
pub mod snapshot;
pub mod stages;

pub use context::{Services, StageContext, StageRecorder};
pub use health::HealthProber;
pub use process::{ProcessController, ProcessError, ProcessHandle};
pub use snapshot::{SnapshotError, SnapshotStore};
pub use stages::{StageRegistry, StageRunner};
