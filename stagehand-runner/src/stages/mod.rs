//! Stage runners
//!
//! One runner per pipeline stage. A runner never propagates errors: whatever
//! happens is converted into a [`StageResult`] through its recorder.
//!
//! Runners are trait objects so the orchestrator can be handed test doubles.

mod build;
mod deploy;
mod security;
mod test;
mod verify;

pub use build::BuildStage;
pub use deploy::DeployStage;
pub use security::{Finding, SecurityStage};
pub use test::TestStage;
pub use verify::VerifyStage;

use async_trait::async_trait;
use stagehand_core::domain::stage::{StageName, StageResult};
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::StageContext;

#[async_trait]
pub trait StageRunner: Send + Sync {
    /// Stage this runner executes
    fn stage(&self) -> StageName;

    /// Runs the stage to completion
    async fn run(&self, ctx: &StageContext) -> StageResult;
}

/// Runner lookup by stage name
#[derive(Clone)]
pub struct StageRegistry {
    runners: HashMap<StageName, Arc<dyn StageRunner>>,
}

impl StageRegistry {
    pub fn empty() -> Self {
        Self {
            runners: HashMap::new(),
        }
    }

    /// The built-in runners for every stage
    pub fn standard() -> Self {
        Self::empty()
            .with(Arc::new(TestStage))
            .with(Arc::new(BuildStage))
            .with(Arc::new(SecurityStage))
            .with(Arc::new(DeployStage))
            .with(Arc::new(VerifyStage))
    }

    /// Registers a runner, replacing any runner for the same stage
    pub fn with(mut self, runner: Arc<dyn StageRunner>) -> Self {
        self.runners.insert(runner.stage(), runner);
        self
    }

    pub fn get(&self, stage: StageName) -> Option<Arc<dyn StageRunner>> {
        self.runners.get(&stage).cloned()
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Runs blocking filesystem work on the blocking pool
pub(crate) async fn blocking<T, F>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| anyhow::anyhow!("blocking task failed: {}", e))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StageRecorder;

    struct AlwaysFails;

    #[async_trait]
    impl StageRunner for AlwaysFails {
        fn stage(&self) -> StageName {
            StageName::Test
        }

        async fn run(&self, _ctx: &StageContext) -> StageResult {
            StageRecorder::new(StageName::Test).finish(Err(anyhow::anyhow!("nope")))
        }
    }

    #[test]
    fn test_standard_registry_covers_every_stage() {
        let registry = StageRegistry::standard();
        for stage in StageName::ALL {
            let runner = registry.get(stage).unwrap();
            assert_eq!(runner.stage(), stage);
        }
    }

    #[test]
    fn test_override_replaces_runner() {
        let registry = StageRegistry::standard().with(Arc::new(AlwaysFails));
        let runner = registry.get(StageName::Test).unwrap();
        assert_eq!(runner.stage(), StageName::Test);
        assert!(StageRegistry::empty().get(StageName::Test).is_none());
    }
}
