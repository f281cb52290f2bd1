//! Health check domain types

use serde::{Deserialize, Serialize};

/// Outcome of one health check against a running application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub check_name: String,
    pub healthy: bool,
    pub detail: Option<String>,
    /// Attempts made before the result was settled
    #[serde(default)]
    pub attempts: u32,
}

/// Full battery of checks, in the order they ran
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthReport {
    pub checks: Vec<HealthCheckResult>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        !self.checks.is_empty() && self.checks.iter().all(|c| c.healthy)
    }

    pub fn failures(&self) -> impl Iterator<Item = &HealthCheckResult> {
        self.checks.iter().filter(|c| !c.healthy)
    }

    /// One line per check, used as stage log lines
    pub fn summary_lines(&self) -> Vec<String> {
        self.checks
            .iter()
            .map(|c| {
                let state = if c.healthy { "ok" } else { "FAILED" };
                match &c.detail {
                    Some(detail) => format!("{}: {} ({})", c.check_name, state, detail),
                    None => format!("{}: {}", c.check_name, state),
                }
            })
            .collect()
    }
}
