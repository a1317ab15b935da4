//! Orchestrator Configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Process-wide settings for the training orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Root directory for checkpoints (one subdirectory per agent type)
    pub checkpoint_dir: String,
    /// Checkpoints kept per agent type; older ones are pruned (0 = keep all)
    pub max_checkpoints_per_agent: usize,
    /// Concurrent checkpoint writes allowed against the storage
    pub checkpoint_write_concurrency: usize,
    /// Transient checkpoint failures in a row before the session is failed (0 = never)
    pub max_consecutive_checkpoint_failures: u32,
    /// How long `shutdown` waits for runners before aborting them (ms)
    pub shutdown_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: "./checkpoints".to_string(),
            max_checkpoints_per_agent: 5,
            checkpoint_write_concurrency: 1,
            max_consecutive_checkpoint_failures: 3,
            shutdown_timeout_ms: 10_000,
        }
    }
}

impl OrchestratorConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
