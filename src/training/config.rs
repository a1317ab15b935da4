//! Training run parameters

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{CoachError, Result};

/// Immutable parameters for one training run.
///
/// Built fresh for every `start_training` call and frozen into the session
/// once the run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfiguration {
    /// Number of episodes to train before completing
    pub max_episodes: u32,
    /// Learning rate handed to the agent
    pub learning_rate: f64,
    /// Persist agent weights on a schedule
    pub save_checkpoints: bool,
    /// Episodes between checkpoints (must be > 0 when checkpoints are on)
    pub checkpoint_interval: u32,
    /// Pause after each step to bound CPU usage (ms)
    pub training_delay_ms: u64,
}

impl Default for TrainingConfiguration {
    fn default() -> Self {
        Self {
            max_episodes: 1_000,
            learning_rate: 1e-3,
            save_checkpoints: true,
            checkpoint_interval: 100,
            training_delay_ms: 10,
        }
    }
}

impl TrainingConfiguration {
    pub fn new(max_episodes: u32, learning_rate: f64) -> Self {
        Self {
            max_episodes,
            learning_rate,
            ..Self::default()
        }
    }

    pub fn with_checkpoints(mut self, interval: u32) -> Self {
        self.save_checkpoints = true;
        self.checkpoint_interval = interval;
        self
    }

    pub fn without_checkpoints(mut self) -> Self {
        self.save_checkpoints = false;
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.training_delay_ms = delay_ms;
        self
    }

    /// Throttle applied between steps
    pub fn training_delay(&self) -> Duration {
        Duration::from_millis(self.training_delay_ms)
    }

    /// Whether a checkpoint is due after `episode` completed episodes
    pub fn is_checkpoint_due(&self, episode: u32) -> bool {
        self.save_checkpoints
            && self.checkpoint_interval > 0
            && episode > 0
            && episode % self.checkpoint_interval == 0
    }

    /// Reject configurations that cannot drive a run
    pub fn validate(&self) -> Result<()> {
        if self.max_episodes == 0 {
            return Err(CoachError::InvalidConfig(
                "max_episodes must be > 0".to_string(),
            ));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(CoachError::InvalidConfig(format!(
                "learning_rate must be a positive finite number, got {}",
                self.learning_rate
            )));
        }
        if self.save_checkpoints && self.checkpoint_interval == 0 {
            return Err(CoachError::InvalidConfig(
                "checkpoint_interval must be > 0 when save_checkpoints is enabled".to_string(),
            ));
        }
        Ok(())
    }
}
