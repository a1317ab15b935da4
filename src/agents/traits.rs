//! Learning-core seam
//!
//! The orchestrator never looks inside a learner. It drives it one training
//! step at a time and asks it to persist its weights on schedule.

use async_trait::async_trait;
use std::path::Path;

use crate::error::{AgentError, CheckpointError};
use crate::training::{AgentType, TrainingConfiguration};

/// A trainable agent owned exclusively by its runner while a session is live.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Agent: Send {
    /// Run one training episode and return its loss
    async fn train_step(&mut self) -> Result<f64, AgentError>;

    /// Persist the current weights to `path`. The file format is the agent's.
    async fn save_checkpoint(&mut self, path: &Path) -> Result<(), CheckpointError>;
}

/// Builds a fresh agent for every started session
pub trait AgentFactory: Send + Sync {
    fn create(
        &self,
        agent_type: AgentType,
        config: &TrainingConfiguration,
    ) -> Result<Box<dyn Agent>, AgentError>;
}

impl<F> AgentFactory for F
where
    F: Fn(AgentType, &TrainingConfiguration) -> Result<Box<dyn Agent>, AgentError> + Send + Sync,
{
    fn create(
        &self,
        agent_type: AgentType,
        config: &TrainingConfiguration,
    ) -> Result<Box<dyn Agent>, AgentError> {
        self(agent_type, config)
    }
}
