//! Deterministic agent that replays a fixed loss sequence.
//!
//! Used by tests and by embedders that want to exercise orchestration
//! behaviour (failures, slow steps, flaky storage) without a real learner.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::traits::Agent;
use crate::error::{AgentError, CheckpointError};

/// Scripted outcome for one checkpoint request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointOutcome {
    Write,
    Transient(String),
    Unrecoverable(String),
}

/// Agent replaying `losses`; the last loss repeats once the script runs out
pub struct ScriptedAgent {
    losses: Vec<f64>,
    step_delay: Duration,
    fail_at: Option<(u32, String)>,
    panic_at: Option<u32>,
    checkpoint_script: VecDeque<CheckpointOutcome>,
    steps: Arc<AtomicU32>,
    checkpoints: Arc<Mutex<Vec<PathBuf>>>,
}

impl ScriptedAgent {
    pub fn new(losses: Vec<f64>) -> Self {
        Self {
            losses,
            step_delay: Duration::ZERO,
            fail_at: None,
            panic_at: None,
            checkpoint_script: VecDeque::new(),
            steps: Arc::new(AtomicU32::new(0)),
            checkpoints: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Agent reporting the same loss forever
    pub fn constant(loss: f64) -> Self {
        Self::new(vec![loss])
    }

    /// Make every step take `delay` (not interruptible, like real compute)
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Fail the `episode`-th step (1-based) with `message`
    pub fn fail_at(mut self, episode: u32, message: impl Into<String>) -> Self {
        self.fail_at = Some((episode, message.into()));
        self
    }

    /// Panic inside the `episode`-th step (1-based)
    pub fn panic_at(mut self, episode: u32) -> Self {
        self.panic_at = Some(episode);
        self
    }

    /// Outcomes for successive checkpoint requests; unscripted requests write
    pub fn with_checkpoint_outcomes(mut self, outcomes: Vec<CheckpointOutcome>) -> Self {
        self.checkpoint_script = outcomes.into();
        self
    }

    /// Shared counter of started steps
    pub fn step_counter(&self) -> Arc<AtomicU32> {
        self.steps.clone()
    }

    /// Shared log of successfully written checkpoint paths
    pub fn checkpoint_log(&self) -> Arc<Mutex<Vec<PathBuf>>> {
        self.checkpoints.clone()
    }

    fn loss_for(&self, episode: u32) -> f64 {
        let index = (episode as usize).saturating_sub(1);
        self.losses
            .get(index)
            .or_else(|| self.losses.last())
            .copied()
            .unwrap_or(0.0)
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn train_step(&mut self) -> Result<f64, AgentError> {
        let episode = self.steps.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.step_delay.is_zero() {
            tokio::time::sleep(self.step_delay).await;
        }
        if self.panic_at == Some(episode) {
            panic!("scripted panic at episode {}", episode);
        }
        if let Some((fail_episode, message)) = &self.fail_at {
            if *fail_episode == episode {
                return Err(AgentError::Step(message.clone()));
            }
        }
        Ok(self.loss_for(episode))
    }

    async fn save_checkpoint(&mut self, path: &Path) -> Result<(), CheckpointError> {
        match self
            .checkpoint_script
            .pop_front()
            .unwrap_or(CheckpointOutcome::Write)
        {
            CheckpointOutcome::Write => {
                let body = serde_json::json!({
                    "steps": self.steps.load(Ordering::SeqCst),
                    "losses": self.losses,
                });
                tokio::fs::write(path, body.to_string()).await?;
                self.checkpoints
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push(path.to_path_buf());
                Ok(())
            }
            CheckpointOutcome::Transient(message) => Err(CheckpointError::Transient(message)),
            CheckpointOutcome::Unrecoverable(message) => {
                Err(CheckpointError::Unrecoverable(message))
            }
        }
    }
}
