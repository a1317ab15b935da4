//! Stand-in learners for the CLI.
//!
//! Each agent type gets a distinct loss curve so the comparison is
//! meaningful: DQN is noisy while exploration decays, PPO is smooth, and the
//! strategy learner converges fast onto a heuristic floor.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

use super::traits::{Agent, AgentFactory};
use crate::error::{AgentError, CheckpointError};
use crate::training::{AgentType, TrainingConfiguration};

const NUM_WEIGHTS: usize = 16;

#[derive(Serialize)]
struct SimulatedCheckpoint<'a> {
    agent_type: AgentType,
    episode: u32,
    learning_rate: f64,
    epsilon: f64,
    weights: &'a [f64],
}

/// Synthetic learner with a type-specific loss curve
pub struct SimulatedAgent {
    agent_type: AgentType,
    learning_rate: f64,
    episode: u32,
    epsilon: f64,
    weights: Vec<f64>,
    step_cost: Duration,
    rng: StdRng,
}

impl SimulatedAgent {
    pub fn new(agent_type: AgentType, learning_rate: f64, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let weights = (0..NUM_WEIGHTS).map(|_| rng.gen_range(-1.0..1.0)).collect();
        Self {
            agent_type,
            learning_rate,
            episode: 0,
            epsilon: 1.0,
            weights,
            step_cost: Duration::ZERO,
            rng,
        }
    }

    /// Simulated compute time per step
    pub fn with_step_cost(mut self, cost: Duration) -> Self {
        self.step_cost = cost;
        self
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    fn decay_rate(&self) -> f64 {
        self.learning_rate * 3.0
    }

    fn next_loss(&mut self) -> f64 {
        let t = self.episode as f64;
        let k = self.decay_rate();
        let loss = match self.agent_type {
            AgentType::Dqn => {
                self.epsilon = (self.epsilon * 0.995).max(0.05);
                let noise = self.rng.gen_range(-0.15..0.15) * self.epsilon;
                1.5 * (-k * t).exp() + 0.05 + noise
            }
            AgentType::Ppo => {
                let noise = self.rng.gen_range(-0.05..0.05);
                1.2 * (-0.8 * k * t).exp() + 0.04 + noise
            }
            AgentType::Strategy => {
                let noise = self.rng.gen_range(-0.08..0.08);
                0.8 * (-1.5 * k * t).exp() + 0.35 + noise
            }
        };
        loss.max(0.0)
    }

    fn nudge_weights(&mut self, loss: f64) {
        let lr = self.learning_rate;
        for w in self.weights.iter_mut() {
            let grad = *w * loss + self.rng.gen_range(-0.01..0.01);
            *w -= lr * grad;
        }
    }
}

#[async_trait]
impl Agent for SimulatedAgent {
    async fn train_step(&mut self) -> Result<f64, AgentError> {
        if !self.step_cost.is_zero() {
            tokio::time::sleep(self.step_cost).await;
        }
        self.episode += 1;
        let loss = self.next_loss();
        self.nudge_weights(loss);
        Ok(loss)
    }

    async fn save_checkpoint(&mut self, path: &Path) -> Result<(), CheckpointError> {
        let checkpoint = SimulatedCheckpoint {
            agent_type: self.agent_type,
            episode: self.episode,
            learning_rate: self.learning_rate,
            epsilon: self.epsilon,
            weights: &self.weights,
        };
        let body = serde_json::to_vec_pretty(&checkpoint)
            .map_err(|e| CheckpointError::Unrecoverable(format!("encode checkpoint: {}", e)))?;

        match tokio::fs::write(path, body).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => Err(
                CheckpointError::Unrecoverable(format!("{}: {}", path.display(), e)),
            ),
            Err(e) => Err(CheckpointError::Io(e)),
        }
    }
}

/// Factory producing `SimulatedAgent`s
#[derive(Debug, Clone, Default)]
pub struct SimulatedAgentFactory {
    seed: Option<u64>,
    step_cost: Duration,
}

impl SimulatedAgentFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the RNG seed; each agent type derives its own stream from it
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_step_cost(mut self, cost: Duration) -> Self {
        self.step_cost = cost;
        self
    }
}

impl AgentFactory for SimulatedAgentFactory {
    fn create(
        &self,
        agent_type: AgentType,
        config: &TrainingConfiguration,
    ) -> Result<Box<dyn Agent>, AgentError> {
        let seed = self.seed.map(|s| s.wrapping_add(agent_type as u64));
        let agent = SimulatedAgent::new(agent_type, config.learning_rate, seed)
            .with_step_cost(self.step_cost);
        Ok(Box::new(agent))
    }
}
