//! Training session record

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::config::TrainingConfiguration;
use super::types::{AgentType, SessionState};

/// Identifier handed back by `start_training`
pub type SessionId = Uuid;

/// Live or finished state of one agent's training run.
///
/// The owning runner is the only writer. Everything outside the runner works
/// with copies taken from the published snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSession {
    pub id: SessionId,
    pub agent_type: AgentType,
    /// Frozen at start and shared by every snapshot of this session
    pub config: Arc<TrainingConfiguration>,
    pub episodes_completed: u32,
    /// Loss reported by the most recent episode
    pub current_loss: f64,
    /// Running mean of every episode loss so far
    pub average_loss: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub state: SessionState,
    /// Verbatim failure message when `state == Error`
    pub error: Option<String>,
    pub checkpoints_saved: u32,
}

impl TrainingSession {
    pub fn new(agent_type: AgentType, config: impl Into<Arc<TrainingConfiguration>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_type,
            config: config.into(),
            episodes_completed: 0,
            current_loss: 0.0,
            average_loss: 0.0,
            start_time: Utc::now(),
            end_time: None,
            state: SessionState::Running,
            error: None,
            checkpoints_saved: 0,
        }
    }

    /// Fraction of configured episodes completed, clamped to [0, 1]
    pub fn progress(&self) -> f64 {
        if self.config.max_episodes == 0 {
            return 0.0;
        }
        (self.episodes_completed as f64 / self.config.max_episodes as f64).clamp(0.0, 1.0)
    }

    /// Wall time from start until the end (or now, while running)
    pub fn duration(&self) -> Duration {
        self.end_time.unwrap_or_else(Utc::now) - self.start_time
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn remaining_episodes(&self) -> u32 {
        self.config
            .max_episodes
            .saturating_sub(self.episodes_completed)
    }

    /// Record one finished episode and fold its loss into the running mean
    pub(crate) fn record_episode(&mut self, loss: f64) {
        self.episodes_completed += 1;
        self.current_loss = loss;
        self.average_loss += (loss - self.average_loss) / self.episodes_completed as f64;
    }

    pub(crate) fn record_checkpoint(&mut self) {
        self.checkpoints_saved += 1;
    }

    /// Freeze the session in a terminal state
    pub(crate) fn finish(&mut self, state: SessionState, error: Option<String>) {
        debug_assert!(state.is_terminal());
        self.state = state;
        self.error = error;
        self.end_time = Some(Utc::now());
    }
}
