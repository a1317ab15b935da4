//! Agent and session enums shared across the orchestrator

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Kind of learner a session trains.
///
/// Exactly one non-terminal session may exist per agent type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    /// Value-based learner (deep Q-network)
    Dqn,
    /// Policy-gradient learner (proximal policy optimization)
    Ppo,
    /// Rule/heuristic-augmented strategy learner
    Strategy,
}

impl AgentType {
    /// Every agent type, in the order `start_all` walks them.
    pub const ALL: [AgentType; 3] = [AgentType::Dqn, AgentType::Ppo, AgentType::Strategy];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Dqn => "dqn",
            AgentType::Ppo => "ppo",
            AgentType::Strategy => "strategy",
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentType::Dqn => f.pad("DQN"),
            AgentType::Ppo => f.pad("PPO"),
            AgentType::Strategy => f.pad("STRATEGY"),
        }
    }
}

impl FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dqn" => Ok(AgentType::Dqn),
            "ppo" => Ok(AgentType::Ppo),
            "strategy" => Ok(AgentType::Strategy),
            other => Err(format!("unknown agent type: {}", other)),
        }
    }
}

/// Lifecycle state of a training session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Runner is stepping the agent
    Running,
    /// All configured episodes finished
    Completed,
    /// Stopped by a cancellation request
    Interrupted,
    /// Agent or storage failure ended the run
    Error,
}

impl SessionState {
    /// Check if the session has reached a final state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionState::Running)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Running => write!(f, "running"),
            SessionState::Completed => write!(f, "completed"),
            SessionState::Interrupted => write!(f, "interrupted"),
            SessionState::Error => write!(f, "error"),
        }
    }
}
