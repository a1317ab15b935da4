use thiserror::Error;

use crate::training::AgentType;

/// Main error type for the training orchestrator
#[derive(Error, Debug)]
pub enum CoachError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid training configuration: {0}")]
    InvalidConfig(String),

    // Session lifecycle errors
    #[error("Training already running for {0}")]
    AlreadyRunning(AgentType),

    // Collaborator errors
    #[error("Agent failure: {0}")]
    Agent(#[from] AgentError),

    #[error("Checkpoint failure: {0}")]
    Checkpoint(#[from] CheckpointError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for CoachError
pub type Result<T> = std::result::Result<T, CoachError>;

/// Errors raised by an agent while training.
///
/// Any of these ends the owning session with `SessionState::Error`; sibling
/// agent types are unaffected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    /// Failure reported by the learning core, forwarded verbatim
    #[error("{0}")]
    Step(String),

    #[error("non-finite loss {loss} at episode {episode}")]
    NonFiniteLoss { episode: u32, loss: f64 },

    #[error("agent panicked: {0}")]
    Panicked(String),

    #[error("failed to create agent: {0}")]
    Creation(String),
}

/// Errors raised while persisting agent weights
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Write failed but storage is expected to recover; training continues
    #[error("transient checkpoint failure: {0}")]
    Transient(String),

    /// Storage is gone or unusable; the session is terminated
    #[error("unrecoverable checkpoint failure: {0}")]
    Unrecoverable(String),

    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CheckpointError {
    /// Whether this failure should terminate the session on its own
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, CheckpointError::Unrecoverable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_running_display() {
        let err = CoachError::AlreadyRunning(AgentType::Ppo);
        assert_eq!(err.to_string(), "Training already running for PPO");
    }

    #[test]
    fn test_agent_step_error_is_verbatim() {
        let err = AgentError::Step("replay buffer exhausted".to_string());
        assert_eq!(err.to_string(), "replay buffer exhausted");
    }

    #[test]
    fn test_checkpoint_error_classification() {
        assert!(CheckpointError::Unrecoverable("disk gone".into()).is_unrecoverable());
        assert!(!CheckpointError::Transient("busy".into()).is_unrecoverable());

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(!CheckpointError::from(io).is_unrecoverable());
    }

    #[test]
    fn test_agent_error_converts_into_coach_error() {
        let err: CoachError = AgentError::Creation("no weights".into()).into();
        assert_eq!(err.to_string(), "Agent failure: failed to create agent: no weights");
    }
}
