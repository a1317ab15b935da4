//! Lifecycle and progress events fanned out to listeners

use std::path::PathBuf;
use std::sync::Arc;

use super::config::TrainingConfiguration;
use super::session::{SessionId, TrainingSession};
use super::types::AgentType;

/// Events published by runners through the progress broadcaster.
///
/// Events for one agent type reach every listener in the order they were
/// produced. Terminal events (`Completed`, `Interrupted`, `Error` ending a
/// session) are published exactly once per session.
#[derive(Debug, Clone)]
pub enum TrainingEvent {
    /// A session was created and its runner spawned
    Started {
        agent_type: AgentType,
        session_id: SessionId,
        config: Arc<TrainingConfiguration>,
    },
    /// One episode finished
    Progress {
        agent_type: AgentType,
        session: Arc<TrainingSession>,
    },
    /// All configured episodes finished
    Completed {
        agent_type: AgentType,
        session: Arc<TrainingSession>,
    },
    /// A stop request ended the session
    Interrupted {
        agent_type: AgentType,
        session: Arc<TrainingSession>,
    },
    /// Session failure, or a start request rejected by `start_all`
    Error {
        agent_type: AgentType,
        message: String,
    },
    /// Agent weights were persisted
    CheckpointSaved {
        agent_type: AgentType,
        episode: u32,
        path: PathBuf,
    },
    /// Checkpoint write failed; training continues
    CheckpointWarning {
        agent_type: AgentType,
        episode: u32,
        message: String,
    },
}

impl TrainingEvent {
    pub fn agent_type(&self) -> AgentType {
        match self {
            TrainingEvent::Started { agent_type, .. }
            | TrainingEvent::Progress { agent_type, .. }
            | TrainingEvent::Completed { agent_type, .. }
            | TrainingEvent::Interrupted { agent_type, .. }
            | TrainingEvent::Error { agent_type, .. }
            | TrainingEvent::CheckpointSaved { agent_type, .. }
            | TrainingEvent::CheckpointWarning { agent_type, .. } => *agent_type,
        }
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            TrainingEvent::Started { .. } => "started",
            TrainingEvent::Progress { .. } => "progress",
            TrainingEvent::Completed { .. } => "completed",
            TrainingEvent::Interrupted { .. } => "interrupted",
            TrainingEvent::Error { .. } => "error",
            TrainingEvent::CheckpointSaved { .. } => "checkpoint_saved",
            TrainingEvent::CheckpointWarning { .. } => "checkpoint_warning",
        }
    }

    /// `Completed`, `Interrupted` or `Error`
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TrainingEvent::Completed { .. }
                | TrainingEvent::Interrupted { .. }
                | TrainingEvent::Error { .. }
        )
    }

    /// Session snapshot carried by the event, if any
    pub fn session(&self) -> Option<&TrainingSession> {
        match self {
            TrainingEvent::Progress { session, .. }
            | TrainingEvent::Completed { session, .. }
            | TrainingEvent::Interrupted { session, .. } => Some(session),
            _ => None,
        }
    }
}
