//! Training Data Model
//!
//! Value types shared by the orchestrator, runners and listeners:
//! run configuration, session records, events and the cross-agent comparison.

pub mod comparison;
pub mod config;
pub mod event;
pub mod session;
pub mod types;

pub use comparison::{compare_performance, TrainingComparison};
pub use self::config::TrainingConfiguration;
pub use event::TrainingEvent;
pub use session::{SessionId, TrainingSession};
pub use types::{AgentType, SessionState};
