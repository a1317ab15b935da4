//! Training Orchestrator
//!
//! Runs DQN, PPO and strategy agents concurrently, one runner task per agent
//! type, with cancellable sessions, checkpoint scheduling and progress
//! fan-out.

pub mod config;
pub mod orchestrator;
mod runner;
pub mod slot;

pub use self::config::OrchestratorConfig;
pub use orchestrator::{StartAllReport, TrainingOrchestrator};
pub use slot::SlotPhase;
