//! Learning cores driven by the orchestrator
//!
//! The orchestrator only sees the `Agent` trait. A fresh agent is built by an
//! `AgentFactory` for every started session and is owned by that session's
//! runner until the run ends.

pub mod checkpoint;
pub mod scripted;
pub mod simulated;
pub mod traits;

pub use checkpoint::{checkpoint_episode, episode_name, CheckpointStore};
pub use scripted::{CheckpointOutcome, ScriptedAgent};
pub use simulated::{SimulatedAgent, SimulatedAgentFactory};
pub use traits::{Agent, AgentFactory};
