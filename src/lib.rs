pub mod agents;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod error;
pub mod orchestrator;
pub mod training;

pub use agents::{
    Agent, AgentFactory, CheckpointOutcome, CheckpointStore, ScriptedAgent, SimulatedAgent,
    SimulatedAgentFactory,
};
pub use self::config::{AppConfig, LoggingConfig};
pub use coordination::{
    cancel_pair, CancelHandle, CancelToken, ChannelListener, ListenerId, ProgressBroadcaster,
    TrainingProgressListener,
};
pub use error::{AgentError, CheckpointError, CoachError, Result};
pub use orchestrator::{OrchestratorConfig, SlotPhase, StartAllReport, TrainingOrchestrator};
pub use training::{
    compare_performance, AgentType, SessionId, SessionState, TrainingComparison,
    TrainingConfiguration, TrainingEvent, TrainingSession,
};
