//! Training Orchestrator
//!
//! Control plane for the three agent types: starts and stops runners,
//! exposes session snapshots and the cross-agent comparison, and owns the
//! progress broadcaster.

use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::config::OrchestratorConfig;
use super::runner::AgentRunner;
use super::slot::{AgentSlot, SlotPhase};
use crate::agents::{AgentFactory, CheckpointStore};
use crate::coordination::{
    ChannelListener, ListenerId, ProgressBroadcaster, TrainingProgressListener,
};
use crate::error::{CoachError, Result};
use crate::training::{
    AgentType, SessionId, SessionState, TrainingComparison, TrainingConfiguration, TrainingEvent,
    TrainingSession,
};

/// Outcome of `start_all`: which agent types started and which were refused
#[derive(Debug, Clone, Default)]
pub struct StartAllReport {
    pub started: Vec<(AgentType, SessionId)>,
    pub rejected: Vec<(AgentType, String)>,
}

impl StartAllReport {
    /// Every agent type started
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }

    pub fn session_id(&self, agent_type: AgentType) -> Option<SessionId> {
        self.started
            .iter()
            .find(|(t, _)| *t == agent_type)
            .map(|(_, id)| *id)
    }

    pub fn started_types(&self) -> Vec<AgentType> {
        self.started.iter().map(|(t, _)| *t).collect()
    }
}

/// Coordinates concurrent training of DQN, PPO and strategy agents.
///
/// At most one non-terminal session exists per agent type. All methods take
/// `&self`; the orchestrator is meant to be shared behind an `Arc`.
pub struct TrainingOrchestrator {
    dqn: Arc<AgentSlot>,
    ppo: Arc<AgentSlot>,
    strategy: Arc<AgentSlot>,
    factory: Arc<dyn AgentFactory>,
    broadcaster: Arc<ProgressBroadcaster>,
    checkpoints: Arc<CheckpointStore>,
    config: OrchestratorConfig,
    runtime: Handle,
}

impl TrainingOrchestrator {
    /// Create an orchestrator spawning runners on the current tokio runtime
    pub fn new(config: OrchestratorConfig, factory: Arc<dyn AgentFactory>) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| CoachError::Internal(format!("no tokio runtime: {}", e)))?;
        Ok(Self::with_runtime(config, factory, runtime))
    }

    /// Create an orchestrator spawning runners on `runtime`
    pub fn with_runtime(
        config: OrchestratorConfig,
        factory: Arc<dyn AgentFactory>,
        runtime: Handle,
    ) -> Self {
        let checkpoints = Arc::new(CheckpointStore::new(
            &config.checkpoint_dir,
            config.max_checkpoints_per_agent,
            config.checkpoint_write_concurrency,
        ));
        Self {
            dqn: Arc::new(AgentSlot::new(AgentType::Dqn)),
            ppo: Arc::new(AgentSlot::new(AgentType::Ppo)),
            strategy: Arc::new(AgentSlot::new(AgentType::Strategy)),
            factory,
            broadcaster: Arc::new(ProgressBroadcaster::new()),
            checkpoints,
            config,
            runtime,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn checkpoint_store(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    fn slot(&self, agent_type: AgentType) -> &Arc<AgentSlot> {
        match agent_type {
            AgentType::Dqn => &self.dqn,
            AgentType::Ppo => &self.ppo,
            AgentType::Strategy => &self.strategy,
        }
    }

    fn slots(&self) -> [&Arc<AgentSlot>; 3] {
        [&self.dqn, &self.ppo, &self.strategy]
    }

    /// Start a session for `agent_type` and return without waiting for it
    pub fn start_training(
        &self,
        agent_type: AgentType,
        config: TrainingConfiguration,
    ) -> Result<SessionId> {
        config.validate()?;
        self.start_validated(agent_type, config)
    }

    fn start_validated(
        &self,
        agent_type: AgentType,
        config: TrainingConfiguration,
    ) -> Result<SessionId> {
        let slot = self.slot(agent_type);
        let ticket = slot.try_begin()?;

        let agent = match self.factory.create(agent_type, &config) {
            Ok(agent) => agent,
            Err(e) => {
                slot.abort_start(ticket.generation);
                warn!(agent = %agent_type, error = %e, "agent construction failed");
                return Err(e.into());
            }
        };

        let config = Arc::new(config);
        let session = TrainingSession::new(agent_type, config.clone());
        let session_id = session.id;
        let started = TrainingEvent::Started {
            agent_type,
            session_id,
            config,
        };
        if !slot.publish_snapshot(ticket.generation, Arc::new(session.clone()))
            || !slot.publish_event(ticket.generation, started, &self.broadcaster)
        {
            return Err(CoachError::Internal(format!(
                "{} slot was reset during start",
                agent_type
            )));
        }

        let runner = AgentRunner::new(
            slot.clone(),
            ticket.generation,
            session,
            agent,
            ticket.token,
            self.broadcaster.clone(),
            self.checkpoints.clone(),
            self.config.max_consecutive_checkpoint_failures,
        );
        let task = self.runtime.spawn(runner.run());
        slot.attach(ticket.generation, task);

        debug!(agent = %agent_type, session = %session_id, "runner spawned");
        Ok(session_id)
    }

    /// Start every agent type with the same configuration.
    ///
    /// Types that cannot start are skipped, reported, and announced through an
    /// `Error` event; the others still start.
    pub fn start_all(&self, config: TrainingConfiguration) -> Result<StartAllReport> {
        config.validate()?;

        let mut report = StartAllReport::default();
        for agent_type in AgentType::ALL {
            match self.start_validated(agent_type, config.clone()) {
                Ok(session_id) => report.started.push((agent_type, session_id)),
                Err(e) => {
                    let message = e.to_string();
                    self.broadcaster.publish(TrainingEvent::Error {
                        agent_type,
                        message: message.clone(),
                    });
                    report.rejected.push((agent_type, message));
                }
            }
        }

        info!(
            started = report.started.len(),
            rejected = report.rejected.len(),
            "start_all finished"
        );
        Ok(report)
    }

    /// Signal the running session for `agent_type` to stop.
    ///
    /// Returns `false` when nothing was running or a stop was already pending.
    pub fn stop_training(&self, agent_type: AgentType) -> bool {
        let signalled = self.slot(agent_type).request_stop();
        if signalled {
            info!(agent = %agent_type, "stop requested");
        }
        signalled
    }

    /// Signal every running session to stop; returns how many were signalled
    pub fn stop_all(&self) -> usize {
        AgentType::ALL
            .into_iter()
            .filter(|t| self.stop_training(*t))
            .count()
    }

    pub fn is_training(&self, agent_type: AgentType) -> bool {
        self.slot(agent_type).is_active()
    }

    pub fn is_any_training(&self) -> bool {
        self.slots().iter().any(|slot| slot.is_active())
    }

    /// Control-plane phase for `agent_type`
    pub fn phase(&self, agent_type: AgentType) -> SlotPhase {
        self.slot(agent_type).phase()
    }

    /// Latest snapshot (running or terminal) for `agent_type`
    pub fn session(&self, agent_type: AgentType) -> Option<TrainingSession> {
        self.slot(agent_type).latest().map(|s| (*s).clone())
    }

    /// Finished sessions for `agent_type`, oldest first
    pub fn session_history(&self, agent_type: AgentType) -> Vec<TrainingSession> {
        self.slot(agent_type)
            .history()
            .into_iter()
            .map(|s| (*s).clone())
            .collect()
    }

    /// Fresh comparison across the latest sessions
    pub fn comparison(&self) -> TrainingComparison {
        TrainingComparison::from_sessions(AgentType::ALL.map(|t| (t, self.session(t))))
    }

    pub fn add_progress_listener(
        &self,
        listener: Arc<dyn TrainingProgressListener>,
    ) -> Result<ListenerId> {
        self.broadcaster.add_listener(listener)
    }

    pub fn remove_progress_listener(&self, id: ListenerId) -> bool {
        self.broadcaster.remove_listener(id)
    }

    /// Receive events on a tokio channel instead of through callbacks
    pub fn subscribe_channel(&self) -> Result<(ListenerId, UnboundedReceiver<TrainingEvent>)> {
        let (listener, rx) = ChannelListener::new();
        let id = self.broadcaster.add_listener(Arc::new(listener))?;
        Ok((id, rx))
    }

    /// Wait until `agent_type` has no live session; returns the latest snapshot
    pub async fn wait_until_idle(&self, agent_type: AgentType) -> Option<TrainingSession> {
        let slot = self.slot(agent_type);
        let mut changes = slot.subscribe();
        while slot.is_active() {
            if changes.changed().await.is_err() {
                break;
            }
        }
        slot.latest().map(|s| (*s).clone())
    }

    pub async fn wait_until_all_idle(&self) {
        for agent_type in AgentType::ALL {
            self.wait_until_idle(agent_type).await;
        }
    }

    /// Stop everything and wait for runners up to the configured timeout.
    ///
    /// Runners still alive at the deadline are aborted and their sessions
    /// recorded as interrupted. Returns the number of aborted runners.
    pub async fn shutdown(&self) -> usize {
        let signalled = self.stop_all();
        info!(signalled, "shutting down training orchestrator");

        let deadline = Instant::now() + self.config.shutdown_timeout();
        let mut aborted = 0;
        for slot in self.slots() {
            let Some((generation, mut task)) = slot.take_task() else {
                continue;
            };
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "runner task failed");
                    self.finalize_interrupted(slot, generation);
                }
                Err(_) => {
                    task.abort();
                    if self.finalize_interrupted(slot, generation) {
                        aborted += 1;
                    }
                }
            }
        }

        if aborted > 0 {
            warn!(aborted, "runners did not stop in time and were aborted");
        }
        aborted
    }

    fn finalize_interrupted(&self, slot: &AgentSlot, generation: u64) -> bool {
        let Some(latest) = slot.latest() else {
            return false;
        };
        let mut session = (*latest).clone();
        if !session.is_terminal() {
            session.finish(SessionState::Interrupted, None);
        }
        slot.finalize(generation, Arc::new(session), &self.broadcaster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{Agent, ScriptedAgent};
    use crate::error::AgentError;
    use std::time::Duration;

    fn factory<F>(build: F) -> Arc<dyn AgentFactory>
    where
        F: Fn(AgentType) -> ScriptedAgent + Send + Sync + 'static,
    {
        Arc::new(
            move |agent_type: AgentType,
                  _: &TrainingConfiguration|
                  -> std::result::Result<Box<dyn Agent>, AgentError> {
                Ok(Box::new(build(agent_type)))
            },
        )
    }

    fn orchestrator<F>(build: F) -> TrainingOrchestrator
    where
        F: Fn(AgentType) -> ScriptedAgent + Send + Sync + 'static,
    {
        let config = OrchestratorConfig {
            checkpoint_dir: std::env::temp_dir()
                .join(format!("coach_orch_{}", uuid::Uuid::new_v4().simple()))
                .to_string_lossy()
                .to_string(),
            shutdown_timeout_ms: 200,
            ..OrchestratorConfig::default()
        };
        TrainingOrchestrator::new(config, factory(build)).unwrap()
    }

    fn quick(episodes: u32) -> TrainingConfiguration {
        TrainingConfiguration::new(episodes, 0.01)
            .without_checkpoints()
            .with_delay_ms(0)
    }

    async fn idle(orch: &TrainingOrchestrator, agent_type: AgentType) -> TrainingSession {
        tokio::time::timeout(Duration::from_secs(5), orch.wait_until_idle(agent_type))
            .await
            .expect("session did not finish")
            .expect("no session")
    }

    #[test]
    fn test_new_requires_runtime() {
        let result = TrainingOrchestrator::new(
            OrchestratorConfig::default(),
            factory(|_| ScriptedAgent::constant(0.1)),
        );
        assert!(matches!(result, Err(CoachError::Internal(_))));
    }

    #[tokio::test]
    async fn test_invalid_config_allocates_nothing() {
        let orch = orchestrator(|_| ScriptedAgent::constant(0.1));
        let err = orch
            .start_training(AgentType::Dqn, TrainingConfiguration::new(0, 0.01))
            .unwrap_err();

        assert!(matches!(err, CoachError::InvalidConfig(_)));
        assert!(!orch.is_training(AgentType::Dqn));
        assert!(orch.session(AgentType::Dqn).is_none());
    }

    #[tokio::test]
    async fn test_factory_failure_leaves_slot_idle() {
        let failing: Arc<dyn AgentFactory> = Arc::new(
            |_: AgentType,
             _: &TrainingConfiguration|
             -> std::result::Result<Box<dyn Agent>, AgentError> {
                Err(AgentError::Creation("no weights".into()))
            },
        );
        let orch = TrainingOrchestrator::new(OrchestratorConfig::default(), failing).unwrap();

        let err = orch.start_training(AgentType::Ppo, quick(3)).unwrap_err();
        assert!(matches!(err, CoachError::Agent(AgentError::Creation(_))));
        assert!(!orch.is_training(AgentType::Ppo));
        assert_eq!(orch.phase(AgentType::Ppo), SlotPhase::Idle);
    }

    #[tokio::test]
    async fn test_session_visible_right_after_start() {
        let orch = orchestrator(|_| {
            ScriptedAgent::constant(0.5).with_step_delay(Duration::from_millis(50))
        });
        let id = orch.start_training(AgentType::Strategy, quick(100)).unwrap();

        let session = orch.session(AgentType::Strategy).unwrap();
        assert_eq!(session.id, id);
        assert_eq!(session.state, SessionState::Running);
        assert!(orch.is_training(AgentType::Strategy));
        assert!(orch.is_any_training());

        orch.stop_training(AgentType::Strategy);
        idle(&orch, AgentType::Strategy).await;
    }

    #[tokio::test]
    async fn test_history_keeps_finished_sessions() {
        let orch = orchestrator(|_| ScriptedAgent::constant(0.2));
        let first = orch.start_training(AgentType::Dqn, quick(2)).unwrap();
        idle(&orch, AgentType::Dqn).await;
        let second = orch.start_training(AgentType::Dqn, quick(3)).unwrap();
        idle(&orch, AgentType::Dqn).await;

        let history = orch.session_history(AgentType::Dqn);
        let ids: Vec<_> = history.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![first, second]);
        assert!(history.iter().all(|s| s.state == SessionState::Completed));
    }

    #[tokio::test]
    async fn test_shutdown_aborts_stuck_runner() {
        let orch = orchestrator(|_| {
            ScriptedAgent::constant(0.5).with_step_delay(Duration::from_secs(30))
        });
        orch.start_training(AgentType::Ppo, quick(10)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let aborted = orch.shutdown().await;
        assert_eq!(aborted, 1);
        assert!(!orch.is_training(AgentType::Ppo));
        let session = orch.session(AgentType::Ppo).unwrap();
        assert_eq!(session.state, SessionState::Interrupted);
        assert_eq!(orch.session_history(AgentType::Ppo).len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_with_cooperative_runners() {
        let orch = orchestrator(|_| ScriptedAgent::constant(0.5));
        orch.start_all(quick(1_000_000).with_delay_ms(5)).unwrap();

        assert_eq!(orch.shutdown().await, 0);
        assert!(!orch.is_any_training());
        for agent_type in AgentType::ALL {
            assert_eq!(
                orch.session(agent_type).unwrap().state,
                SessionState::Interrupted
            );
        }
    }

    #[test]
    fn test_start_all_report_helpers() {
        let id = uuid::Uuid::new_v4();
        let report = StartAllReport {
            started: vec![(AgentType::Dqn, id)],
            rejected: vec![(AgentType::Ppo, "busy".into())],
        };
        assert!(!report.is_complete());
        assert_eq!(report.session_id(AgentType::Dqn), Some(id));
        assert_eq!(report.session_id(AgentType::Ppo), None);
        assert_eq!(report.started_types(), vec![AgentType::Dqn]);
    }
}
