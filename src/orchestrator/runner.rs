//! Agent runner: the per-session training loop
//!
//! One runner task owns one agent instance and one mutable session record.
//! Everyone else sees the session only through immutable snapshots.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::slot::AgentSlot;
use crate::agents::{Agent, CheckpointStore};
use crate::coordination::broadcaster::panic_message;
use crate::coordination::{CancelToken, ProgressBroadcaster};
use crate::error::AgentError;
use crate::training::{AgentType, SessionState, TrainingEvent, TrainingSession};

/// How a training loop ended
#[derive(Debug, Clone, PartialEq)]
enum RunOutcome {
    Completed,
    Interrupted,
    Failed(String),
}

pub(crate) struct AgentRunner {
    slot: Arc<AgentSlot>,
    generation: u64,
    session: TrainingSession,
    agent: Box<dyn Agent>,
    cancel: CancelToken,
    broadcaster: Arc<ProgressBroadcaster>,
    checkpoints: Arc<CheckpointStore>,
    max_checkpoint_failures: u32,
    checkpoint_failures: u32,
}

impl AgentRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        slot: Arc<AgentSlot>,
        generation: u64,
        session: TrainingSession,
        agent: Box<dyn Agent>,
        cancel: CancelToken,
        broadcaster: Arc<ProgressBroadcaster>,
        checkpoints: Arc<CheckpointStore>,
        max_checkpoint_failures: u32,
    ) -> Self {
        Self {
            slot,
            generation,
            session,
            agent,
            cancel,
            broadcaster,
            checkpoints,
            max_checkpoint_failures,
            checkpoint_failures: 0,
        }
    }

    fn agent_type(&self) -> AgentType {
        self.session.agent_type
    }

    /// Drive the session to a terminal state and publish it
    pub async fn run(mut self) {
        info!(
            agent = %self.agent_type(),
            session = %self.session.id,
            max_episodes = self.session.config.max_episodes,
            "training started"
        );

        let outcome = match AssertUnwindSafe(self.train_loop()).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => {
                RunOutcome::Failed(AgentError::Panicked(panic_message(payload.as_ref())).to_string())
            }
        };

        self.finish(outcome);
    }

    async fn train_loop(&mut self) -> RunOutcome {
        let max_episodes = self.session.config.max_episodes;
        let delay = self.session.config.training_delay();

        while self.session.episodes_completed < max_episodes {
            if self.cancel.is_cancelled() {
                return RunOutcome::Interrupted;
            }

            let episode = self.session.episodes_completed + 1;
            let loss = match self.agent.train_step().await {
                Ok(loss) => loss,
                Err(e) => return RunOutcome::Failed(e.to_string()),
            };
            if !loss.is_finite() {
                return RunOutcome::Failed(AgentError::NonFiniteLoss { episode, loss }.to_string());
            }

            self.session.record_episode(loss);
            debug!(
                agent = %self.agent_type(),
                episode,
                loss,
                average_loss = self.session.average_loss,
                "episode complete"
            );
            if !self.publish_progress() {
                return self.superseded();
            }

            if self.session.config.is_checkpoint_due(episode) {
                if let Err(outcome) = self.checkpoint(episode).await {
                    return outcome;
                }
            }

            if self.session.episodes_completed >= max_episodes {
                break;
            }
            if delay.is_zero() {
                tokio::task::yield_now().await;
            } else if !self.cancel.sleep(delay).await {
                return RunOutcome::Interrupted;
            }
        }

        RunOutcome::Completed
    }

    /// Returns `false` once this runner's session was finalized elsewhere
    fn publish_progress(&self) -> bool {
        let snapshot = Arc::new(self.session.clone());
        if !self.slot.publish_snapshot(self.generation, snapshot.clone()) {
            return false;
        }
        self.slot.publish_event(
            self.generation,
            TrainingEvent::Progress {
                agent_type: self.agent_type(),
                session: snapshot,
            },
            &self.broadcaster,
        )
    }

    fn superseded(&self) -> RunOutcome {
        warn!(
            agent = %self.agent_type(),
            session = %self.session.id,
            generation = self.generation,
            "session finalized while stepping, dropping late results"
        );
        RunOutcome::Interrupted
    }

    /// Persist the agent. Returns the outcome to end the session with when it
    /// cannot continue.
    async fn checkpoint(&mut self, episode: u32) -> Result<(), RunOutcome> {
        let agent_type = self.agent_type();
        let result = self
            .checkpoints
            .save(agent_type, self.session.id, episode, self.agent.as_mut())
            .await;

        match result {
            Ok(path) => {
                self.checkpoint_failures = 0;
                self.session.record_checkpoint();
                let published = self
                    .slot
                    .publish_snapshot(self.generation, Arc::new(self.session.clone()))
                    && self.slot.publish_event(
                        self.generation,
                        TrainingEvent::CheckpointSaved {
                            agent_type,
                            episode,
                            path,
                        },
                        &self.broadcaster,
                    );
                if published {
                    Ok(())
                } else {
                    Err(self.superseded())
                }
            }
            Err(e) if e.is_unrecoverable() => {
                error!(agent = %agent_type, episode, error = %e, "checkpoint storage unusable");
                Err(RunOutcome::Failed(e.to_string()))
            }
            Err(e) => {
                self.checkpoint_failures += 1;
                warn!(
                    agent = %agent_type,
                    episode,
                    failures = self.checkpoint_failures,
                    error = %e,
                    "checkpoint failed, continuing"
                );
                let warning = TrainingEvent::CheckpointWarning {
                    agent_type,
                    episode,
                    message: e.to_string(),
                };
                if !self.slot.publish_event(self.generation, warning, &self.broadcaster) {
                    return Err(self.superseded());
                }

                if self.max_checkpoint_failures > 0
                    && self.checkpoint_failures >= self.max_checkpoint_failures
                {
                    return Err(RunOutcome::Failed(format!(
                        "{} consecutive checkpoint failures, last: {}",
                        self.checkpoint_failures, e
                    )));
                }
                Ok(())
            }
        }
    }

    fn finish(mut self, outcome: RunOutcome) {
        let agent_type = self.agent_type();
        let (state, error) = match outcome {
            RunOutcome::Completed => (SessionState::Completed, None),
            RunOutcome::Interrupted => (SessionState::Interrupted, None),
            RunOutcome::Failed(message) => (SessionState::Error, Some(message)),
        };
        self.session.finish(state, error);

        match state {
            SessionState::Error => error!(
                agent = %agent_type,
                session = %self.session.id,
                episodes = self.session.episodes_completed,
                error = self.session.error.as_deref().unwrap_or_default(),
                "training failed"
            ),
            _ => info!(
                agent = %agent_type,
                session = %self.session.id,
                state = %state,
                episodes = self.session.episodes_completed,
                average_loss = self.session.average_loss,
                "training finished"
            ),
        }

        let session = Arc::new(self.session);
        if !self.slot.finalize(self.generation, session, &self.broadcaster) {
            debug!(agent = %agent_type, "session already finalized");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{CheckpointOutcome, ScriptedAgent};
    use crate::coordination::{cancel_pair, ChannelListener};
    use crate::training::TrainingConfiguration;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Harness {
        slot: Arc<AgentSlot>,
        broadcaster: Arc<ProgressBroadcaster>,
        events: UnboundedReceiver<TrainingEvent>,
        dir: std::path::PathBuf,
    }

    impl Harness {
        fn new() -> Self {
            let broadcaster = Arc::new(ProgressBroadcaster::new());
            let (listener, events) = ChannelListener::new();
            broadcaster.add_listener(Arc::new(listener)).unwrap();
            Self {
                slot: Arc::new(AgentSlot::new(AgentType::Dqn)),
                broadcaster,
                events,
                dir: std::env::temp_dir()
                    .join(format!("coach_runner_{}", uuid::Uuid::new_v4().simple())),
            }
        }

        async fn run(&self, agent: ScriptedAgent, config: TrainingConfiguration, max_failures: u32) {
            let ticket = self.slot.try_begin().unwrap();
            let runner = AgentRunner::new(
                self.slot.clone(),
                ticket.generation,
                TrainingSession::new(AgentType::Dqn, config),
                Box::new(agent),
                ticket.token,
                self.broadcaster.clone(),
                Arc::new(CheckpointStore::new(&self.dir, 0, 1)),
                max_failures,
            );
            runner.run().await;
        }

        async fn drain(&mut self) -> Vec<TrainingEvent> {
            let mut events = Vec::new();
            while let Ok(Some(event)) =
                tokio::time::timeout(std::time::Duration::from_millis(200), self.events.recv()).await
            {
                events.push(event);
            }
            events
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    fn quick(episodes: u32) -> TrainingConfiguration {
        TrainingConfiguration::new(episodes, 0.01)
            .without_checkpoints()
            .with_delay_ms(0)
    }

    #[tokio::test]
    async fn test_runs_to_completion() {
        let mut harness = Harness::new();
        harness
            .run(ScriptedAgent::new(vec![1.0, 0.8, 0.6, 0.4, 0.2]), quick(5), 3)
            .await;

        let session = harness.slot.latest().unwrap();
        assert_eq!(session.state, SessionState::Completed);
        assert_eq!(session.episodes_completed, 5);
        assert!((session.average_loss - 0.6).abs() < 1e-9);
        assert!(!harness.slot.is_active());

        let kinds: Vec<_> = harness.drain().await.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds.iter().filter(|k| **k == "progress").count(), 5);
        assert_eq!(kinds.last(), Some(&"completed"));
    }

    #[tokio::test]
    async fn test_step_error_is_forwarded_verbatim() {
        let mut harness = Harness::new();
        harness
            .run(ScriptedAgent::constant(0.5).fail_at(3, "replay buffer empty"), quick(10), 3)
            .await;

        let session = harness.slot.latest().unwrap();
        assert_eq!(session.state, SessionState::Error);
        assert_eq!(session.episodes_completed, 2);
        assert_eq!(session.error.as_deref(), Some("replay buffer empty"));

        let events = harness.drain().await;
        assert!(matches!(
            events.last(),
            Some(TrainingEvent::Error { message, .. }) if message == "replay buffer empty"
        ));
    }

    #[tokio::test]
    async fn test_non_finite_loss_fails_session() {
        let harness = Harness::new();
        harness
            .run(ScriptedAgent::new(vec![0.5, f64::NAN]), quick(5), 3)
            .await;

        let session = harness.slot.latest().unwrap();
        assert_eq!(session.state, SessionState::Error);
        assert_eq!(session.episodes_completed, 1);
        assert!((session.average_loss - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_agent_panic_becomes_error() {
        let harness = Harness::new();
        harness
            .run(ScriptedAgent::constant(0.5).panic_at(2), quick(5), 3)
            .await;

        let session = harness.slot.latest().unwrap();
        assert_eq!(session.state, SessionState::Error);
        assert!(session.error.as_deref().unwrap().contains("scripted panic"));
        assert!(!harness.slot.is_active());
    }

    #[tokio::test]
    async fn test_cancelled_before_first_step() {
        let harness = Harness::new();
        let agent = ScriptedAgent::constant(0.5);
        let steps = agent.step_counter();

        let ticket = harness.slot.try_begin().unwrap();
        harness.slot.request_stop();
        AgentRunner::new(
            harness.slot.clone(),
            ticket.generation,
            TrainingSession::new(AgentType::Dqn, quick(5)),
            Box::new(agent),
            ticket.token,
            harness.broadcaster.clone(),
            Arc::new(CheckpointStore::new(&harness.dir, 0, 1)),
            3,
        )
        .run()
        .await;

        assert_eq!(steps.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(harness.slot.latest().unwrap().state, SessionState::Interrupted);
    }

    #[tokio::test]
    async fn test_stop_interrupts_delay() {
        let harness = Harness::new();
        let (handle, token) = cancel_pair();
        let ticket = harness.slot.try_begin().unwrap();
        let config = TrainingConfiguration::new(100, 0.01)
            .without_checkpoints()
            .with_delay_ms(60_000);

        let runner = AgentRunner::new(
            harness.slot.clone(),
            ticket.generation,
            TrainingSession::new(AgentType::Dqn, config),
            Box::new(ScriptedAgent::constant(0.5)),
            token,
            harness.broadcaster.clone(),
            Arc::new(CheckpointStore::new(&harness.dir, 0, 1)),
            3,
        );
        let task = tokio::spawn(runner.run());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        handle.cancel();

        tokio::time::timeout(std::time::Duration::from_secs(2), task)
            .await
            .expect("runner ignored cancellation")
            .unwrap();
        let session = harness.slot.latest().unwrap();
        assert_eq!(session.state, SessionState::Interrupted);
        assert_eq!(session.episodes_completed, 1);
    }

    #[tokio::test]
    async fn test_finalized_runner_drops_late_progress() {
        let mut harness = Harness::new();
        let ticket = harness.slot.try_begin().unwrap();
        let runner = AgentRunner::new(
            harness.slot.clone(),
            ticket.generation,
            TrainingSession::new(AgentType::Dqn, quick(5)),
            Box::new(ScriptedAgent::constant(0.5)),
            ticket.token,
            harness.broadcaster.clone(),
            Arc::new(CheckpointStore::new(&harness.dir, 0, 1)),
            3,
        );

        // Someone else already recorded this generation as interrupted
        let mut closed = TrainingSession::new(AgentType::Dqn, quick(5));
        closed.finish(SessionState::Interrupted, None);
        let closed = Arc::new(closed);
        assert!(harness
            .slot
            .finalize(ticket.generation, closed.clone(), &harness.broadcaster));
        let next = harness.slot.try_begin().unwrap();
        let fresh = Arc::new(TrainingSession::new(AgentType::Dqn, quick(5)));
        assert!(harness.slot.publish_snapshot(next.generation, fresh.clone()));

        runner.run().await;

        assert_eq!(harness.slot.latest().unwrap().id, fresh.id);
        assert_eq!(harness.slot.history().len(), 1);
        let kinds: Vec<_> = harness.drain().await.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["interrupted"]);
    }

    #[tokio::test]
    async fn test_transient_checkpoint_failure_warns_and_continues() {
        let mut harness = Harness::new();
        let agent = ScriptedAgent::constant(0.3).with_checkpoint_outcomes(vec![
            CheckpointOutcome::Transient("disk busy".into()),
            CheckpointOutcome::Write,
        ]);
        let config = quick(4).with_checkpoints(2);
        harness.run(agent, config, 3).await;

        let session = harness.slot.latest().unwrap();
        assert_eq!(session.state, SessionState::Completed);
        assert_eq!(session.checkpoints_saved, 1);

        let events = harness.drain().await;
        let warnings = events
            .iter()
            .filter(|e| matches!(e, TrainingEvent::CheckpointWarning { episode: 2, .. }))
            .count();
        let saved = events
            .iter()
            .filter(|e| matches!(e, TrainingEvent::CheckpointSaved { episode: 4, .. }))
            .count();
        assert_eq!((warnings, saved), (1, 1));
    }

    #[tokio::test]
    async fn test_repeated_transient_failures_escalate() {
        let harness = Harness::new();
        let agent = ScriptedAgent::constant(0.3).with_checkpoint_outcomes(vec![
            CheckpointOutcome::Transient("a".into()),
            CheckpointOutcome::Transient("b".into()),
        ]);
        harness.run(agent, quick(10).with_checkpoints(1), 2).await;

        let session = harness.slot.latest().unwrap();
        assert_eq!(session.state, SessionState::Error);
        assert_eq!(session.episodes_completed, 2);
        assert!(session.error.as_deref().unwrap().contains("2 consecutive"));
    }

    #[tokio::test]
    async fn test_unrecoverable_checkpoint_failure_ends_session() {
        let harness = Harness::new();
        let agent = ScriptedAgent::constant(0.3)
            .with_checkpoint_outcomes(vec![CheckpointOutcome::Unrecoverable("volume gone".into())]);
        harness.run(agent, quick(10).with_checkpoints(3), 3).await;

        let session = harness.slot.latest().unwrap();
        assert_eq!(session.state, SessionState::Error);
        assert_eq!(session.episodes_completed, 3);
        assert!(session.error.as_deref().unwrap().contains("volume gone"));
    }
}
