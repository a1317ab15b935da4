//! Per-agent-type slot
//!
//! Each agent type owns one slot with its own lock, so control-plane calls
//! for different agent types never contend. The slot walks an explicit phase
//! machine:
//!
//! ```text
//! Idle -> Starting -> Running -> Stopping -> Idle
//!            |           \__________________/^
//!            +-> Stopping (stop raced the start)
//! ```
//!
//! Session snapshots are published through a `watch` channel, so readers
//! always get a whole immutable record and never a half-written one.

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::coordination::{cancel_pair, CancelHandle, CancelToken, ProgressBroadcaster};
use crate::error::{CoachError, Result};
use crate::training::{AgentType, SessionState, TrainingEvent, TrainingSession};

/// Control-plane phase of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPhase {
    /// No session in flight; a start is allowed
    Idle,
    /// Start accepted, runner not attached yet
    Starting,
    /// Runner is stepping the agent
    Running,
    /// Cancellation signalled, waiting for the runner to exit
    Stopping,
}

impl SlotPhase {
    /// A non-terminal session exists
    pub fn is_active(&self) -> bool {
        !matches!(self, SlotPhase::Idle)
    }
}

impl std::fmt::Display for SlotPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotPhase::Idle => write!(f, "idle"),
            SlotPhase::Starting => write!(f, "starting"),
            SlotPhase::Running => write!(f, "running"),
            SlotPhase::Stopping => write!(f, "stopping"),
        }
    }
}

struct SlotControl {
    phase: SlotPhase,
    /// Bumped on every accepted start; stale runners cannot touch a newer session
    generation: u64,
    cancel: Option<CancelHandle>,
    task: Option<JoinHandle<()>>,
}

impl SlotControl {
    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.phase.is_active()
    }
}

/// Ticket for a start in progress
pub(crate) struct StartTicket {
    pub generation: u64,
    pub token: CancelToken,
}

pub(crate) struct AgentSlot {
    agent_type: AgentType,
    control: Mutex<SlotControl>,
    snapshot: watch::Sender<Option<Arc<TrainingSession>>>,
    history: Mutex<Vec<Arc<TrainingSession>>>,
}

impl AgentSlot {
    pub fn new(agent_type: AgentType) -> Self {
        let (snapshot, _) = watch::channel(None);
        Self {
            agent_type,
            control: Mutex::new(SlotControl {
                phase: SlotPhase::Idle,
                generation: 0,
                cancel: None,
                task: None,
            }),
            snapshot,
            history: Mutex::new(Vec::new()),
        }
    }

    fn control(&self) -> MutexGuard<'_, SlotControl> {
        self.control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn phase(&self) -> SlotPhase {
        self.control().phase
    }

    pub fn is_active(&self) -> bool {
        self.phase().is_active()
    }

    /// Latest published snapshot (running or terminal)
    pub fn latest(&self) -> Option<Arc<TrainingSession>> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<TrainingSession>>> {
        self.snapshot.subscribe()
    }

    /// Swap in a new snapshot of the live session.
    ///
    /// Returns `false` without publishing when `generation` was already
    /// finalized or superseded, e.g. a runner that `shutdown` aborted while
    /// it was blocked inside a step.
    pub fn publish_snapshot(&self, generation: u64, session: Arc<TrainingSession>) -> bool {
        let control = self.control();
        if !control.is_current(generation) {
            return false;
        }
        self.snapshot.send_replace(Some(session));
        true
    }

    /// Publish a non-terminal event on behalf of `generation`.
    ///
    /// Held under the slot lock, so it cannot land after that generation's
    /// terminal event.
    pub fn publish_event(
        &self,
        generation: u64,
        event: TrainingEvent,
        broadcaster: &ProgressBroadcaster,
    ) -> bool {
        let control = self.control();
        if !control.is_current(generation) {
            return false;
        }
        broadcaster.publish(event);
        true
    }

    /// Terminal sessions, oldest first
    pub fn history(&self) -> Vec<Arc<TrainingSession>> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Idle -> Starting
    pub fn try_begin(&self) -> Result<StartTicket> {
        let mut control = self.control();
        if control.phase.is_active() {
            return Err(CoachError::AlreadyRunning(self.agent_type));
        }
        let (handle, token) = cancel_pair();
        control.generation += 1;
        control.phase = SlotPhase::Starting;
        control.cancel = Some(handle);
        debug!(agent = %self.agent_type, generation = control.generation, "slot starting");
        Ok(StartTicket {
            generation: control.generation,
            token,
        })
    }

    /// Starting -> Idle when the session could not be created
    pub fn abort_start(&self, generation: u64) {
        let mut control = self.control();
        if control.is_current(generation) {
            control.phase = SlotPhase::Idle;
            control.cancel = None;
            control.task = None;
        }
        drop(control);
        self.snapshot.send_modify(|_| {});
    }

    /// Starting -> Running, keeping `Stopping` if a stop raced the start.
    ///
    /// A runner that already finished (slot back to idle, or a newer
    /// generation) is left detached.
    pub fn attach(&self, generation: u64, task: JoinHandle<()>) {
        let mut control = self.control();
        if !control.is_current(generation) {
            return;
        }
        if control.phase == SlotPhase::Starting {
            control.phase = SlotPhase::Running;
        }
        control.task = Some(task);
    }

    /// Signal cancellation to the current session. Returns `false` when there
    /// was nothing to stop or a stop was already pending.
    pub fn request_stop(&self) -> bool {
        let mut control = self.control();
        match control.phase {
            SlotPhase::Starting | SlotPhase::Running => {
                control.phase = SlotPhase::Stopping;
                if let Some(cancel) = &control.cancel {
                    cancel.cancel();
                }
                true
            }
            SlotPhase::Stopping | SlotPhase::Idle => false,
        }
    }

    /// Take the runner handle so the caller can await it
    pub fn take_task(&self) -> Option<(u64, JoinHandle<()>)> {
        let mut control = self.control();
        let generation = control.generation;
        control.task.take().map(|task| (generation, task))
    }

    /// Record the terminal session and return the slot to idle.
    ///
    /// Runs at most once per generation: the snapshot, history entry and
    /// terminal event are all produced under the slot lock, so the next start
    /// for this agent type is ordered after them.
    pub fn finalize(
        &self,
        generation: u64,
        session: Arc<TrainingSession>,
        broadcaster: &ProgressBroadcaster,
    ) -> bool {
        let mut control = self.control();
        if !control.is_current(generation) {
            return false;
        }

        self.snapshot.send_replace(Some(session.clone()));
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(session.clone());
        broadcaster.publish(terminal_event(self.agent_type, session));

        control.phase = SlotPhase::Idle;
        control.cancel = None;
        control.task = None;
        true
    }
}

fn terminal_event(agent_type: AgentType, session: Arc<TrainingSession>) -> TrainingEvent {
    match session.state {
        SessionState::Completed => TrainingEvent::Completed {
            agent_type,
            session,
        },
        SessionState::Error => TrainingEvent::Error {
            agent_type,
            message: session
                .error
                .clone()
                .unwrap_or_else(|| "training failed".to_string()),
        },
        SessionState::Interrupted | SessionState::Running => TrainingEvent::Interrupted {
            agent_type,
            session,
        },
    }
}
