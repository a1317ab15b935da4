//! Progress Broadcaster
//!
//! Fans training events out to any number of listeners without ever blocking
//! the publisher. Every listener owns a dedicated dispatch thread fed by an
//! unbounded queue:
//! - a slow listener only delays its own deliveries
//! - per-listener FIFO keeps events of one agent type in production order
//! - a panicking listener is logged and keeps receiving later events
//!
//! The registry lock is never held while a callback runs, so listeners may
//! add or remove listeners (including themselves) from inside a callback.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::training::{
    AgentType, SessionId, TrainingConfiguration, TrainingEvent, TrainingSession,
};

/// Callbacks invoked for training lifecycle events.
///
/// Callbacks run on the listener's own dispatch thread. All methods default
/// to no-ops; `on_event` routes each event to the matching callback and can be
/// overridden to consume raw events instead.
pub trait TrainingProgressListener: Send + Sync {
    fn on_training_started(
        &self,
        _agent_type: AgentType,
        _session_id: SessionId,
        _config: &TrainingConfiguration,
    ) {
    }

    fn on_training_progress(&self, _agent_type: AgentType, _session: &TrainingSession) {}

    fn on_training_completed(&self, _agent_type: AgentType, _session: &TrainingSession) {}

    fn on_training_error(&self, _agent_type: AgentType, _message: &str) {}

    fn on_training_interrupted(&self, _agent_type: AgentType, _session: &TrainingSession) {}

    fn on_checkpoint_saved(&self, _agent_type: AgentType, _episode: u32, _path: &Path) {}

    fn on_checkpoint_warning(&self, _agent_type: AgentType, _episode: u32, _message: &str) {}

    fn on_event(&self, event: &TrainingEvent) {
        match event {
            TrainingEvent::Started {
                agent_type,
                session_id,
                config,
            } => self.on_training_started(*agent_type, *session_id, config),
            TrainingEvent::Progress {
                agent_type,
                session,
            } => self.on_training_progress(*agent_type, session),
            TrainingEvent::Completed {
                agent_type,
                session,
            } => self.on_training_completed(*agent_type, session),
            TrainingEvent::Interrupted {
                agent_type,
                session,
            } => self.on_training_interrupted(*agent_type, session),
            TrainingEvent::Error {
                agent_type,
                message,
            } => self.on_training_error(*agent_type, message),
            TrainingEvent::CheckpointSaved {
                agent_type,
                episode,
                path,
            } => self.on_checkpoint_saved(*agent_type, *episode, path),
            TrainingEvent::CheckpointWarning {
                agent_type,
                episode,
                message,
            } => self.on_checkpoint_warning(*agent_type, *episode, message),
        }
    }
}

/// Handle returned by `add_listener`, used to deregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

struct ListenerEntry {
    id: ListenerId,
    tx: mpsc::UnboundedSender<TrainingEvent>,
    active: Arc<AtomicBool>,
}

/// Non-blocking fan-out of training events
pub struct ProgressBroadcaster {
    listeners: Mutex<Vec<ListenerEntry>>,
    next_id: AtomicU64,
    published_total: AtomicU64,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            published_total: AtomicU64::new(0),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Vec<ListenerEntry>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a listener. It receives only events published after this call.
    pub fn add_listener(&self, listener: Arc<dyn TrainingProgressListener>) -> Result<ListenerId> {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel::<TrainingEvent>();
        let active = Arc::new(AtomicBool::new(true));

        let dispatch_active = active.clone();
        std::thread::Builder::new()
            .name(format!("coach-{}", id))
            .spawn(move || dispatch_loop(id, listener, rx, dispatch_active))?;

        self.registry().push(ListenerEntry { id, tx, active });
        debug!("Registered progress {}", id);
        Ok(id)
    }

    /// Deregister a listener. Events not yet dispatched to it are dropped.
    ///
    /// Returns `false` if the id was unknown.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.registry();
        match listeners.iter().position(|entry| entry.id == id) {
            Some(index) => {
                let entry = listeners.remove(index);
                entry.active.store(false, Ordering::SeqCst);
                debug!("Removed progress {}", id);
                true
            }
            None => false,
        }
    }

    /// Queue `event` for every registered listener and return immediately
    pub fn publish(&self, event: TrainingEvent) {
        self.published_total.fetch_add(1, Ordering::Relaxed);

        let mut listeners = self.registry();
        listeners.retain(|entry| {
            if entry.tx.send(event.clone()).is_ok() {
                true
            } else {
                warn!("Dropping progress {}: dispatch thread has exited", entry.id);
                false
            }
        });
    }

    pub fn listener_count(&self) -> usize {
        self.registry().len()
    }

    /// Events published since creation
    pub fn published_total(&self) -> u64 {
        self.published_total.load(Ordering::Relaxed)
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

fn dispatch_loop(
    id: ListenerId,
    listener: Arc<dyn TrainingProgressListener>,
    mut rx: mpsc::UnboundedReceiver<TrainingEvent>,
    active: Arc<AtomicBool>,
) {
    // Plain thread, outside any runtime, so blocking_recv is allowed
    while let Some(event) = rx.blocking_recv() {
        if !active.load(Ordering::SeqCst) {
            break;
        }
        let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_event(&event)));
        if let Err(payload) = outcome {
            warn!(
                "Progress {} panicked handling {} event for {}: {}",
                id,
                event.kind(),
                event.agent_type(),
                panic_message(payload.as_ref())
            );
        }
    }
    debug!("Dispatch thread for {} finished", id);
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Listener that forwards raw events into a tokio channel.
///
/// Convenient for async consumers (UI loops, tests) that prefer `recv().await`
/// over callbacks.
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<TrainingEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TrainingEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TrainingProgressListener for ChannelListener {
    fn on_event(&self, event: &TrainingEvent) {
        let _ = self.tx.send(event.clone());
    }
}
