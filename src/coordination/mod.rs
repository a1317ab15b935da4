//! Coordination primitives shared by the orchestrator and its runners
//!
//! - Cooperative cancellation that interrupts throttling sleeps immediately
//! - Non-blocking fan-out of training events to listeners

pub mod broadcaster;
pub mod cancel;

pub use broadcaster::{ChannelListener, ListenerId, ProgressBroadcaster, TrainingProgressListener};
pub use cancel::{cancel_pair, CancelHandle, CancelToken};
