//! Cooperative cancellation for runner tasks
//!
//! A `CancelHandle` stays with the orchestrator slot; the matching
//! `CancelToken` travels into the runner. Cancelling wakes every pending
//! `cancelled()` / `sleep()` immediately, so throttling delays never hold up
//! a stop request.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Create a connected handle/token pair
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelToken { rx })
}

/// Sending side of a cancellation signal
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Request cancellation. Returns `true` only for the first request.
    pub fn cancel(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Receiving side of a cancellation signal
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is requested.
    ///
    /// If every handle is dropped without cancelling, this never resolves.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns `true` if the full duration elapsed, `false` if cancelled.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
