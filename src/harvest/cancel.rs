//! Cooperative cancellation
//!
//! One `CancelSignal` is shared by the controller and whoever may stop it
//! (the Ctrl-C handler in the binary, a test). Every browser call and every
//! sleep in the harvest loop is raced against it.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;

/// Returned by a guarded operation that lost the race against cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

impl From<Cancelled> for crate::HarvestError {
    fn from(_: Cancelled) -> Self {
        crate::HarvestError::Cancelled
    }
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cloneable cancellation flag with async wake-up
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    inner: Arc<Inner>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal and wakes every waiter
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the signal is raised
    pub async fn cancelled(&self) {
        // Registered before the flag check, so a concurrent cancel() is not missed
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// Runs `fut` unless cancellation wins first
    ///
    /// # Returns
    ///
    /// * `Ok(output)` - The future completed
    /// * `Err(Cancelled)` - The signal was raised before or while it ran
    pub async fn guard<F>(&self, fut: F) -> Result<F::Output, Cancelled>
    where
        F: Future,
    {
        if self.is_cancelled() {
            return Err(Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(Cancelled),
            output = fut => Ok(output),
        }
    }

    /// Sleeps for `duration`; returns false if cancelled first
    pub async fn sleep(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.is_cancelled();
        }
        self.guard(tokio::time::sleep(duration)).await.is_ok()
    }
}
