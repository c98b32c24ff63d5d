//! Cooperative shutdown signal for async background tasks.
//!
//! Replaces stop-flag polling loops with a `Notify`-backed wait: a task
//! blocked in `cancelled().await` wakes immediately when `shutdown()` is
//! called instead of waiting for its next poll interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A cloneable, idempotent shutdown signal.
///
/// All clones share the same state: once any clone calls `shutdown()`,
/// every waiter wakes and every later `cancelled()` call returns
/// immediately.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<ShutdownInner>,
}

#[derive(Default)]
struct ShutdownInner {
    flag: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    /// Create a new signal in the non-shutdown state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal shutdown. Wakes all waiters immediately. Idempotent.
    pub fn shutdown(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Check if shutdown has been requested (non-blocking).
    pub fn is_shutdown(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Wait until `shutdown()` is called. Returns immediately if it already
    /// was.
    pub async fn cancelled(&self) {
        loop {
            if self.is_shutdown() {
                return;
            }
            let notified = self.inner.notify.notified();
            // The flag may have flipped between the check above and waiter
            // registration; re-check before parking.
            if self.is_shutdown() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("is_shutdown", &self.is_shutdown())
            .finish()
    }
}
