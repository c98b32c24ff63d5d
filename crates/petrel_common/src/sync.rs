//! One-shot future cell: a value set once by an initializer and awaited by
//! any number of readers. Backs process-global registration of services that
//! come up during recovery (readers block until registration instead of
//! racing it).

use parking_lot::Mutex;
use tokio::sync::Notify;

/// An async cell that readers can await before the value exists.
///
/// `set` stores the value and wakes all pending `get` calls. Setting again
/// replaces the value (a coordinator re-registers after re-recovery); readers
/// always observe the most recent value at the time they wake.
pub struct FutureCell<T: Clone> {
    value: Mutex<Option<T>>,
    notify: Notify,
}

impl<T: Clone> FutureCell<T> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Store the value and wake all waiters.
    pub fn set(&self, value: T) {
        *self.value.lock() = Some(value);
        self.notify.notify_waiters();
    }

    /// The value if already set (non-blocking).
    pub fn try_get(&self) -> Option<T> {
        self.value.lock().clone()
    }

    /// Wait until the value is set, then return a clone of it.
    pub async fn get(&self) -> T {
        loop {
            let notified = self.notify.notified();
            if let Some(v) = self.try_get() {
                return v;
            }
            notified.await;
        }
    }
}

impl<T: Clone> Default for FutureCell<T> {
    fn default() -> Self {
        Self::new()
    }
}
