//! Synchronisation helpers shared by the pipeline
//!
//! - [`lock`]: std mutex lock that survives poisoning
//! - [`Signal`]: a resettable, cloneable event with bounded waits

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

/// Lock a std mutex, recovering the guard if a holder panicked
///
/// Critical sections in the pipeline are short and leave their data
/// consistent between statements, so a poisoned lock is still usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Manual-reset event
///
/// Once set, every waiter (current and future) succeeds until the signal is
/// reset. Clones share the same underlying state.
#[derive(Clone, Debug)]
pub struct Signal {
    state: Arc<watch::Sender<bool>>,
}

impl Signal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { state: Arc::new(tx) }
    }

    pub fn set(&self) {
        self.state.send_replace(true);
    }

    pub fn reset(&self) {
        self.state.send_replace(false);
    }

    pub fn is_set(&self) -> bool {
        *self.state.borrow()
    }

    /// Wait until set, or until `timeout` expires
    ///
    /// Returns true if the signal was observed set.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let mut rx = self.state.subscribe();
        let result = tokio::time::timeout(timeout, rx.wait_for(|set| *set)).await;
        match result {
            Ok(Ok(_)) => true,
            // The sender lives as long as self, so a closed channel is unreachable
            Ok(Err(_)) => self.is_set(),
            Err(_) => false,
        }
    }

    /// True if both handles refer to the same event
    pub fn same_as(&self, other: &Signal) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}
