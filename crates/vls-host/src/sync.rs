//! Small synchronisation helpers shared by the session and connection.

use std::sync::{
    Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::time::Duration;

/// Locks `mutex`, recovering the guard if a previous holder panicked.
///
/// Teardown must still run after a panic elsewhere, so poisoning is never
/// treated as fatal.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read-locks `lock`, recovering from poisoning.
pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

/// Write-locks `lock`, recovering from poisoning.
pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// One-shot latch that threads can wait on with a deadline.
#[derive(Debug, Default)]
pub(crate) struct Event {
    flag: Mutex<bool>,
    signal: Condvar,
}

impl Event {
    pub(crate) fn set(&self) {
        *lock(&self.flag) = true;
        self.signal.notify_all();
    }

    pub(crate) fn is_set(&self) -> bool {
        *lock(&self.flag)
    }

    /// Waits up to `timeout` for the latch; returns whether it was set.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = lock(&self.flag);
        let (guard, _) = self
            .signal
            .wait_timeout_while(guard, timeout, |set| !*set)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}
