//! Lock helpers shared by the mutex-guarded components.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Acquire a std mutex, recovering the guard if a previous holder panicked.
///
/// Every critical section in this crate is O(1) and leaves its state
/// consistent before any call that could panic, so a poisoned lock still
/// holds valid data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
