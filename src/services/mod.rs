//! Console components: the backend boundary, the session gate, and the
//! state machines that run on top of the polled snapshots.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub mod backend;
pub mod batch;
pub mod console;
pub mod pending;
pub mod poller;
pub mod session;
pub mod uploads;
pub mod verification;
pub mod versions;

/// Guards are never held across an `.await`; a poisoned lock still holds a
/// complete value.
pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
