//! Scoped lock acquisition.
//!
//! Every lock in the crate is released by dropping its guard. A poisoned lock
//! only means another thread panicked while holding it; the protected data
//! structures stay consistent between statements, so the guard is recovered
//! and the event is logged instead of propagating the panic.

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub(crate) trait MutexExt<T> {
    fn acquire(&self) -> MutexGuard<'_, T>;
}

impl<T> MutexExt<T> for Mutex<T> {
    #[inline]
    fn acquire(&self) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
            tracing::warn!("mutex poisoned, recovering guard");
            poisoned.into_inner()
        })
    }
}

pub(crate) trait RwLockExt<T> {
    fn acquire_read(&self) -> RwLockReadGuard<'_, T>;
    fn acquire_write(&self) -> RwLockWriteGuard<'_, T>;
}

impl<T> RwLockExt<T> for RwLock<T> {
    #[inline]
    fn acquire_read(&self) -> RwLockReadGuard<'_, T> {
        self.read().unwrap_or_else(|poisoned| {
            tracing::warn!("rwlock poisoned (read), recovering guard");
            poisoned.into_inner()
        })
    }

    #[inline]
    fn acquire_write(&self) -> RwLockWriteGuard<'_, T> {
        self.write().unwrap_or_else(|poisoned| {
            tracing::warn!("rwlock poisoned (write), recovering guard");
            poisoned.into_inner()
        })
    }
}
