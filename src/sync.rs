use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock helper that recovers the guard from a poisoned mutex.
///
/// Task state is only mutated inside short critical sections that never run
/// user code, so a poisoned lock still holds consistent data.
pub(crate) trait MutexExt<T> {
    fn locked(&self) -> MutexGuard<'_, T>;
}

impl<T> MutexExt<T> for Mutex<T> {
    fn locked(&self) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
