use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;

use activities_core::error::{ActivityError, Result};

/// Lock, recovering the guard from a poisoned mutex.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle of the ambient tokio runtime. Background listeners and timers are
/// spawned through it so sync entry points fail instead of panicking.
pub(crate) fn runtime() -> Result<Handle> {
    Handle::try_current().map_err(|_| ActivityError::Internal("no tokio runtime".into()))
}
