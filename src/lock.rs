use std::sync::{Mutex, MutexGuard};

use tracing::warn;

/// Locks the cache, recovering the guard if a previous holder panicked. The cache stays usable:
/// every profile in it is either flushed or still marked dirty.
pub(crate) fn mutex_lock<'a, T>(lock: &'a Mutex<T>, op: &'static str) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                lock_kind = "mutex.lock",
                result = "poisoned_recovered",
                "Recovered from poisoned profile cache lock"
            );
            poisoned.into_inner()
        }
    }
}
