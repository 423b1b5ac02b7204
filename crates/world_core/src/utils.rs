//! # Utility Functions
//!
//! Small helpers shared across the world core.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Returns the current Unix timestamp in seconds.
///
/// Used for persisted records and log context, never for cooldowns; those
/// read the injected [`Clock`](crate::clock::Clock).
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

/// Locks a std mutex, recovering the guard if a previous holder panicked.
///
/// Every mutex in the core guards plain bookkeeping that stays consistent
/// between statements, so a poisoned lock is still safe to use.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_recovers_from_poison() {
        let mutex = std::sync::Arc::new(Mutex::new(1));
        let poisoner = mutex.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        assert!(mutex.is_poisoned());
        *lock(&mutex) += 1;
        assert_eq!(*lock(&mutex), 2);
    }

    #[test]
    fn timestamp_is_after_2020() {
        assert!(current_timestamp() > 1_577_836_800);
    }
}
