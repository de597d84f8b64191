//! Mutual exclusion for bucket state.
//!
//! Every critical section guarded here is a constant-time slot update, so the guard can either be
//! a standard [Mutex] or a spinning `spin::Mutex`. The `spin` feature selects the latter for
//! buckets.

use std::sync::{Mutex, PoisonError};

/// Exclusive access to a value for the duration of a closure.
pub trait Lock<T>: Send + Sync {
    /// Wraps `value` in the lock.
    fn new(value: T) -> Self;

    /// Runs `f` with exclusive access to the guarded value.
    ///
    /// `f` must not block or acquire another [Lock].
    fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R;
}

impl<T: Send> Lock<T> for Mutex<T> {
    fn new(value: T) -> Self {
        Mutex::new(value)
    }

    fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        // Guarded state is only ever mutated by infallible slot updates, so a poisoned
        // lock still holds consistent data.
        let mut guard = self.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

#[cfg(feature = "spin")]
impl<T: Send> Lock<T> for spin::Mutex<T> {
    fn new(value: T) -> Self {
        spin::Mutex::new(value)
    }

    fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.lock())
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "spin")] {
        /// The guard used by every bucket.
        pub(crate) type BucketLock<T> = spin::Mutex<T>;
    } else {
        /// The guard used by every bucket.
        pub(crate) type BucketLock<T> = Mutex<T>;
    }
}
