//! # Shared counter
//!
//! The "struct with a sum and a mutex next to it" done so the two can't drift apart:
//! the lock is private and every operation is a single short critical section.
//! There's no way to read or write the number without holding the lock.

use super::Mutex;

#[derive(Debug, Default)]
pub struct SharedCounter {
    value: Mutex<u64>,
}

impl SharedCounter {
    pub const fn new(initial: u64) -> Self {
        Self {
            value: Mutex::new(initial),
        }
    }

    /// +1, returns the new value
    pub fn increment(&self) -> u64 {
        self.add(1)
    }

    /// Returns the new value.
    ///
    /// # Panics
    /// - on u64 overflow, the lock is released regardless
    pub fn add(&self, n: u64) -> u64 {
        let mut value = self.value.lock();
        *value = value
            .checked_add(n)
            .unwrap_or_else(|| panic!("shared counter overflow"));
        *value
    }

    pub fn get(&self) -> u64 {
        *self.value.lock()
    }

    /// Replaces the value with what `f` makes of it.
    /// If `f` fails the value stays as it was. The lock is released either way.
    ///
    /// `f` runs under the lock, keep it short.
    pub fn try_update<E>(&self, f: impl FnOnce(u64) -> Result<u64, E>) -> Result<u64, E> {
        let mut value = self.value.lock();
        *value = f(*value)?;
        Ok(*value)
    }

    pub fn into_inner(self) -> u64 {
        self.value.into_inner()
    }
}

#[cfg(test)]
mod test {
    use std::{
        panic::{catch_unwind, AssertUnwindSafe},
        thread::scope,
    };

    use super::*;

    #[test]
    fn test_no_lost_updates() {
        // repeated, as a flaky count is what a locking bug looks like
        for _ in 0..10 {
            let counter = SharedCounter::default();
            scope(|s| {
                for _ in 0..1000 {
                    s.spawn(|| counter.increment());
                }
            });
            assert_eq!(1000, counter.get());
        }
    }

    #[test]
    fn test_increment_returns_distinct_values() {
        let counter = SharedCounter::new(0);
        let mut seen: Vec<u64> = scope(|s| {
            let handles: Vec<_> = (0..100).map(|_| s.spawn(|| counter.increment())).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        seen.sort_unstable();
        assert_eq!((1..=100).collect::<Vec<_>>(), seen);
    }

    #[test]
    fn test_failed_update_releases_the_lock() {
        let counter = SharedCounter::new(5);
        let result: Result<u64, &str> = counter.try_update(|_| Err("nope"));
        assert_eq!(Err("nope"), result);
        // would hang if the lock was still held
        assert_eq!(6, counter.increment());
        assert_eq!(Ok::<_, ()>(12), counter.try_update(|v| Ok(v * 2)));
    }

    #[test]
    fn test_overflow_releases_the_lock() {
        let counter = SharedCounter::new(u64::MAX);
        let result = catch_unwind(AssertUnwindSafe(|| counter.add(1)));
        assert!(result.is_err());
        assert_eq!(u64::MAX, counter.get());
    }
}
