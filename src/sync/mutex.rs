//! # Mutex
//!
//! A futex-style mutex on top of the [atomic-wait](https://crates.io/crates/atomic-wait) crate's `wait` / `wake_one`.
//!
//! The state is a u32 with 3 values:
//! - 0 - unlocked
//! - 1 - locked, nobody is waiting
//! - 2 - locked, other threads may be waiting
//!
//! Uncontended lock and unlock never make a syscall: locking is a single CAS 0 -> 1
//! and the guard only wakes somebody if the state says there might be somebody to wake.
//! Contended locking spins for a short while first, as locks are commonly held for brief moments.
//!
//! Unlike `std::sync::Mutex`, there's no poisoning: a panic while holding the guard unlocks the mutex
//! like any other exit path does.

use std::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{
        AtomicU32,
        Ordering::{Acquire, Relaxed, Release},
    },
};

use atomic_wait::{wait, wake_one};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;
const CONTENDED: u32 = 2;

/// The critical sections in this crate are a counter bump or a queue push,
/// the lock usually frees up well within this many rounds
const SPIN_LIMIT: u32 = 100;

pub struct Mutex<T> {
    state: AtomicU32,
    value: UnsafeCell<T>,
}

/// the value only gets touched by the thread holding the lock => sharing the mutex needs `T: Send` only
unsafe impl<T> Sync for Mutex<T> where T: Send {}

impl<T> Mutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            state: AtomicU32::new(UNLOCKED),
            value: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        if self
            .state
            .compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed)
            .is_err()
        {
            self.lock_contended();
        }
        MutexGuard { mutex: self }
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.state
            .compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed)
            .ok()
            .map(|_| MutexGuard { mutex: self })
    }

    /// Exclusive access without locking, `&mut self` is the proof nobody else holds it
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }

    #[cold]
    fn lock_contended(&self) {
        for _ in 0..SPIN_LIMIT {
            match self.state.load(Relaxed) {
                UNLOCKED => {
                    if self
                        .state
                        .compare_exchange_weak(UNLOCKED, LOCKED, Acquire, Relaxed)
                        .is_ok()
                    {
                        return;
                    }
                }
                LOCKED => std::hint::spin_loop(),
                // somebody is asleep already, spinning would only jump the queue
                _ => break,
            }
        }

        // leaves CONTENDED behind, so our unlock wakes whoever else is sleeping here
        while self.state.swap(CONTENDED, Acquire) != UNLOCKED {
            wait(&self.state, CONTENDED);
        }
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut d = f.debug_struct("Mutex");
        match self.try_lock() {
            Some(guard) => d.field("value", &*guard),
            None => d.field("value", &format_args!("<locked>")),
        };
        d.finish()
    }
}

/// Proof of holding the lock. Dropping it is the only way to unlock.
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

unsafe impl<T> Send for MutexGuard<'_, T> where T: Send {}
/// sharing the guard shares `&T`
unsafe impl<T> Sync for MutexGuard<'_, T> where T: Sync {}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        // SAFETY: the guard exists => the lock is held
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: the guard exists => the lock is held
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        // no syscall unless somebody announced waiting
        if self.mutex.state.swap(UNLOCKED, Release) == CONTENDED {
            wake_one(&self.mutex.state);
        }
    }
}
