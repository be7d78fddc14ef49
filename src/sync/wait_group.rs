//! # Wait group
//!
//! A counter of unfinished things and a way to sleep until it drops to zero.
//!
//! It's the futex counter trick again: `wait` reads the counter and sleeps only if it still has the value it read,
//! so a `done` that happens in-between can't be missed.
//! Only the last `done` (the one that hits zero) makes the wake syscall.

use std::sync::{
    atomic::{
        AtomicU32,
        Ordering::{Acquire, Relaxed, Release},
    },
    Arc,
};

use atomic_wait::{wait, wake_all};

#[derive(Debug, Default)]
pub struct WaitGroup {
    count: AtomicU32,
}

impl WaitGroup {
    pub const fn new() -> Self {
        Self {
            count: AtomicU32::new(0),
        }
    }

    /// # Panics
    /// - if the counter would overflow, it's left as it was
    pub fn add(&self, n: u32) {
        // Relaxed is enough: add happens-before the work is handed out by other means (spawn, send)
        if self
            .count
            .fetch_update(Relaxed, Relaxed, |count| count.checked_add(n))
            .is_err()
        {
            panic!("wait group counter overflow");
        }
    }

    /// # Panics
    /// - if called more times than things were added
    pub fn done(&self) {
        // Release, so whatever the finished thing did is visible after wait returns
        match self
            .count
            .fetch_update(Release, Relaxed, |count| count.checked_sub(1))
        {
            Ok(1) => wake_all(&self.count),
            Ok(_) => {}
            Err(_) => panic!("negative wait group counter"),
        }
    }

    /// Blocks until the counter is zero, returns straight away if it already is
    pub fn wait(&self) {
        loop {
            let count = self.count.load(Acquire);
            if count == 0 {
                return;
            }
            wait(&self.count, count);
        }
    }

    pub fn count(&self) -> u32 {
        self.count.load(Relaxed)
    }

    /// Adds 1 and returns a token that calls `done` when dropped,
    /// so a thing that panics or returns early still counts as finished
    pub fn guard(self: &Arc<Self>) -> Done {
        self.add(1);
        Done {
            group: Arc::clone(self),
        }
    }
}

/// See [WaitGroup::guard]
#[derive(Debug)]
pub struct Done {
    group: Arc<WaitGroup>,
}

impl Drop for Done {
    fn drop(&mut self) {
        self.group.done();
    }
}
