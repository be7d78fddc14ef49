//! # Synchronization primitives
//!
//! Built on the atomic-wait crate's futex-like `wait` / `wake_one` / `wake_all`:
//! - [Mutex] - a 3-state mutex, no poisoning
//! - [WaitGroup] - waiting for a number of things to finish
//! - [SharedCounter] - a counter that many threads can bump, with the lock sealed inside

mod counter;
mod mutex;
mod wait_group;

pub use counter::SharedCounter;
pub use mutex::{Mutex, MutexGuard};
pub use wait_group::{Done, WaitGroup};
