//! # Fan-out / fan-in
//!
//! Run a batch of independent tasks on their own threads, collect their outcomes through channels
//! and wait for them deterministically.
//!
//! The pieces, bottom-up:
//! - [sync] - a futex mutex, a wait group and a counter that can't lose updates
//! - [channel] - bounded / rendezvous channels with close + drain, narrowed send-only / receive-only ends and select
//! - [task] - what to run, how to cancel it and what comes back
//! - [coordinator] - starts a batch and waits for it: all of it, the next one, or the first of several sessions

pub mod channel;
pub mod coordinator;
pub mod error;
pub mod sync;
pub mod task;

pub use coordinator::{await_any, Coordinator, CoordinatorConfig, Session, SessionState};
pub use error::CoordinatorError;
pub use sync::SharedCounter;
pub use task::{CancelToken, Job, ResultEnvelope, Task, TaskFailure, TaskId};
