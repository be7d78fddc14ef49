//! # Tasks
//!
//! A [Task] is a unit of work the coordinator runs on its own thread. What the work is doesn't matter
//! to the coordinator: anything implementing [Job] will do, closures included.
//! The outcome comes back as a [ResultEnvelope], one per task.
//!
//! Jobs get a [CancelToken] to check now and then. Cancellation is cooperative:
//! a job that never looks at the token runs to completion.

use std::{
    fmt,
    sync::{
        atomic::{
            AtomicBool,
            Ordering::{Acquire, Release},
        },
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Position of the task in its batch, sorting envelopes by it restores the submission order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(usize);

impl TaskId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The work itself.
///
/// Implement it on your own types when a closure isn't enough, e.g. for a bunch of
/// different payment gateways that all know how to `pay`.
pub trait Job<T, E>: Send + 'static {
    fn run(self: Box<Self>, cancel: &CancelToken) -> Result<T, E>;
}

impl<F, T, E> Job<T, E> for F
where
    F: FnOnce(&CancelToken) -> Result<T, E> + Send + 'static,
{
    fn run(self: Box<Self>, cancel: &CancelToken) -> Result<T, E> {
        (*self)(cancel)
    }
}

pub struct Task<T, E> {
    name: Option<String>,
    job: Box<dyn Job<T, E>>,
}

impl<T, E> Task<T, E> {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(&CancelToken) -> Result<T, E> + Send + 'static,
    {
        Self::from_job(f)
    }

    pub fn from_job(job: impl Job<T, E>) -> Self {
        Self {
            name: None,
            job: Box::new(job),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn into_parts(self) -> (Option<String>, Box<dyn Job<T, E>>) {
        (self.name, self.job)
    }
}

impl<T, E> fmt::Debug for Task<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A flag shared by a session and all of its jobs
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("cancelled")]
pub struct Cancelled;

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Acquire)
    }

    /// For `?` in jobs: `cancel.check()?;`
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Why a task didn't produce a value
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskFailure<E> {
    #[error("task failed: {0}")]
    Error(E),
    /// the job panicked, the payload's message is kept if it was a string
    #[error("task panicked: {0}")]
    Panicked(String),
}

/// One task's outcome
#[derive(Debug)]
pub struct ResultEnvelope<T, E> {
    pub id: TaskId,
    pub name: Option<String>,
    pub outcome: Result<T, TaskFailure<E>>,
    pub completed_at: DateTime<Utc>,
    /// how long the job ran
    pub elapsed: Duration,
}

impl<T, E> ResultEnvelope<T, E> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn is_failure(&self) -> bool {
        self.outcome.is_err()
    }

    pub fn into_outcome(self) -> Result<T, TaskFailure<E>> {
        self.outcome
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Paypal {
        amount: f32,
    }

    impl Job<String, String> for Paypal {
        fn run(self: Box<Self>, cancel: &CancelToken) -> Result<String, String> {
            cancel.check().map_err(|e| e.to_string())?;
            Ok(format!("method:paypal {}", self.amount))
        }
    }

    #[test]
    fn test_closures_and_types_are_jobs() {
        let token = CancelToken::new();
        let (_, closure) = Task::<u8, String>::new(|_| Ok(1)).into_parts();
        assert_eq!(Ok(1), closure.run(&token));

        let task = Task::from_job(Paypal { amount: 45.66 }).named("paypal");
        assert_eq!(Some("paypal"), task.name());
        let (_, job) = task.into_parts();
        assert_eq!(Ok("method:paypal 45.66".to_string()), job.run(&token));
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert_eq!(Ok(()), clone.check());
        token.cancel();
        assert!(clone.is_cancelled());
        assert_eq!(Err(Cancelled), clone.check());

        let (_, job) = Task::from_job(Paypal { amount: 1.0 }).into_parts();
        assert_eq!(Err("cancelled".to_string()), job.run(&clone));
    }

    #[test]
    fn test_failure_messages() {
        let failure: TaskFailure<&str> = TaskFailure::Error("disk full");
        assert_eq!("task failed: disk full", failure.to_string());
        assert_eq!(
            "task panicked: boom",
            TaskFailure::<&str>::Panicked("boom".into()).to_string()
        );
        assert_eq!("#3", TaskId::new(3).to_string());
    }
}
