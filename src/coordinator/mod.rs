//! # Coordinator
//!
//! Fan-out / fan-in for a batch of independent [Task]s:
//! - fan-out: every task gets its own named OS thread, nothing waits for anything at this point
//! - fan-in: the threads drop their [crate::task::ResultEnvelope]s into the session's inbox channel,
//!   the caller takes them out in arrival order one by one, all at once, or races several sessions
//!
//! A failed task doesn't affect its siblings, its envelope just carries the failure.
//! A panicking task is a failed task too.
//!
//! ```
//! use fanout_coordinator::coordinator::{Coordinator, SessionState};
//! use fanout_coordinator::task::Task;
//!
//! let tasks: Vec<Task<i32, String>> = (1..=3).map(|i| Task::new(move |_| Ok(i * 10))).collect();
//! let mut session = Coordinator::default().submit(tasks).unwrap();
//! let mut results: Vec<i32> = session
//!     .await_all()
//!     .unwrap()
//!     .into_iter()
//!     .map(|envelope| envelope.outcome.unwrap())
//!     .collect();
//! results.sort();
//! assert_eq!(vec![10, 20, 30], results);
//! assert_eq!(SessionState::AllCompleted, session.state());
//! ```

mod session;

use tracing::debug;

pub use session::{await_any, Session, SessionState};

use crate::error::CoordinatorError;
use crate::task::Task;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// worker threads are named `{prefix}-{task index}`, it shows up in panic messages
    pub thread_name_prefix: String,
    /// `None` keeps the platform's default
    pub stack_size: Option<usize>,
    /// how many envelopes may wait in the inbox, `None` sizes it to the batch so no worker ever blocks on it.
    /// 0 makes every worker hand its envelope over in person.
    pub inbox_capacity: Option<usize>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: "fanout".to_string(),
            stack_size: None,
            inbox_capacity: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = Some(capacity);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct Coordinator {
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Builds a session without starting anything, see [Session::start]
    pub fn prepare<T, E>(
        &self,
        tasks: impl IntoIterator<Item = Task<T, E>>,
    ) -> Result<Session<T, E>, CoordinatorError>
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        let tasks: Vec<_> = tasks.into_iter().collect();
        if tasks.is_empty() {
            return Err(CoordinatorError::EmptyBatch);
        }
        debug!(tasks = tasks.len(), "session prepared");
        Ok(Session::new(self.config.clone(), tasks))
    }

    /// Starts every task and returns right away
    pub fn submit<T, E>(
        &self,
        tasks: impl IntoIterator<Item = Task<T, E>>,
    ) -> Result<Session<T, E>, CoordinatorError>
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        let mut session = self.prepare(tasks)?;
        session.start()?;
        Ok(session)
    }
}
