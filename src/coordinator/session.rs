//! # Session
//!
//! One batch of tasks and everything that's known about it.
//!
//! ```text
//!            start             last envelope, no failures
//! Created ----------> Running ---------------------------> AllCompleted
//!    |                 |   |     last envelope, some failed
//!    |                 |   +-------------------------------> PartiallyFailed
//!    |      cancel     |         cancel / timeout
//!    +-----------------+-------------------------------> Cancelled
//! ```
//!
//! Bookkeeping is per task id, so a task can't be counted twice
//! and [Session::missing] can always tell who hasn't reported.
//!
//! Cancellation point: closing the inbox. Envelopes that made it in before that are kept,
//! the ones that come later are thrown away by the workers themselves.

use std::{
    any::Any,
    collections::VecDeque,
    fmt, mem,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use strum_macros::{Display, EnumIter};
use tracing::{debug, info, warn};

use super::CoordinatorConfig;
use crate::channel::select::next_start;
use crate::channel::{bounded, Receiver, RecvTimeoutError, Select, Sender, TryRecvError};
use crate::error::CoordinatorError;
use crate::sync::{Done, WaitGroup};
use crate::task::{CancelToken, ResultEnvelope, Task, TaskFailure, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    Created,
    Running,
    AllCompleted,
    PartiallyFailed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionState::Created | SessionState::Running)
    }
}

pub struct Session<T, E> {
    config: CoordinatorConfig,
    /// the batch, until it's started
    pending: Vec<Task<T, E>>,
    /// the workers' end of the inbox, handed out on start
    outbox: Option<Sender<ResultEnvelope<T, E>>>,
    inbox: Receiver<ResultEnvelope<T, E>>,
    /// received but not handed to the caller yet
    buffered: VecDeque<ResultEnvelope<T, E>>,
    /// indexed by TaskId
    reported: Vec<bool>,
    received: usize,
    failed: usize,
    state: SessionState,
    cancel: CancelToken,
    running: Arc<WaitGroup>,
    workers: Vec<JoinHandle<()>>,
    cancelled_at: Option<DateTime<Utc>>,
}

impl<T, E> Session<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Spawns a thread per task, doesn't wait for any of them
    pub fn start(&mut self) -> Result<(), CoordinatorError> {
        let invalid = CoordinatorError::InvalidState {
            expected: SessionState::Created,
            actual: self.state,
        };
        if self.state != SessionState::Created {
            return Err(invalid);
        }
        let Some(outbox) = self.outbox.take() else {
            return Err(invalid);
        };
        self.state = SessionState::Running;
        info!(tasks = self.expected(), "session started");

        for (index, task) in mem::take(&mut self.pending).into_iter().enumerate() {
            let id = TaskId::new(index);
            let mut builder = thread::Builder::new()
                .name(format!("{}-{}", self.config.thread_name_prefix, index));
            if let Some(bytes) = self.config.stack_size {
                builder = builder.stack_size(bytes);
            }
            let worker = Worker {
                id,
                outbox: outbox.clone(),
                cancel: self.cancel.clone(),
                _done: self.running.guard(),
            };
            match builder.spawn(move || worker.run(task)) {
                Ok(handle) => self.workers.push(handle),
                Err(err) => {
                    warn!(task = %id, error = %err, "failed to spawn a worker, cancelling the session");
                    self.cancel_now();
                    return Err(CoordinatorError::Spawn(err));
                }
            }
        }
        Ok(())
    }
}

impl<T, E> Session<T, E> {
    pub(super) fn new(config: CoordinatorConfig, tasks: Vec<Task<T, E>>) -> Self {
        let capacity = config.inbox_capacity.unwrap_or(tasks.len());
        let (outbox, inbox) = bounded(capacity).split();
        Self {
            config,
            reported: vec![false; tasks.len()],
            pending: tasks,
            outbox: Some(outbox),
            inbox,
            buffered: VecDeque::new(),
            received: 0,
            failed: 0,
            state: SessionState::Created,
            cancel: CancelToken::new(),
            running: Arc::new(WaitGroup::new()),
            workers: Vec::new(),
            cancelled_at: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// # of tasks in the batch
    pub fn expected(&self) -> usize {
        self.reported.len()
    }

    /// # of envelopes that arrived so far, handed out or not
    pub fn received(&self) -> usize {
        self.received
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    /// # of worker threads still alive
    pub fn outstanding(&self) -> usize {
        self.running.count() as usize
    }

    /// Tasks that haven't reported (yet, or ever if the session is over)
    pub fn missing(&self) -> Vec<TaskId> {
        self.reported
            .iter()
            .enumerate()
            .filter(|(_, reported)| !**reported)
            .map(|(index, _)| TaskId::new(index))
            .collect()
    }

    /// Blocks until the next envelope arrives, in whatever order tasks finish.
    /// `None` once the session is over and everything was handed out.
    pub fn await_next(&mut self) -> Option<ResultEnvelope<T, E>> {
        if let Some(envelope) = self.buffered.pop_front() {
            return Some(envelope);
        }
        if self.state != SessionState::Running {
            return None;
        }
        match self.inbox.recv() {
            Some(envelope) => {
                self.record(&envelope);
                Some(envelope)
            }
            None => {
                self.settle_disconnected();
                None
            }
        }
    }

    /// Blocks until every task reported and returns the envelopes not handed out yet, in arrival order.
    /// Failures don't stop the waiting, they end up in their envelopes.
    ///
    /// Fails on a session that got cancelled: not everything arrived.
    pub fn await_all(&mut self) -> Result<Vec<ResultEnvelope<T, E>>, CoordinatorError> {
        self.check_awaitable()?;
        while self.state == SessionState::Running {
            match self.inbox.recv() {
                Some(envelope) => self.keep(envelope),
                None => self.settle_disconnected(),
            }
        }
        Ok(self.take_received())
    }

    /// As [Session::await_all], but gives up at the deadline: the session gets cancelled
    /// and whatever arrived in time stays available through [Session::take_received].
    /// A timeout too big to be a point in time (`Duration::MAX`) is no timeout at all.
    pub fn await_all_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Vec<ResultEnvelope<T, E>>, CoordinatorError> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.await_all();
        };
        self.check_awaitable()?;
        while self.state == SessionState::Running {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.inbox.recv_timeout(left) {
                Ok(envelope) => self.keep(envelope),
                Err(RecvTimeoutError::Closed) => self.settle_disconnected(),
                Err(RecvTimeoutError::Timeout) => {
                    warn!(?timeout, "session timed out");
                    self.cancel_now();
                    // the drain on cancel may've brought the last envelopes in
                    if self.state == SessionState::Cancelled {
                        return Err(self.incomplete());
                    }
                }
            }
        }
        Ok(self.take_received())
    }

    /// Stops the session: the envelopes that arrived up to now are returned
    /// (minus the ones already handed out), later ones are discarded.
    /// Tasks see the cancellation on their next [CancelToken] check, tasks that haven't started yet won't.
    ///
    /// Does nothing to a finished session, apart from handing out what's left.
    pub fn cancel(&mut self) -> Vec<ResultEnvelope<T, E>> {
        match self.state {
            SessionState::Created => {
                self.pending.clear();
                self.outbox = None;
                self.cancel.cancel();
                self.mark_cancelled();
            }
            SessionState::Running => self.cancel_now(),
            _ => {}
        }
        self.take_received()
    }

    /// Envelopes received but not handed out yet
    pub fn take_received(&mut self) -> Vec<ResultEnvelope<T, E>> {
        self.buffered.drain(..).collect()
    }

    /// Waits for every worker thread to exit. Blocks forever on a job that never returns
    /// and never looks at its token, cancel first if that's a possibility.
    /// Same for a rendezvous inbox (capacity 0) nobody receives from.
    pub fn join(mut self) {
        self.running.wait();
        for handle in mem::take(&mut self.workers) {
            // jobs' panics are caught inside, a worker thread has nothing to panic about
            let _ = handle.join();
        }
    }

    fn check_awaitable(&self) -> Result<(), CoordinatorError> {
        match self.state {
            SessionState::Created => Err(CoordinatorError::InvalidState {
                expected: SessionState::Running,
                actual: SessionState::Created,
            }),
            SessionState::Cancelled => Err(self.incomplete()),
            _ => Ok(()),
        }
    }

    fn keep(&mut self, envelope: ResultEnvelope<T, E>) {
        self.record(&envelope);
        self.buffered.push_back(envelope);
    }

    fn record(&mut self, envelope: &ResultEnvelope<T, E>) {
        let reported = &mut self.reported[envelope.id.index()];
        debug_assert!(!*reported, "task {} reported twice", envelope.id);
        *reported = true;
        self.received += 1;
        if envelope.is_failure() {
            self.failed += 1;
        }
        debug!(task = %envelope.id, ok = envelope.is_success(), "result received");
        if self.received == self.expected() && self.state == SessionState::Running {
            self.finish();
        }
    }

    fn finish(&mut self) {
        self.state = if self.failed == 0 && self.received == self.expected() {
            SessionState::AllCompleted
        } else {
            SessionState::PartiallyFailed
        };
        info!(
            state = %self.state,
            received = self.received,
            failed = self.failed,
            "session finished"
        );
    }

    /// The inbox is closed and drained while running => every worker is gone, some without a word
    fn settle_disconnected(&mut self) {
        if self.state == SessionState::Running {
            warn!(missing = ?self.missing(), "workers exited without reporting");
            self.finish();
        }
    }

    fn cancel_now(&mut self) {
        if self.state != SessionState::Running {
            return;
        }
        // the cancellation point: nothing gets in after this
        self.inbox.close();
        while let Ok(envelope) = self.inbox.try_recv() {
            self.keep(envelope);
        }
        self.cancel.cancel();
        if self.state == SessionState::Running {
            self.mark_cancelled();
        }
    }

    fn mark_cancelled(&mut self) {
        self.state = SessionState::Cancelled;
        self.cancelled_at = Some(Utc::now());
        info!(
            received = self.received,
            expected = self.expected(),
            "session cancelled"
        );
    }

    fn incomplete(&self) -> CoordinatorError {
        CoordinatorError::IncompleteSession {
            expected: self.expected(),
            received: self.received,
            cancelled_at: self.cancelled_at.unwrap_or_else(Utc::now),
        }
    }
}

/// Dropping a running session cancels it, so no worker stays blocked on a full inbox
impl<T, E> Drop for Session<T, E> {
    fn drop(&mut self) {
        if self.state == SessionState::Running {
            debug!("running session dropped");
            self.cancel_now();
        }
    }
}

impl<T, E> fmt::Debug for Session<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("expected", &self.expected())
            .field("received", &self.received)
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}

/// Races the sessions: returns the first envelope any of them has, along with the session's index.
/// The others' envelopes stay where they are for later.
/// `None` when there's nothing left to wait for in any of them.
///
/// Both the already received envelopes and the inboxes are scanned from a rotating start,
/// so a session with a long backlog doesn't keep the others waiting.
pub fn await_any<T, E>(
    sessions: &mut [&mut Session<T, E>],
) -> Option<(usize, ResultEnvelope<T, E>)> {
    loop {
        let start = next_start();
        let n = sessions.len();
        for k in 0..n {
            let index = (start + k) % n;
            if let Some(envelope) = sessions[index].buffered.pop_front() {
                return Some((index, envelope));
            }
        }
        let live: Vec<usize> = sessions
            .iter()
            .enumerate()
            .filter(|(_, session)| session.state == SessionState::Running)
            .map(|(index, _)| index)
            .collect();
        if live.is_empty() {
            return None;
        }

        let ready = {
            let mut select = Select::new();
            for &index in &live {
                select = select.recv(&sessions[index].inbox);
            }
            select.ready()
        };

        match ready {
            Some(case) => {
                let index = live[case];
                let session = &mut *sessions[index];
                match session.inbox.try_recv() {
                    Ok(envelope) => {
                        session.record(&envelope);
                        return Some((index, envelope));
                    }
                    Err(TryRecvError::Closed) => session.settle_disconnected(),
                    Err(TryRecvError::Empty) => {}
                }
            }
            None => {
                for index in live {
                    sessions[index].settle_disconnected();
                }
            }
        }
    }
}

struct Worker<T, E> {
    id: TaskId,
    outbox: Sender<ResultEnvelope<T, E>>,
    cancel: CancelToken,
    _done: Done,
}

impl<T, E> Worker<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn run(self, task: Task<T, E>) {
        let (name, job) = task.into_parts();
        if self.cancel.is_cancelled() {
            debug!(task = %self.id, "cancelled before it started");
            return;
        }
        debug!(task = %self.id, "task started");
        let started = Instant::now();
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| job.run(&self.cancel))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(TaskFailure::Error(error)),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(task = %self.id, %message, "task panicked");
                Err(TaskFailure::Panicked(message))
            }
        };
        let envelope = ResultEnvelope {
            id: self.id,
            name,
            outcome,
            completed_at: Utc::now(),
            elapsed: started.elapsed(),
        };
        if self.outbox.send(envelope).is_err() {
            debug!(task = %self.id, "session closed, result discarded");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
