//! # Errors
//!
//! Two families live here:
//! - channel errors, shaped after `std::sync::mpsc` ones: the value that couldn't be delivered is handed back
//! - session-level errors of the [crate::coordinator]
//!
//! Task errors are not here. They're captured into [crate::task::TaskFailure] and travel inside envelopes.
//!
//! Channel errors carry a `T` which isn't required to be `Debug`, so `Debug` is written by hand for them.

use std::{fmt, io};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::channel::{Capability, Direction};
use crate::coordinator::SessionState;

/// The channel is closed, here's your value back
#[derive(Error, PartialEq, Eq)]
#[error("sending on a closed channel")]
pub struct SendError<T>(pub T);

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendError").finish_non_exhaustive()
    }
}

#[derive(Error, PartialEq, Eq)]
pub enum TrySendError<T> {
    /// the buffer is full or, for a rendezvous channel, there's no receiver waiting
    #[error("sending on a full channel")]
    Full(T),
    #[error("sending on a closed channel")]
    Closed(T),
}

impl<T> TrySendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(value) | Self::Closed(value) => value,
        }
    }
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("Full(..)"),
            Self::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    #[error("receiving on an empty channel")]
    Empty,
    /// closed (or all senders are gone) and drained
    #[error("receiving on a closed channel")]
    Closed,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeoutError {
    #[error("timed out waiting on a channel")]
    Timeout,
    #[error("receiving on a closed channel")]
    Closed,
}

/// A handle was used in the direction it wasn't granted.
///
/// Only [crate::channel::Endpoint] can produce it: the typed handles don't even have the forbidden method.
#[derive(Error)]
#[error("can't {attempted} through a {capability} endpoint")]
pub struct CapabilityViolation<T> {
    pub attempted: Direction,
    /// what the endpoint was granted
    pub capability: Capability,
    /// the value of a rejected send, untouched
    pub value: Option<T>,
}

impl<T> fmt::Debug for CapabilityViolation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityViolation")
            .field("attempted", &self.attempted)
            .field("capability", &self.capability)
            .finish_non_exhaustive()
    }
}

/// Everything that can go wrong with a send through an [crate::channel::Endpoint]
#[derive(Error)]
pub enum EndpointError<T> {
    #[error(transparent)]
    Capability(CapabilityViolation<T>),
    #[error(transparent)]
    Send(SendError<T>),
}

impl<T> fmt::Debug for EndpointError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capability(e) => f.debug_tuple("Capability").field(e).finish(),
            Self::Send(e) => f.debug_tuple("Send").field(e).finish(),
        }
    }
}

impl<T> EndpointError<T> {
    /// the value that didn't make it into the channel
    pub fn into_inner(self) -> Option<T> {
        match self {
            Self::Capability(e) => e.value,
            Self::Send(SendError(value)) => Some(value),
        }
    }
}

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("nothing to run: the batch is empty")]
    EmptyBatch,

    #[error("session is {actual}, expected it to be {expected}")]
    InvalidState {
        expected: SessionState,
        actual: SessionState,
    },

    /// The session got cancelled before every task reported
    #[error("session cancelled at {cancelled_at} with {received} of {expected} results received")]
    IncompleteSession {
        expected: usize,
        received: usize,
        cancelled_at: DateTime<Utc>,
    },

    #[error("failed to spawn a worker thread")]
    Spawn(#[source] io::Error),
}
