//! Runtime-checked channel ends, for when the direction comes from data rather than from types.
//! The check happens before anything touches the channel.

use strum_macros::{Display, EnumIter};

use super::{Chan, Receiver, Sender};
use crate::error::{CapabilityViolation, EndpointError, RecvTimeoutError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum Direction {
    Send,
    Recv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum Capability {
    Both,
    SendOnly,
    RecvOnly,
}

impl Capability {
    pub fn allows(self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (Capability::Both, _)
                | (Capability::SendOnly, Direction::Send)
                | (Capability::RecvOnly, Direction::Recv)
        )
    }
}

pub enum Endpoint<T> {
    Both(Chan<T>),
    SendOnly(Sender<T>),
    RecvOnly(Receiver<T>),
}

impl<T> Endpoint<T> {
    pub fn capability(&self) -> Capability {
        match self {
            Endpoint::Both(_) => Capability::Both,
            Endpoint::SendOnly(_) => Capability::SendOnly,
            Endpoint::RecvOnly(_) => Capability::RecvOnly,
        }
    }

    /// Narrows further, a no-op if the endpoint is already that narrow.
    /// Widening isn't possible: asking a receive-only endpoint for send-only fails.
    pub fn narrow(self, to: Capability) -> Result<Self, CapabilityViolation<T>> {
        let held = self.capability();
        match (self, to) {
            (endpoint, Capability::Both) if held == Capability::Both => Ok(endpoint),
            (Endpoint::Both(chan), Capability::SendOnly) => Ok(Endpoint::SendOnly(chan.sender())),
            (Endpoint::Both(chan), Capability::RecvOnly) => Ok(Endpoint::RecvOnly(chan.receiver())),
            (endpoint @ Endpoint::SendOnly(_), Capability::SendOnly) => Ok(endpoint),
            (endpoint @ Endpoint::RecvOnly(_), Capability::RecvOnly) => Ok(endpoint),
            (_, to) => Err(CapabilityViolation {
                // the direction the wider capability would've added
                attempted: if to.allows(Direction::Send) && !held.allows(Direction::Send) {
                    Direction::Send
                } else {
                    Direction::Recv
                },
                capability: held,
                value: None,
            }),
        }
    }

    pub fn send(&self, value: T) -> Result<(), EndpointError<T>> {
        let sender = match self {
            Endpoint::Both(chan) => chan.as_sender(),
            Endpoint::SendOnly(tx) => tx,
            Endpoint::RecvOnly(_) => {
                return Err(EndpointError::Capability(CapabilityViolation {
                    attempted: Direction::Send,
                    capability: Capability::RecvOnly,
                    value: Some(value),
                }))
            }
        };
        sender.send(value).map_err(EndpointError::Send)
    }

    /// `Ok(None)` is the end of the stream
    pub fn recv(&self) -> Result<Option<T>, CapabilityViolation<T>> {
        self.receiver().map(Receiver::recv)
    }

    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<Result<T, RecvTimeoutError>, CapabilityViolation<T>> {
        self.receiver().map(|rx| rx.recv_timeout(timeout))
    }

    fn receiver(&self) -> Result<&Receiver<T>, CapabilityViolation<T>> {
        match self {
            Endpoint::Both(chan) => Ok(chan.as_receiver()),
            Endpoint::RecvOnly(rx) => Ok(rx),
            Endpoint::SendOnly(_) => Err(CapabilityViolation {
                attempted: Direction::Recv,
                capability: Capability::SendOnly,
                value: None,
            }),
        }
    }
}

impl<T> std::fmt::Debug for Endpoint<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Endpoint").field(&self.capability()).finish()
    }
}

impl<T> From<Chan<T>> for Endpoint<T> {
    fn from(chan: Chan<T>) -> Self {
        Endpoint::Both(chan)
    }
}

impl<T> From<Sender<T>> for Endpoint<T> {
    fn from(tx: Sender<T>) -> Self {
        Endpoint::SendOnly(tx)
    }
}

impl<T> From<Receiver<T>> for Endpoint<T> {
    fn from(rx: Receiver<T>) -> Self {
        Endpoint::RecvOnly(rx)
    }
}
