//! # Channels
//!
//! A bounded multi-producer multi-consumer queue, the same `VecDeque + Condvar` idea
//! as the poor man's channel, but with the flaws fixed:
//! - the queue has a size limit, senders wait for a free slot
//! - capacity 0 means a rendezvous: a send returns only once a receiver took the value
//! - the channel can be closed, receivers drain what's left and then see the end of the stream
//! - both ends are counted, so a side that's gone for good never leaves the other one hanging
//!
//! [bounded] gives a [Chan] which can send and receive. It can be narrowed to a [Sender] or a [Receiver]
//! before it's passed somewhere. The narrowed handles don't have the other direction's methods at all,
//! so misuse doesn't compile:
//!
//! ```compile_fail
//! use fanout_coordinator::channel::bounded;
//!
//! let rx = bounded::<&str>(1).receiver();
//! rx.send("eeee"); // a receive-only handle has no send
//! ```
//!
//! ```compile_fail
//! use fanout_coordinator::channel::bounded;
//!
//! let tx = bounded::<&str>(1).sender();
//! tx.recv(); // a send-only handle has no recv
//! ```
//!
//! When the direction is only known at runtime, there's [Endpoint] which checks it on every call.

mod endpoint;
pub mod select;

use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

pub use endpoint::{Capability, Direction, Endpoint};
pub use select::Select;

pub use crate::error::{RecvTimeoutError, SendError, TryRecvError, TrySendError};
use select::Signal;

/// Creates a channel that buffers up to `capacity` values, 0 makes it a rendezvous channel
pub fn bounded<T>(capacity: usize) -> Chan<T> {
    let inner = Arc::new(Inner {
        state: Mutex::new(State {
            queue: VecDeque::with_capacity(capacity.max(1)),
            closed: false,
            senders: 0,
            receivers: 0,
            waiting_receivers: 0,
            sent: 0,
            taken: 0,
            observers: Vec::new(),
        }),
        capacity,
        item_ready: Condvar::new(),
        space_ready: Condvar::new(),
    });
    Chan {
        tx: Sender::attach(inner.clone()),
        rx: Receiver::attach(inner),
    }
}

/// A channel without a buffer: every send waits for a receiver
pub fn rendezvous<T>() -> Chan<T> {
    bounded(0)
}

struct State<T> {
    queue: VecDeque<T>,
    closed: bool,
    senders: usize,
    receivers: usize,
    /// receivers blocked in recv, lets try_send hand over to a rendezvous
    waiting_receivers: usize,
    /// # of values ever pushed and ever popped, a rendezvous sender waits for `taken` to catch up with its ticket
    sent: u64,
    taken: u64,
    observers: Vec<Arc<Signal>>,
}

impl<T> State<T> {
    /// nothing can be sent anymore
    fn is_closed(&self) -> bool {
        self.closed || self.receivers == 0
    }

    /// nothing will ever arrive anymore
    fn is_drained(&self) -> bool {
        self.queue.is_empty() && (self.closed || self.senders == 0)
    }

    fn notify_observers(&self) {
        for signal in &self.observers {
            signal.notify();
        }
    }
}

pub(crate) struct Inner<T> {
    state: Mutex<State<T>>,
    capacity: usize,
    item_ready: Condvar,
    space_ready: Condvar,
}

impl<T> Inner<T> {
    // nothing in here panics while holding the lock, a poisoned state is still a consistent one
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slots(&self) -> usize {
        self.capacity.max(1)
    }

    fn send(&self, value: T) -> Result<(), SendError<T>> {
        let mut s = self.lock();
        while !s.is_closed() && s.queue.len() >= self.slots() {
            s = self.space_ready.wait(s).unwrap_or_else(PoisonError::into_inner);
        }
        if s.is_closed() {
            return Err(SendError(value));
        }
        s.queue.push_back(value);
        s.sent += 1;
        let ticket = s.sent;
        s.notify_observers();
        self.item_ready.notify_one();

        if self.capacity > 0 {
            return Ok(());
        }
        // rendezvous: hang around until somebody takes the value
        while s.taken < ticket {
            if s.is_closed() {
                // the slot holds a single value and it's not taken => it's ours
                if let Some(value) = s.queue.pop_back() {
                    s.sent -= 1;
                    self.space_ready.notify_all();
                    return Err(SendError(value));
                }
                break;
            }
            s = self.space_ready.wait(s).unwrap_or_else(PoisonError::into_inner);
        }
        Ok(())
    }

    fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let mut s = self.lock();
        if s.is_closed() {
            return Err(TrySendError::Closed(value));
        }
        let has_room = if self.capacity == 0 {
            s.queue.is_empty() && s.waiting_receivers > 0
        } else {
            s.queue.len() < self.capacity
        };
        if !has_room {
            return Err(TrySendError::Full(value));
        }
        s.queue.push_back(value);
        s.sent += 1;
        s.notify_observers();
        self.item_ready.notify_one();
        Ok(())
    }

    fn take(&self, s: &mut State<T>) -> Option<T> {
        let value = s.queue.pop_front()?;
        s.taken += 1;
        // wake both the ones waiting for a slot and the rendezvous senders waiting for their ticket
        self.space_ready.notify_all();
        Some(value)
    }

    fn recv(&self) -> Option<T> {
        self.recv_until(None).ok()
    }

    fn recv_until(&self, deadline: Option<Instant>) -> Result<T, RecvTimeoutError> {
        let mut s = self.lock();
        loop {
            if let Some(value) = self.take(&mut s) {
                return Ok(value);
            }
            if s.is_drained() {
                return Err(RecvTimeoutError::Closed);
            }
            s.waiting_receivers += 1;
            s = match deadline {
                None => self.item_ready.wait(s).unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        s.waiting_receivers -= 1;
                        return Err(RecvTimeoutError::Timeout);
                    }
                    self.item_ready
                        .wait_timeout(s, left)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
            s.waiting_receivers -= 1;
        }
    }

    fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut s = self.lock();
        match self.take(&mut s) {
            Some(value) => Ok(value),
            None if s.is_drained() => Err(TryRecvError::Closed),
            None => Err(TryRecvError::Empty),
        }
    }

    fn close(&self) {
        let mut s = self.lock();
        if s.closed {
            return;
        }
        s.closed = true;
        s.notify_observers();
        self.item_ready.notify_all();
        self.space_ready.notify_all();
    }

    pub(crate) fn has_item(&self) -> bool {
        !self.lock().queue.is_empty()
    }

    pub(crate) fn is_drained(&self) -> bool {
        self.lock().is_drained()
    }

    pub(crate) fn watch(&self, signal: &Arc<Signal>) {
        self.lock().observers.push(signal.clone());
    }

    pub(crate) fn unwatch(&self, signal: &Arc<Signal>) {
        self.lock().observers.retain(|s| !Arc::ptr_eq(s, signal));
    }
}

/// The sending half. Can't receive.
pub struct Sender<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Sender<T> {
    fn attach(inner: Arc<Inner<T>>) -> Self {
        inner.lock().senders += 1;
        Self { inner }
    }

    /// Blocks while the buffer is full (or, for a rendezvous, until the value is taken).
    /// Fails with the value back if the channel is closed or every receiver is gone.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        self.inner.send(value)
    }

    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        self.inner.try_send(value)
    }

    /// No more values, receivers drain the buffer and then see the end of the stream
    pub fn close(&self) {
        self.inner.close()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().is_closed()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self::attach(self.inner.clone())
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        let mut s = self.inner.lock();
        s.senders -= 1;
        if s.senders == 0 {
            // the last one out tells the receivers there's nothing more to wait for
            s.notify_observers();
            self.inner.item_ready.notify_all();
        }
    }
}

/// The receiving half. Can't send.
pub struct Receiver<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Receiver<T> {
    fn attach(inner: Arc<Inner<T>>) -> Self {
        inner.lock().receivers += 1;
        Self { inner }
    }

    /// Blocks until a value arrives, `None` means closed and drained
    pub fn recv(&self) -> Option<T> {
        self.inner.recv()
    }

    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.inner.try_recv()
    }

    /// A timeout too big to be a point in time (`Duration::MAX`) waits as long as [Receiver::recv]
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.inner.recv_until(Instant::now().checked_add(timeout))
    }

    /// Receives until the channel is closed and drained
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { rx: self }
    }

    /// Stops the senders. Whatever is already buffered can still be received.
    pub fn close(&self) {
        self.inner.close()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().is_closed()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub(crate) fn inner(&self) -> &Inner<T> {
        &self.inner
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        Self::attach(self.inner.clone())
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        let mut s = self.inner.lock();
        s.receivers -= 1;
        if s.receivers == 0 {
            // nobody will ever take the values => release the blocked senders
            self.inner.space_ready.notify_all();
        }
    }
}

pub struct Iter<'a, T> {
    rx: &'a Receiver<T>,
}

impl<T> Iterator for Iter<'_, T> {
    type Item = T;
    fn next(&mut self) -> Option<T> {
        self.rx.recv()
    }
}

impl<'a, T> IntoIterator for &'a Receiver<T> {
    type Item = T;
    type IntoIter = Iter<'a, T>;
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A bidirectional handle, both ends in one.
///
/// It counts as a sender and as a receiver at the same time,
/// so narrow it with [Chan::sender] / [Chan::receiver] or [Chan::split] before handing the ends out.
pub struct Chan<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Chan<T> {
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        self.tx.send(value)
    }

    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        self.tx.try_send(value)
    }

    pub fn recv(&self) -> Option<T> {
        self.rx.recv()
    }

    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.rx.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn close(&self) {
        self.tx.close()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }

    /// Narrows to send-only, the bidirectional handle goes away
    pub fn sender(self) -> Sender<T> {
        self.tx
    }

    /// Narrows to receive-only, the bidirectional handle goes away
    pub fn receiver(self) -> Receiver<T> {
        self.rx
    }

    pub fn split(self) -> (Sender<T>, Receiver<T>) {
        (self.tx, self.rx)
    }

    /// A receive-only view, e.g. to put into a [Select]
    pub fn as_receiver(&self) -> &Receiver<T> {
        &self.rx
    }

    pub fn as_sender(&self) -> &Sender<T> {
        &self.tx
    }
}

impl<T> Clone for Chan<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T> From<Chan<T>> for Sender<T> {
    fn from(chan: Chan<T>) -> Self {
        chan.sender()
    }
}

impl<T> From<Chan<T>> for Receiver<T> {
    fn from(chan: Chan<T>) -> Self {
        chan.receiver()
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::atomic::{AtomicBool, Ordering::SeqCst},
        thread::{scope, sleep},
    };

    use super::*;

    #[test]
    fn test_rendezvous_send_waits_for_receiver() {
        let ch = rendezvous();
        let delivered = AtomicBool::new(false);
        scope(|s| {
            s.spawn(|| {
                ch.send(4 + 5).unwrap();
                delivered.store(true, SeqCst);
            });
            // give the sender plenty of time to (not) return
            sleep(Duration::from_millis(100));
            assert!(!delivered.load(SeqCst));
            assert_eq!(Some(9), ch.recv());
        });
        assert!(delivered.load(SeqCst));
    }

    #[test]
    fn test_buffered_doesnt_block_until_full() {
        let ch = bounded(2);
        ch.send(1).unwrap();
        ch.send(2).unwrap();
        assert_eq!(Err(TrySendError::Full(3)), ch.try_send(3));
        assert_eq!(Some(1), ch.recv());
        ch.try_send(3).unwrap();
        assert_eq!(2, ch.len());
    }

    #[test]
    fn test_close_then_drain() {
        let (tx, rx) = bounded(10).split();
        scope(|s| {
            s.spawn(|| {
                for i in 0..10 {
                    tx.send(format!("{}@mail.com", i + 1)).unwrap();
                }
                tx.close();
                assert!(tx.send("late@mail.com".to_string()).is_err());
            });
            let emails: Vec<String> = rx.iter().collect();
            assert_eq!(10, emails.len());
            assert_eq!("1@mail.com", emails[0]);
        });
        assert_eq!(None, rx.recv());
        assert_eq!(Err(TryRecvError::Closed), rx.try_recv());
    }

    #[test]
    fn test_last_sender_gone_ends_the_stream() {
        let (tx, rx) = bounded(1).split();
        let tx2 = tx.clone();
        scope(|s| {
            s.spawn(move || tx.send(1).unwrap());
            s.spawn(move || tx2.send(2).unwrap());
            let mut got: Vec<i32> = rx.iter().collect();
            got.sort();
            assert_eq!(vec![1, 2], got);
        });
    }

    #[test]
    fn test_last_receiver_gone_fails_senders() {
        let (tx, rx) = bounded(1).split();
        tx.send(1).unwrap();
        scope(|s| {
            let blocked = s.spawn(|| tx.send(2));
            sleep(Duration::from_millis(50));
            drop(rx);
            assert_eq!(Err(SendError(2)), blocked.join().unwrap());
        });
    }

    #[test]
    fn test_rendezvous_close_returns_the_value() {
        let ch = rendezvous();
        scope(|s| {
            let sender = s.spawn(|| ch.send("never taken"));
            sleep(Duration::from_millis(50));
            ch.close();
            assert_eq!(Err(SendError("never taken")), sender.join().unwrap());
        });
        assert!(ch.is_empty());
    }

    #[test]
    fn test_try_send_to_waiting_receiver() {
        let ch = rendezvous();
        assert_eq!(Err(TrySendError::Full(1)), ch.try_send(1));
        scope(|s| {
            let receiver = s.spawn(|| ch.recv());
            loop {
                match ch.try_send(2) {
                    Ok(()) => break,
                    Err(TrySendError::Full(_)) => sleep(Duration::from_millis(1)),
                    Err(e) => panic!("unexpected {e}"),
                }
            }
            assert_eq!(Some(2), receiver.join().unwrap());
        });
    }

    #[test]
    fn test_recv_timeout() {
        let ch = bounded::<u8>(1);
        let start = Instant::now();
        assert_eq!(
            Err(RecvTimeoutError::Timeout),
            ch.recv_timeout(Duration::from_millis(50))
        );
        assert!(start.elapsed() >= Duration::from_millis(50));
        ch.send(7).unwrap();
        assert_eq!(Ok(7), ch.recv_timeout(Duration::from_millis(50)));
        ch.close();
        assert_eq!(
            Err(RecvTimeoutError::Closed),
            ch.recv_timeout(Duration::from_millis(50))
        );
    }

    #[test]
    fn test_recv_timeout_without_deadline() {
        let ch = bounded::<u8>(1);
        ch.send(7).unwrap();
        assert_eq!(Ok(7), ch.recv_timeout(Duration::MAX));
        scope(|s| {
            s.spawn(|| {
                sleep(Duration::from_millis(20));
                ch.send(8).unwrap();
            });
            assert_eq!(Ok(8), ch.recv_timeout(Duration::MAX));
        });
        ch.close();
        assert_eq!(Err(RecvTimeoutError::Closed), ch.recv_timeout(Duration::MAX));
    }

    #[test]
    fn test_many_to_many() {
        let (tx, rx) = bounded(4).split();
        let total: usize = scope(|s| {
            for p in 0..4u64 {
                let tx = tx.clone();
                s.spawn(move || {
                    for i in 0..250 {
                        tx.send(p * 1000 + i).unwrap();
                    }
                });
            }
            let consumers: Vec<_> = (0..3)
                .map(|_| {
                    let rx = rx.clone();
                    s.spawn(move || rx.iter().count())
                })
                .collect();
            // only the spawned threads hold handles now
            drop(tx);
            drop(rx);
            consumers.into_iter().map(|c| c.join().unwrap()).sum()
        });
        assert_eq!(1000, total);
    }
}
