//! # Select
//!
//! Waits on several receivers at once and tells which one has a value.
//!
//! Every registered channel gets a [Signal] to poke whenever something changes on it
//! (a value arrives, it's closed, the last sender leaves). The signal is a counter under a mutex + a condvar,
//! the same trick the futex-based condvar plays: read the counter, check the channels, sleep only if the counter
//! is still the same. So a value that arrives between the check and the sleep can't be missed.
//!
//! Fairness: the scan starts from a different receiver on each call, so a receiver that's ready
//! is never skipped forever in favour of an always-ready neighbour.
//!
//! Select only *reports* readiness, it doesn't take the value. A receiver shared with other consumers
//! may be emptied by them in-between, that's why the usual loop is:
//!
//! ```
//! use fanout_coordinator::channel::{bounded, Select, TryRecvError};
//!
//! let numbers = bounded(1);
//! let words = bounded(1);
//! numbers.send(10).unwrap();
//! words.send("thee").unwrap();
//!
//! for _ in 0..2 {
//!     let ready = Select::new()
//!         .recv(numbers.as_receiver())
//!         .recv(words.as_receiver())
//!         .ready();
//!     match ready {
//!         Some(0) => println!("{}", numbers.try_recv().unwrap()),
//!         Some(1) => println!("{}", words.try_recv().unwrap()),
//!         _ => unreachable!(),
//!     }
//! }
//! assert_eq!(Err(TryRecvError::Empty), numbers.try_recv());
//! ```

use std::{
    cell::Cell,
    sync::{Arc, Condvar, Mutex, PoisonError},
    time::{Duration, Instant},
};

use super::{Inner, Receiver};
use crate::error::{RecvTimeoutError, TryRecvError};

/// Counts notifications, so a waiter can tell whether anything happened since it last looked
#[derive(Default)]
pub(crate) struct Signal {
    generation: Mutex<u64>,
    changed: Condvar,
}

impl Signal {
    pub(crate) fn notify(&self) {
        *self.generation.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        self.changed.notify_all();
    }

    fn generation(&self) -> u64 {
        *self.generation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// false on timeout
    fn wait_past(&self, seen: u64, deadline: Option<Instant>) -> bool {
        let mut generation = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        while *generation == seen {
            generation = match deadline {
                None => self
                    .changed
                    .wait(generation)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return false;
                    }
                    self.changed
                        .wait_timeout(generation, left)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
        true
    }
}

/// The bits of a channel select needs, regardless of the item type
pub(crate) trait Watched {
    fn has_item(&self) -> bool;
    fn is_drained(&self) -> bool;
    fn watch(&self, signal: &Arc<Signal>);
    fn unwatch(&self, signal: &Arc<Signal>);
}

impl<T> Watched for Inner<T> {
    fn has_item(&self) -> bool {
        Inner::has_item(self)
    }

    fn is_drained(&self) -> bool {
        Inner::is_drained(self)
    }

    fn watch(&self, signal: &Arc<Signal>) {
        Inner::watch(self, signal)
    }

    fn unwatch(&self, signal: &Arc<Signal>) {
        Inner::unwatch(self, signal)
    }
}

thread_local! {
    static ROTATION: Cell<usize> = const { Cell::new(0) };
}

#[derive(Default)]
pub struct Select<'a> {
    handles: Vec<&'a dyn Watched>,
}

impl<'a> Select<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a receive case, its index is the # of cases added before it
    pub fn recv<T>(mut self, rx: &'a Receiver<T>) -> Self {
        self.handles.push(rx.inner());
        self
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Blocks until a case has a value and returns its index.
    /// `None` once every case is closed and drained, there's nothing left to wait for.
    pub fn ready(&self) -> Option<usize> {
        self.wait(None).ok()
    }

    /// `Duration::MAX` and the like wait as long as [Select::ready]
    pub fn ready_timeout(&self, timeout: Duration) -> Result<usize, RecvTimeoutError> {
        self.wait(Instant::now().checked_add(timeout))
    }

    pub fn try_ready(&self) -> Result<usize, TryRecvError> {
        self.scan(next_start())
    }

    fn scan(&self, start: usize) -> Result<usize, TryRecvError> {
        let n = self.handles.len();
        let mut all_drained = true;
        for k in 0..n {
            let idx = (start + k) % n;
            let handle = self.handles[idx];
            if handle.has_item() {
                return Ok(idx);
            }
            all_drained &= handle.is_drained();
        }
        if all_drained {
            Err(TryRecvError::Closed)
        } else {
            Err(TryRecvError::Empty)
        }
    }

    fn wait(&self, deadline: Option<Instant>) -> Result<usize, RecvTimeoutError> {
        if self.handles.is_empty() {
            return Err(RecvTimeoutError::Closed);
        }
        let signal = Arc::new(Signal::default());
        let _watching = Watching::new(&self.handles, &signal);
        let start = next_start();
        loop {
            let seen = signal.generation();
            match self.scan(start) {
                Ok(idx) => return Ok(idx),
                Err(TryRecvError::Closed) => return Err(RecvTimeoutError::Closed),
                Err(TryRecvError::Empty) => {}
            }
            if !signal.wait_past(seen, deadline) {
                return Err(RecvTimeoutError::Timeout);
            }
        }
    }
}

/// Where to start scanning a set of sources, different on every call
pub(crate) fn next_start() -> usize {
    ROTATION.with(|r| {
        let start = r.get();
        r.set(start.wrapping_add(1));
        start
    })
}

/// Registration of a signal on every case, undone on drop
struct Watching<'s, 'a> {
    handles: &'s [&'a dyn Watched],
    signal: &'s Arc<Signal>,
}

impl<'s, 'a> Watching<'s, 'a> {
    fn new(handles: &'s [&'a dyn Watched], signal: &'s Arc<Signal>) -> Self {
        for handle in handles {
            handle.watch(signal);
        }
        Self { handles, signal }
    }
}

impl Drop for Watching<'_, '_> {
    fn drop(&mut self) {
        for handle in self.handles {
            handle.unwatch(self.signal);
        }
    }
}

#[cfg(test)]
mod test {
    use std::thread::{scope, sleep};

    use super::*;
    use crate::channel::bounded;

    #[test]
    fn test_select_picks_the_first_to_arrive() {
        let fast = bounded(0);
        let slow = bounded(0);
        scope(|s| {
            s.spawn(|| {
                sleep(Duration::from_millis(200));
                slow.send("slow").unwrap();
            });
            s.spawn(|| {
                sleep(Duration::from_millis(20));
                fast.send(10).unwrap();
            });

            let select = Select::new()
                .recv(slow.as_receiver())
                .recv(fast.as_receiver());
            assert_eq!(Some(1), select.ready());
            assert_eq!(Ok(10), fast.try_recv());
            // the other one wasn't touched and shows up later
            assert_eq!(Some(0), select.ready());
            assert_eq!(Ok("slow"), slow.try_recv());
        });
    }

    #[test]
    fn test_select_is_fair() {
        let a = bounded(1);
        let b = bounded(1);
        a.send(1).unwrap();
        b.send(2).unwrap();
        let select = Select::new().recv(a.as_receiver()).recv(b.as_receiver());
        // both are ready all the time, both get picked
        let mut picks = [0; 2];
        for _ in 0..100 {
            picks[select.ready().unwrap()] += 1;
        }
        assert!(picks[0] > 0 && picks[1] > 0, "{picks:?}");
    }

    #[test]
    fn test_select_over_closed_channels() {
        let a = bounded::<u8>(1);
        let b = bounded::<String>(1);
        a.close();
        b.close();
        let select = Select::new().recv(a.as_receiver()).recv(b.as_receiver());
        assert_eq!(None, select.ready());
        assert_eq!(Err(TryRecvError::Closed), select.try_ready());
    }

    #[test]
    fn test_select_drains_before_reporting_closed() {
        let a = bounded(2);
        a.send(1).unwrap();
        a.close();
        let select = Select::new().recv(a.as_receiver());
        assert_eq!(Some(0), select.ready());
        assert_eq!(Some(1), a.recv());
        assert_eq!(None, select.ready());
    }

    #[test]
    fn test_select_timeout() {
        let a = bounded::<u8>(1);
        let select = Select::new().recv(a.as_receiver());
        assert_eq!(
            Err(RecvTimeoutError::Timeout),
            select.ready_timeout(Duration::from_millis(30))
        );
        assert_eq!(Err(TryRecvError::Empty), select.try_ready());
    }

    #[test]
    fn test_select_timeout_without_deadline() {
        let a = bounded::<u8>(1);
        let b = bounded::<u8>(1);
        scope(|s| {
            s.spawn(|| {
                sleep(Duration::from_millis(20));
                b.send(1).unwrap();
            });
            let select = Select::new().recv(a.as_receiver()).recv(b.as_receiver());
            assert_eq!(Ok(1), select.ready_timeout(Duration::MAX));
        });
        a.close();
        b.close();
        b.recv();
        let select = Select::new().recv(a.as_receiver()).recv(b.as_receiver());
        assert_eq!(Err(RecvTimeoutError::Closed), select.ready_timeout(Duration::MAX));
    }

    #[test]
    fn test_select_leaves_no_observers_behind() {
        let a = bounded::<u8>(1);
        a.send(1).unwrap();
        Select::new().recv(a.as_receiver()).ready();
        assert!(a.as_receiver().inner().state.lock().unwrap().observers.is_empty());
    }
}
