//! Bounded idle buffer shared by borrowers and returners

use crate::errors::{PoolError, PoolResult};

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, futures::Notified};
use tokio_util::sync::CancellationToken;

/// How often a cancellable wait re-checks its token
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Operational,
    Closing,
    Closed,
}

/// Outcome of a successful checkout
#[derive(Debug)]
pub(crate) enum Checkout<T> {
    /// An idle object, now owned by the caller
    Idle(T),
    /// A slot reserved for an object the caller must create, or release
    Reserved,
}

struct State<T> {
    idle: VecDeque<T>,
    /// Objects alive on behalf of the pool: idle, borrowed or being created
    live: usize,
    lifecycle: Lifecycle,
}

impl<T> State<T> {
    fn checkout(&mut self, capacity: usize) -> PoolResult<Option<Checkout<T>>> {
        if self.lifecycle != Lifecycle::Operational {
            return Err(PoolError::Closed);
        }
        if let Some(obj) = self.idle.pop_front() {
            return Ok(Some(Checkout::Idle(obj)));
        }
        if self.live < capacity {
            self.live += 1;
            return Ok(Some(Checkout::Reserved));
        }
        Ok(None)
    }
}

/// Idle objects plus the accounting of every object the pool keeps alive.
///
/// All state sits behind one mutex, so a slot freed by a destruction and an
/// object deposited by a return wake waiters the same way.
pub(crate) struct IdleBuffer<T> {
    state: Mutex<State<T>>,
    available: Condvar,
    closed: Condvar,
    waiters: Notify,
    capacity: usize,
}

impl<T> IdleBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                idle: VecDeque::with_capacity(capacity),
                live: 0,
                lifecycle: Lifecycle::Operational,
            }),
            available: Condvar::new(),
            closed: Condvar::new(),
            waiters: Notify::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().idle.len()
    }

    pub fn live(&self) -> usize {
        self.state.lock().live
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.state.lock().lifecycle
    }

    /// Add a freshly created object that was not counted yet
    pub fn admit(&self, obj: T) -> Result<(), T> {
        let mut state = self.state.lock();
        if state.lifecycle != Lifecycle::Operational || state.live >= self.capacity {
            return Err(obj);
        }
        state.live += 1;
        state.idle.push_back(obj);
        self.wake_one();
        Ok(())
    }

    /// Put back an object that is already counted as live.
    ///
    /// Hands the object back when the pool is not operational or the buffer
    /// is full; the caller then owns its disposal.
    pub fn offer(&self, obj: T) -> Result<(), T> {
        let mut state = self.state.lock();
        if state.lifecycle != Lifecycle::Operational || state.idle.len() >= self.capacity {
            return Err(obj);
        }
        state.idle.push_back(obj);
        self.wake_one();
        Ok(())
    }

    /// An object left the pool for good, or a reserved slot went unused
    pub fn release(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.live > 0, "released a slot that was never taken");
        state.live = state.live.saturating_sub(1);
        self.wake_one();
    }

    /// Take an idle object or reserve a slot without blocking
    pub fn checkout(&self) -> PoolResult<Option<Checkout<T>>> {
        self.state.lock().checkout(self.capacity)
    }

    /// Block until an object or a slot is available.
    ///
    /// `timeout` bounds the wait; a cancelled token ends it early. The
    /// token is left cancelled.
    pub fn wait_checkout(
        &self,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> PoolResult<Checkout<T>> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();

        loop {
            if let Some(checkout) = state.checkout(self.capacity)? {
                return Ok(checkout);
            }
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(PoolError::BorrowInterrupted);
            }

            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                return Err(PoolError::BorrowTimeout(timeout));
            }

            let poll_at = cancel.and_then(|_| now.checked_add(CANCEL_POLL_INTERVAL));
            match (deadline, poll_at) {
                (Some(deadline), Some(poll_at)) => {
                    self.available.wait_until(&mut state, deadline.min(poll_at));
                }
                (Some(wake_at), None) | (None, Some(wake_at)) => {
                    self.available.wait_until(&mut state, wake_at);
                }
                (None, None) => self.available.wait(&mut state),
            }
        }
    }

    /// Future resolved by the next deposit, slot release or close.
    ///
    /// Async waiters enable it before checking the buffer so that a wake-up
    /// between the check and the await is not lost.
    pub fn notified(&self) -> Notified<'_> {
        self.waiters.notified()
    }

    /// Move from operational to closing and take every idle object.
    ///
    /// Returns `None` if another close already started.
    pub fn begin_close(&self) -> Option<Vec<T>> {
        let mut state = self.state.lock();
        if state.lifecycle != Lifecycle::Operational {
            return None;
        }
        state.lifecycle = Lifecycle::Closing;
        let drained: Vec<T> = state.idle.drain(..).collect();
        state.live = state.live.saturating_sub(drained.len());

        self.available.notify_all();
        self.waiters.notify_waiters();
        Some(drained)
    }

    pub fn finish_close(&self) {
        let mut state = self.state.lock();
        state.lifecycle = Lifecycle::Closed;
        self.closed.notify_all();
    }

    /// Block until a concurrent close has completed
    pub fn wait_closed(&self) {
        let mut state = self.state.lock();
        while state.lifecycle != Lifecycle::Closed {
            self.closed.wait(&mut state);
        }
    }

    fn wake_one(&self) {
        self.available.notify_one();
        self.waiters.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn reserve(buffer: &IdleBuffer<u32>) {
        assert!(matches!(buffer.checkout(), Ok(Some(Checkout::Reserved))));
    }

    #[test]
    fn test_checkout_prefers_idle_objects() {
        let buffer = IdleBuffer::new(2);
        buffer.admit(1).unwrap();

        match buffer.checkout().unwrap() {
            Some(Checkout::Idle(obj)) => assert_eq!(obj, 1),
            other => panic!("unexpected checkout: {:?}", other),
        }
        reserve(&buffer);
        assert_eq!(buffer.live(), 2);
        assert!(buffer.checkout().unwrap().is_none());
    }

    #[test]
    fn test_admit_respects_capacity() {
        let buffer = IdleBuffer::new(1);

        assert!(buffer.admit(1).is_ok());
        assert_eq!(buffer.admit(2), Err(2));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_offer_rejects_when_full() {
        let buffer = IdleBuffer::new(1);
        buffer.admit(1).unwrap();

        assert_eq!(buffer.offer(2), Err(2));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_release_frees_a_slot() {
        let buffer = IdleBuffer::new(1);
        reserve(&buffer);
        assert!(buffer.checkout().unwrap().is_none());

        buffer.release();
        reserve(&buffer);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "released a slot that was never taken")]
    fn test_release_without_a_slot_is_caught() {
        let buffer = IdleBuffer::<u32>::new(1);
        buffer.release();
    }

    #[test]
    fn test_wait_times_out() {
        let buffer = IdleBuffer::<u32>::new(1);
        reserve(&buffer);

        let start = Instant::now();
        let result = buffer.wait_checkout(Duration::from_millis(30), None);

        assert!(matches!(result, Err(PoolError::BorrowTimeout(_))));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_wait_wakes_on_offer() {
        let buffer = Arc::new(IdleBuffer::new(1));
        reserve(&buffer);

        let returner = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                buffer.offer(9).unwrap();
            })
        };

        match buffer.wait_checkout(Duration::from_secs(5), None).unwrap() {
            Checkout::Idle(obj) => assert_eq!(obj, 9),
            Checkout::Reserved => panic!("expected the returned object"),
        }
        returner.join().unwrap();
    }

    #[test]
    fn test_wait_wakes_on_release() {
        let buffer = Arc::new(IdleBuffer::<u32>::new(1));
        reserve(&buffer);

        let invalidator = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                buffer.release();
            })
        };

        let checkout = buffer.wait_checkout(Duration::from_secs(5), None).unwrap();
        assert!(matches!(checkout, Checkout::Reserved));
        invalidator.join().unwrap();
    }

    #[test]
    fn test_cancelled_wait_keeps_token_cancelled() {
        let buffer = Arc::new(IdleBuffer::<u32>::new(1));
        reserve(&buffer);
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                token.cancel();
            })
        };

        let start = Instant::now();
        let result = buffer.wait_checkout(Duration::from_secs(5), Some(&token));

        assert!(matches!(result, Err(PoolError::BorrowInterrupted)));
        assert!(token.is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(1));
        canceller.join().unwrap();
    }

    #[test]
    fn test_close_drains_and_wakes_waiters() {
        let buffer = Arc::new(IdleBuffer::new(2));
        buffer.admit(1).unwrap();
        assert!(matches!(buffer.checkout(), Ok(Some(Checkout::Idle(1)))));
        reserve(&buffer);

        let waiter = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || buffer.wait_checkout(Duration::from_secs(5), None))
        };
        thread::sleep(Duration::from_millis(20));

        buffer.offer(1).unwrap();
        let drained = buffer.begin_close();
        let waited = waiter.join().unwrap();

        // the waiter either grabbed the object first or saw the close
        match waited {
            Ok(Checkout::Idle(1)) => assert_eq!(drained, Some(vec![])),
            Err(PoolError::Closed) => assert_eq!(drained, Some(vec![1])),
            other => panic!("unexpected wait result: {:?}", other),
        }
        assert!(buffer.begin_close().is_none());
        assert!(matches!(buffer.checkout(), Err(PoolError::Closed)));
        assert_eq!(buffer.offer(5), Err(5));
    }

    #[test]
    fn test_wait_closed_returns_after_finish() {
        let buffer = Arc::new(IdleBuffer::<u32>::new(1));
        buffer.begin_close().unwrap();

        let waiter = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || buffer.wait_closed())
        };
        thread::sleep(Duration::from_millis(10));
        buffer.finish_close();

        waiter.join().unwrap();
        assert_eq!(buffer.lifecycle(), Lifecycle::Closed);
    }
}
