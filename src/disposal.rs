//! Asynchronous destruction of objects leaving the pool

use crate::errors::PoolError;
use crate::executor::Executor;
use crate::factory::ConcurrentFactory;

use crossbeam::channel;
use crossbeam::queue::ArrayQueue;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use tracing::{trace, warn};

/// Number of asynchronous destruction failures kept for inspection
pub(crate) const FAILURE_LOG_CAPACITY: usize = 64;

/// Why an object is on its way to destruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DisposeReason {
    Invalid,
    ValidationFailed,
    Surplus,
    Invalidated,
    Closing,
}

impl fmt::Display for DisposeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DisposeReason::Invalid => "invalid",
            DisposeReason::ValidationFailed => "validation_failed",
            DisposeReason::Surplus => "surplus",
            DisposeReason::Invalidated => "invalidated",
            DisposeReason::Closing => "closing",
        };
        f.write_str(reason)
    }
}

/// Count of destructions scheduled but not yet finished
#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    drained: Condvar,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        *self.count.lock() += 1;
        InFlightGuard {
            in_flight: Arc::clone(self),
        }
    }

    fn wait_drained(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.drained.wait(&mut count);
        }
    }
}

/// Marks one destruction finished when dropped, even if the task never ran
struct InFlightGuard {
    in_flight: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut count = self.in_flight.count.lock();
        *count -= 1;
        if *count == 0 {
            self.in_flight.drained.notify_all();
        }
    }
}

/// Sends objects to the factory's destroy on the executor
pub(crate) struct Disposer<T> {
    factory: Arc<dyn ConcurrentFactory<T>>,
    in_flight: Arc<InFlight>,
    pending: Arc<InFlight>,
    failures: Arc<ArrayQueue<PoolError>>,
}

impl<T: Send + 'static> Disposer<T> {
    pub fn new(factory: Arc<dyn ConcurrentFactory<T>>) -> Self {
        Self {
            factory,
            in_flight: Arc::new(InFlight::default()),
            pending: Arc::new(InFlight::default()),
            failures: Arc::new(ArrayQueue::new(FAILURE_LOG_CAPACITY)),
        }
    }

    /// Destroy one object without waiting for the outcome.
    ///
    /// Failures go to the log and the failure queue only.
    pub fn dispose(&self, executor: &Executor, obj: T, reason: DisposeReason) {
        let factory = Arc::clone(&self.factory);
        let failures = Arc::clone(&self.failures);
        let guard = self.in_flight.enter();

        executor.spawn(move || {
            let _guard = guard;
            destroy_logged(factory.as_ref(), &failures, obj, reason);
        });
    }

    /// Hold [`wait_idle`](Self::wait_idle) back for a background task that
    /// may end up with an object to destroy.
    pub fn reserve(&self) -> DisposalTicket<T> {
        DisposalTicket {
            factory: Arc::clone(&self.factory),
            failures: Arc::clone(&self.failures),
            in_flight: Arc::clone(&self.in_flight),
            _pending: self.pending.enter(),
        }
    }

    /// Destroy every object independently and wait for all of them.
    ///
    /// Returns the failures; a task that never reported back counts as one.
    pub fn dispose_all(&self, executor: &Executor, objects: Vec<T>) -> Vec<PoolError> {
        let scheduled = objects.len();
        let (tx, rx) = channel::unbounded();

        for obj in objects {
            let factory = Arc::clone(&self.factory);
            let tx = tx.clone();
            let guard = self.in_flight.enter();

            executor.spawn(move || {
                let _guard = guard;
                let _ = tx.send(factory.destroy(obj));
            });
        }
        drop(tx);

        let mut completed = 0;
        let mut failures = Vec::new();
        for result in rx.iter() {
            completed += 1;
            match result {
                Ok(()) => trace!(reason = %DisposeReason::Closing, "Destroyed object"),
                Err(err) => {
                    warn!(reason = %DisposeReason::Closing, error = %err, "Destruction failed");
                    failures.push(err);
                }
            }
        }
        for _ in completed..scheduled {
            failures.push(PoolError::destruction("destruction task aborted"));
        }
        failures
    }

    /// Block until no destruction is running or queued, and no ticket is
    /// outstanding
    pub fn wait_idle(&self) {
        // a ticket enters `in_flight` before leaving `pending`
        self.pending.wait_drained();
        self.in_flight.wait_drained();
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.count.lock()
    }

    /// Drain the failures recorded by fire-and-forget destructions
    pub fn take_failures(&self) -> Vec<PoolError> {
        std::iter::from_fn(|| self.failures.pop()).collect()
    }
}

/// Permission to destroy one object later from a background task.
///
/// Dropping the ticket unused gives the permission back.
pub(crate) struct DisposalTicket<T> {
    factory: Arc<dyn ConcurrentFactory<T>>,
    failures: Arc<ArrayQueue<PoolError>>,
    in_flight: Arc<InFlight>,
    _pending: InFlightGuard,
}

impl<T> DisposalTicket<T> {
    /// Destroy `obj` on the current thread
    pub fn dispose(self, obj: T, reason: DisposeReason) {
        let _guard = self.in_flight.enter();
        destroy_logged(self.factory.as_ref(), &self.failures, obj, reason);
    }
}

fn destroy_logged<T>(
    factory: &dyn ConcurrentFactory<T>,
    failures: &ArrayQueue<PoolError>,
    obj: T,
    reason: DisposeReason,
) {
    match factory.destroy(obj) {
        Ok(()) => trace!(%reason, "Destroyed object"),
        Err(err) => {
            warn!(%reason, error = %err, "Asynchronous destruction failed");
            failures.force_push(err);
        }
    }
}
