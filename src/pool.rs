//! Core object pool implementation

use crate::config::PoolConfiguration;
use crate::disposal::{DisposeReason, Disposer};
use crate::errors::{PoolError, PoolResult};
use crate::executor::Executor;
use crate::factory::{ConcurrentFactory, ObjectFactory, ThreadSafeFactory};
use crate::idle::{Checkout, IdleBuffer, Lifecycle};

use crossbeam::channel;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A borrowed object that goes back to the pool when dropped
pub struct PooledObject<T: Send + 'static> {
    value: Option<T>,
    pool: ObjectPool<T>,
}

impl<T: Send + 'static> PooledObject<T> {
    fn new(value: T, pool: ObjectPool<T>) -> Self {
        Self {
            value: Some(value),
            pool,
        }
    }

    /// Destroy the object instead of returning it
    pub fn invalidate(mut self) {
        if let Some(value) = self.value.take() {
            self.pool.invalidate_object(value);
        }
    }

    /// Detach the object from the guard.
    ///
    /// It stays borrowed: hand it back with
    /// [`ObjectPool::return_object`] or [`ObjectPool::invalidate_object`].
    pub fn into_inner(mut self) -> T {
        self.value.take().expect("Value already taken")
    }
}

impl<T: Send + 'static> Deref for PooledObject<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.value.as_ref().expect("Value already taken")
    }
}

impl<T: Send + 'static> DerefMut for PooledObject<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.value.as_mut().expect("Value already taken")
    }
}

impl<T: Send + 'static> Drop for PooledObject<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take()
            && let Err(err) = self.pool.return_object(value)
        {
            warn!(error = %err, "Pooled object failed validation on drop");
        }
    }
}

impl<T: Send + fmt::Debug + 'static> fmt::Debug for PooledObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PooledObject").field(&self.value).finish()
    }
}

struct PoolInner<T> {
    idle: Arc<IdleBuffer<T>>,
    factory: Arc<dyn ConcurrentFactory<T>>,
    disposer: Disposer<T>,
    config: PoolConfiguration,
    executor: Executor,
}

impl<T> Drop for PoolInner<T> {
    fn drop(&mut self) {
        let Some(drained) = self.idle.begin_close() else {
            return;
        };
        if !drained.is_empty() {
            debug!(
                idle = drained.len(),
                "Pool dropped without close, destroying idle objects"
            );
        }
        for obj in drained {
            if let Err(err) = self.factory.destroy(obj) {
                warn!(error = %err, "Failed to destroy idle object on drop");
            }
        }
        self.idle.finish_close();
    }
}

/// Bounded, thread-safe pool of objects built by a factory.
///
/// Borrowing takes an idle object, or creates one on the pool's executor
/// while fewer than `max_size` objects are alive, or waits up to `timeout`
/// for another caller to return one. Invalid and surplus objects are
/// destroyed on the executor so returning never waits on destruction.
///
/// Cloning the pool yields another handle to the same objects.
///
/// # Examples
///
/// ```
/// use blocking_objectpool::{FnFactory, ObjectPool, PoolConfiguration};
///
/// let config = PoolConfiguration::new().with_min_size(2).with_max_size(4);
/// let pool = ObjectPool::new(FnFactory::new(|| vec![0u8; 1024]), config).unwrap();
///
/// let buf = pool.borrow_object().unwrap();
/// assert_eq!(buf.len(), 1024);
/// pool.return_object(buf).unwrap();
///
/// pool.close().unwrap();
/// ```
pub struct ObjectPool<T: Send + 'static> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Send + 'static> Clone for ObjectPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> ObjectPool<T> {
    /// Create a pool with its own executor and preload `min_size` objects
    pub fn new<F>(factory: F, config: PoolConfiguration) -> PoolResult<Self>
    where
        F: ObjectFactory<T> + 'static,
    {
        config.validate()?;
        let executor = Executor::owned(&config)?;
        Self::build(Arc::new(ThreadSafeFactory::new(factory)), config, executor)
    }

    /// Create a pool that runs creations and destructions on an existing runtime
    pub fn with_runtime<F>(
        factory: F,
        config: PoolConfiguration,
        handle: Handle,
    ) -> PoolResult<Self>
    where
        F: ObjectFactory<T> + 'static,
    {
        config.validate()?;
        Self::build(
            Arc::new(ThreadSafeFactory::new(factory)),
            config,
            Executor::shared(handle),
        )
    }

    /// Create a pool around a factory that is already thread-safe
    pub fn from_shared(
        factory: Arc<dyn ConcurrentFactory<T>>,
        config: PoolConfiguration,
    ) -> PoolResult<Self> {
        config.validate()?;
        let executor = Executor::owned(&config)?;
        Self::build(factory, config, executor)
    }

    fn build(
        factory: Arc<dyn ConcurrentFactory<T>>,
        config: PoolConfiguration,
        executor: Executor,
    ) -> PoolResult<Self> {
        let idle = Arc::new(IdleBuffer::new(config.max_size));
        preload(factory.as_ref(), &idle, config.min_size)?;

        info!(
            min_size = config.min_size,
            max_size = config.max_size,
            timeout_ms = config.timeout.as_millis() as u64,
            "Created object pool"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                idle,
                disposer: Disposer::new(Arc::clone(&factory)),
                factory,
                config,
                executor,
            }),
        })
    }

    /// Borrow an object, blocking the calling thread if the pool is exhausted.
    ///
    /// Waiting for a lazily created object is not bounded by the timeout;
    /// only waiting for a returned object is.
    ///
    /// # Errors
    ///
    /// [`PoolError::BorrowTimeout`] when nothing came back in time,
    /// [`PoolError::Creation`] when lazy creation failed and
    /// [`PoolError::Closed`] once the pool is closing.
    pub fn borrow_object(&self) -> PoolResult<T> {
        self.borrow(None)
    }

    /// Like [`borrow_object`](Self::borrow_object), giving up with
    /// [`PoolError::BorrowInterrupted`] once `cancel` fires.
    ///
    /// The token is left cancelled for the caller to observe.
    pub fn borrow_object_cancellable(&self, cancel: &CancellationToken) -> PoolResult<T> {
        self.borrow(Some(cancel))
    }

    fn borrow(&self, cancel: Option<&CancellationToken>) -> PoolResult<T> {
        let inner = &self.inner;
        let checkout = match inner.idle.checkout()? {
            Some(checkout) => checkout,
            None => inner
                .idle
                .wait_checkout(inner.config.timeout, cancel)
                .inspect_err(|err| {
                    if err.is_timeout() {
                        warn!(timeout = ?inner.config.timeout, "Borrow timed out");
                    }
                })?,
        };

        match checkout {
            Checkout::Idle(obj) => Ok(obj),
            Checkout::Reserved => self.create_blocking(),
        }
    }

    /// Borrow an object without blocking the async runtime.
    ///
    /// Dropping the future abandons the borrow; an object created on its
    /// behalf is kept in the pool.
    pub async fn borrow_object_async(&self) -> PoolResult<T> {
        let inner = &self.inner;
        let timeout = inner.config.timeout;
        let deadline = tokio::time::Instant::now().checked_add(timeout);

        let checkout = loop {
            let notified = inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(checkout) = inner.idle.checkout()? {
                break checkout;
            }
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        match inner.idle.checkout()? {
                            Some(checkout) => break checkout,
                            None => {
                                warn!(timeout = ?timeout, "Async borrow timed out");
                                return Err(PoolError::BorrowTimeout(timeout));
                            }
                        }
                    }
                }
                None => notified.await,
            }
        };

        match checkout {
            Checkout::Idle(obj) => Ok(obj),
            Checkout::Reserved => {
                let (tx, rx) = oneshot::channel();
                self.spawn_create(move |result| tx.send(result));
                PendingCreation::new(self, rx).wait().await
            }
        }
    }

    /// Borrow an object wrapped in a guard that returns it on drop
    pub fn get_object(&self) -> PoolResult<PooledObject<T>> {
        let obj = self.borrow_object()?;
        Ok(PooledObject::new(obj, self.clone()))
    }

    /// Async variant of [`get_object`](Self::get_object)
    pub async fn get_object_async(&self) -> PoolResult<PooledObject<T>> {
        let obj = self.borrow_object_async().await?;
        Ok(PooledObject::new(obj, self.clone()))
    }

    /// Give an object back.
    ///
    /// The object is validated exactly once. Invalid objects, and objects
    /// that do not fit in the idle buffer, are destroyed in the background.
    ///
    /// # Errors
    ///
    /// [`PoolError::Validation`] if the factory could not validate the
    /// object; it is destroyed in that case too. Destruction failures are
    /// never reported here, see
    /// [`take_destruction_failures`](Self::take_destruction_failures).
    pub fn return_object(&self, obj: T) -> PoolResult<()> {
        match self.inner.factory.validate(&obj) {
            Ok(true) => {
                self.reclaim(obj);
                Ok(())
            }
            Ok(false) => {
                debug!("Returned object is invalid, destroying it");
                self.discard(obj, DisposeReason::Invalid);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "Validation failed on return, destroying object");
                self.discard(obj, DisposeReason::ValidationFailed);
                Err(err)
            }
        }
    }

    /// Give an object up for destruction without validating it
    pub fn invalidate_object(&self, obj: T) {
        debug!("Invalidating object");
        self.discard(obj, DisposeReason::Invalidated);
    }

    /// Issue `count` independent borrows concurrently.
    ///
    /// The borrows share at most `max_blocking_threads` threads, the
    /// caller's included. Each entry carries its own outcome: a failed
    /// borrow does not undo the successful ones.
    pub fn borrow_objects(&self, count: usize) -> Vec<PoolResult<T>> {
        let workers = count.min(self.inner.config.max_blocking_threads).max(1);
        let next = AtomicUsize::new(0);
        let work = || {
            let mut done = Vec::new();
            loop {
                let index = next.fetch_add(1, Ordering::Relaxed);
                if index >= count {
                    break done;
                }
                done.push((index, self.borrow_object()));
            }
        };

        let mut outcomes = thread::scope(|scope| {
            // fewer helpers if the OS refuses threads; the caller still works
            let helpers: Vec<_> = (1..workers)
                .map_while(|_| thread::Builder::new().spawn_scoped(scope, &work).ok())
                .collect();
            debug!(count, threads = helpers.len() + 1, "Borrowing batch");

            let mut outcomes = work();
            for helper in helpers {
                match helper.join() {
                    Ok(done) => outcomes.extend(done),
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
            outcomes
        });

        outcomes.sort_unstable_by_key(|(index, _)| *index);
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }

    /// Return every object, reporting the first validation error afterwards
    pub fn return_objects<I>(&self, objects: I) -> PoolResult<()>
    where
        I: IntoIterator<Item = T>,
    {
        let mut first_error = None;
        for obj in objects {
            if let Err(err) = self.return_object(obj) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Close the pool, destroying every idle object.
    ///
    /// Blocks until those destructions have finished, along with any
    /// background creation or destruction started before. Objects borrowed
    /// at this point are not tracked: returning them later destroys them.
    ///
    /// # Errors
    ///
    /// [`PoolError::Closure`] with every destruction failure, reported only
    /// after all idle objects were attempted.
    pub fn close(&self) -> PoolResult<()> {
        let inner = &self.inner;
        let Some(drained) = inner.idle.begin_close() else {
            inner.idle.wait_closed();
            return Ok(());
        };

        debug!(idle = drained.len(), "Closing pool");
        let failures = inner.disposer.dispose_all(&inner.executor, drained);
        inner.disposer.wait_idle();
        inner.idle.finish_close();

        if failures.is_empty() {
            info!("Pool closed");
            Ok(())
        } else {
            warn!(failed = failures.len(), "Pool closed with destruction failures");
            Err(PoolError::Closure { failures })
        }
    }

    /// Objects currently waiting in the idle buffer
    pub fn idle_count(&self) -> usize {
        self.inner.idle.len()
    }

    /// Objects the pool keeps alive: idle, borrowed or being created
    pub fn live_count(&self) -> usize {
        self.inner.idle.live()
    }

    /// Destructions scheduled and not yet finished
    pub fn pending_destructions(&self) -> usize {
        self.inner.disposer.in_flight()
    }

    pub fn min_size(&self) -> usize {
        self.inner.config.min_size
    }

    pub fn max_size(&self) -> usize {
        self.inner.idle.capacity()
    }

    pub fn timeout(&self) -> Duration {
        self.inner.config.timeout
    }

    pub fn configuration(&self) -> &PoolConfiguration {
        &self.inner.config
    }

    /// Whether `close` has started
    pub fn is_closed(&self) -> bool {
        self.inner.idle.lifecycle() != Lifecycle::Operational
    }

    /// Drain failures of background destructions since the last call.
    ///
    /// Only the most recent failures are kept.
    pub fn take_destruction_failures(&self) -> Vec<PoolError> {
        self.inner.disposer.take_failures()
    }

    fn create_blocking(&self) -> PoolResult<T> {
        let (tx, rx) = channel::bounded(1);
        self.spawn_create(move |result| tx.send(result).map_err(|e| e.into_inner()));

        let result = rx
            .recv()
            .unwrap_or_else(|_| Err(PoolError::creation("creation task aborted")));
        self.settle_creation(result)
    }

    /// Create an object on the executor for a reserved slot.
    ///
    /// `deliver` hands the result to the borrower and gives it back if the
    /// borrower is gone, in which case the slot is settled here.
    fn spawn_create<D>(&self, deliver: D)
    where
        D: FnOnce(PoolResult<T>) -> Result<(), PoolResult<T>> + Send + 'static,
    {
        let factory = Arc::clone(&self.inner.factory);
        let idle = Arc::clone(&self.inner.idle);
        let ticket = self.inner.disposer.reserve();
        debug!(live = idle.live(), "Idle buffer empty, creating object");

        self.inner.executor.spawn(move || match deliver(factory.create()) {
            Ok(()) => {}
            Err(Ok(orphan)) => {
                if let Err(orphan) = idle.offer(orphan) {
                    idle.release();
                    let reason = match idle.lifecycle() {
                        Lifecycle::Operational => DisposeReason::Surplus,
                        _ => DisposeReason::Closing,
                    };
                    ticket.dispose(orphan, reason);
                }
            }
            Err(Err(_)) => idle.release(),
        });
    }

    fn settle_creation(&self, result: PoolResult<T>) -> PoolResult<T> {
        result.inspect_err(|err| {
            self.inner.idle.release();
            warn!(error = %err, "Lazy creation failed");
        })
    }

    /// Put a validated object back, or destroy it if there is no room
    fn reclaim(&self, obj: T) {
        if let Err(obj) = self.inner.idle.offer(obj) {
            let reason = if self.is_closed() {
                DisposeReason::Closing
            } else {
                DisposeReason::Surplus
            };
            self.discard(obj, reason);
        }
    }

    fn discard(&self, obj: T, reason: DisposeReason) {
        self.inner.idle.release();
        self.inner
            .disposer
            .dispose(&self.inner.executor, obj, reason);
    }
}

impl<T: Send + 'static> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("idle", &self.idle_count())
            .field("live", &self.live_count())
            .field("max_size", &self.max_size())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn preload<T>(
    factory: &dyn ConcurrentFactory<T>,
    idle: &IdleBuffer<T>,
    count: usize,
) -> PoolResult<()> {
    let mut created = Vec::with_capacity(count);
    for _ in 0..count {
        match factory.create() {
            Ok(obj) => created.push(obj),
            Err(err) => {
                warn!(
                    created = created.len(),
                    error = %err,
                    "Preload failed, destroying objects created so far"
                );
                for obj in created {
                    if let Err(err) = factory.destroy(obj) {
                        warn!(error = %err, "Failed to destroy preloaded object");
                    }
                }
                return Err(err);
            }
        }
    }

    debug!(count, "Preloaded objects");
    for obj in created {
        if let Err(obj) = idle.admit(obj) {
            factory.destroy(obj)?;
        }
    }
    Ok(())
}

/// Creation result awaited by an async borrower.
///
/// If the borrower goes away first, whatever was created is put back.
struct PendingCreation<'a, T: Send + 'static> {
    pool: &'a ObjectPool<T>,
    rx: oneshot::Receiver<PoolResult<T>>,
    settled: bool,
}

impl<'a, T: Send + 'static> PendingCreation<'a, T> {
    fn new(pool: &'a ObjectPool<T>, rx: oneshot::Receiver<PoolResult<T>>) -> Self {
        Self {
            pool,
            rx,
            settled: false,
        }
    }

    async fn wait(mut self) -> PoolResult<T> {
        let result = (&mut self.rx)
            .await
            .unwrap_or_else(|_| Err(PoolError::creation("creation task aborted")));
        self.settled = true;
        self.pool.settle_creation(result)
    }
}

impl<T: Send + 'static> Drop for PendingCreation<'_, T> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        // after close() the creating task sees the receiver gone and settles itself
        self.rx.close();
        match self.rx.try_recv() {
            Ok(Ok(obj)) => self.pool.reclaim(obj),
            Ok(Err(_)) => self.pool.inner.idle.release(),
            Err(_) => {}
        }
    }
}
