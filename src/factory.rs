//! Factory capability sets and the serializing adapter around them

use crate::errors::{FactoryError, PoolError, PoolResult};

use parking_lot::Mutex;
use std::convert::Infallible;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// Creates, validates and destroys pooled objects.
///
/// Methods take `&mut self`: the pool never calls two of them at the same
/// time, so implementations can keep plain counters or non-thread-safe
/// handles without locking.
///
/// # Examples
///
/// ```
/// use blocking_objectpool::ObjectFactory;
/// use std::convert::Infallible;
///
/// struct Buffers {
///     created: usize,
/// }
///
/// impl ObjectFactory<Vec<u8>> for Buffers {
///     type Error = Infallible;
///
///     fn create(&mut self) -> Result<Vec<u8>, Infallible> {
///         self.created += 1;
///         Ok(Vec::with_capacity(4096))
///     }
///
///     fn validate(&mut self, buf: &Vec<u8>) -> Result<bool, Infallible> {
///         Ok(buf.capacity() >= 4096)
///     }
/// }
/// ```
pub trait ObjectFactory<T>: Send {
    type Error: StdError + Send + Sync + 'static;

    /// Build a new object
    fn create(&mut self) -> Result<T, Self::Error>;

    /// Report whether an object may go back to the idle buffer
    fn validate(&mut self, _obj: &T) -> Result<bool, Self::Error> {
        Ok(true)
    }

    /// Release an object; it may already be logically invalid
    fn destroy(&mut self, obj: T) -> Result<(), Self::Error> {
        drop(obj);
        Ok(())
    }
}

/// Thread-safe factory capability set consumed by the pool.
///
/// [`ThreadSafeFactory`] provides it for any [`ObjectFactory`]; factories
/// that already synchronize internally can implement it directly and be
/// handed to [`ObjectPool::from_shared`](crate::ObjectPool::from_shared).
pub trait ConcurrentFactory<T>: Send + Sync {
    fn create(&self) -> PoolResult<T>;

    fn validate(&self, obj: &T) -> PoolResult<bool>;

    fn destroy(&self, obj: T) -> PoolResult<()>;
}

/// Serializes every call into a wrapped [`ObjectFactory`].
///
/// A single mutex guards create, validate and destroy alike, so at most one
/// of them runs at any time across all threads.
pub struct ThreadSafeFactory<F> {
    inner: Mutex<F>,
}

impl<F> ThreadSafeFactory<F> {
    pub fn new(factory: F) -> Self {
        Self {
            inner: Mutex::new(factory),
        }
    }
}

impl<F> fmt::Debug for ThreadSafeFactory<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadSafeFactory")
            .field("locked", &self.inner.is_locked())
            .finish()
    }
}

impl<T, F> ConcurrentFactory<T> for ThreadSafeFactory<F>
where
    F: ObjectFactory<T>,
{
    fn create(&self) -> PoolResult<T> {
        self.inner
            .lock()
            .create()
            .map_err(|e| PoolError::Creation { source: cause(e) })
    }

    fn validate(&self, obj: &T) -> PoolResult<bool> {
        self.inner
            .lock()
            .validate(obj)
            .map_err(|e| PoolError::Validation { source: cause(e) })
    }

    fn destroy(&self, obj: T) -> PoolResult<()> {
        self.inner
            .lock()
            .destroy(obj)
            .map_err(|e| PoolError::Destruction { source: cause(e) })
    }
}

fn cause<E: StdError + Send + Sync + 'static>(err: E) -> FactoryError {
    Arc::new(err)
}

type ValidateFn<T> = Box<dyn FnMut(&T) -> bool + Send>;
type DestroyFn<T> = Box<dyn FnMut(T) + Send>;

/// [`ObjectFactory`] assembled from closures.
///
/// # Examples
///
/// ```
/// use blocking_objectpool::{FnFactory, ObjectPool, PoolConfiguration};
///
/// let factory = FnFactory::new(|| String::with_capacity(64))
///     .with_validate(|s: &String| s.capacity() >= 64);
///
/// let pool = ObjectPool::new(factory, PoolConfiguration::new().with_max_size(4)).unwrap();
/// let s = pool.borrow_object().unwrap();
/// pool.return_object(s).unwrap();
/// pool.close().unwrap();
/// ```
pub struct FnFactory<T> {
    create: Box<dyn FnMut() -> T + Send>,
    validate: Option<ValidateFn<T>>,
    destroy: Option<DestroyFn<T>>,
}

impl<T> FnFactory<T> {
    pub fn new<C>(create: C) -> Self
    where
        C: FnMut() -> T + Send + 'static,
    {
        Self {
            create: Box::new(create),
            validate: None,
            destroy: None,
        }
    }

    pub fn with_validate<V>(mut self, validate: V) -> Self
    where
        V: FnMut(&T) -> bool + Send + 'static,
    {
        self.validate = Some(Box::new(validate));
        self
    }

    pub fn with_destroy<D>(mut self, destroy: D) -> Self
    where
        D: FnMut(T) + Send + 'static,
    {
        self.destroy = Some(Box::new(destroy));
        self
    }
}

impl<T> ObjectFactory<T> for FnFactory<T> {
    type Error = Infallible;

    fn create(&mut self) -> Result<T, Infallible> {
        Ok((self.create)())
    }

    fn validate(&mut self, obj: &T) -> Result<bool, Infallible> {
        Ok(self.validate.as_mut().is_none_or(|validate| validate(obj)))
    }

    fn destroy(&mut self, obj: T) -> Result<(), Infallible> {
        if let Some(destroy) = self.destroy.as_mut() {
            destroy(obj);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    /// Flags any overlap between two factory calls
    struct Exclusive {
        busy: Arc<AtomicBool>,
        overlaps: Arc<AtomicUsize>,
    }

    impl Exclusive {
        fn enter(&self) {
            if self.busy.swap(true, Ordering::SeqCst) {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            thread::sleep(Duration::from_micros(200));
            self.busy.store(false, Ordering::SeqCst);
        }
    }

    impl ObjectFactory<u32> for Exclusive {
        type Error = Infallible;

        fn create(&mut self) -> Result<u32, Infallible> {
            self.enter();
            Ok(7)
        }

        fn validate(&mut self, _obj: &u32) -> Result<bool, Infallible> {
            self.enter();
            Ok(true)
        }

        fn destroy(&mut self, _obj: u32) -> Result<(), Infallible> {
            self.enter();
            Ok(())
        }
    }

    struct Broken;

    impl ObjectFactory<u32> for Broken {
        type Error = io::Error;

        fn create(&mut self) -> Result<u32, io::Error> {
            Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
        }

        fn validate(&mut self, _obj: &u32) -> Result<bool, io::Error> {
            Err(io::Error::other("health check failed"))
        }

        fn destroy(&mut self, _obj: u32) -> Result<(), io::Error> {
            Err(io::Error::other("close failed"))
        }
    }

    #[test]
    fn test_calls_never_overlap() {
        let overlaps = Arc::new(AtomicUsize::new(0));
        let factory = Arc::new(ThreadSafeFactory::new(Exclusive {
            busy: Arc::new(AtomicBool::new(false)),
            overlaps: Arc::clone(&overlaps),
        }));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let factory = Arc::clone(&factory);
                thread::spawn(move || {
                    for _ in 0..20 {
                        let obj: u32 = factory.create().unwrap();
                        assert!(ConcurrentFactory::validate(&*factory, &obj).unwrap());
                        ConcurrentFactory::destroy(&*factory, obj).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_errors_are_wrapped_per_operation() {
        let factory = ThreadSafeFactory::new(Broken);

        let created: PoolResult<u32> = factory.create();
        assert!(matches!(created, Err(PoolError::Creation { .. })));
        assert!(created.unwrap_err().to_string().contains("refused"));

        assert!(matches!(
            factory.validate(&1),
            Err(PoolError::Validation { .. })
        ));
        assert!(matches!(
            factory.destroy(1),
            Err(PoolError::Destruction { .. })
        ));
    }

    #[test]
    fn test_fn_factory_defaults() {
        let mut factory = FnFactory::new(|| 42);

        assert_eq!(factory.create().unwrap(), 42);
        assert!(ObjectFactory::validate(&mut factory, &42).unwrap());
        assert!(ObjectFactory::destroy(&mut factory, 42).is_ok());
    }

    #[test]
    fn test_fn_factory_custom_hooks() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&destroyed);
        let factory = ThreadSafeFactory::new(
            FnFactory::new(|| 3)
                .with_validate(|x: &i32| *x > 5)
                .with_destroy(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
        );

        let obj: i32 = factory.create().unwrap();
        assert!(!factory.validate(&obj).unwrap());
        factory.destroy(obj).unwrap();
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }
}
