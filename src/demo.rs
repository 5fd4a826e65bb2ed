//! Demonstration object and factory used by the binary, benches and tests

use crate::factory::ObjectFactory;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Stand-in for a connection or other handle that is slow to build
#[derive(Debug)]
pub struct ExpensiveResource {
    id: usize,
    valid: bool,
    created_at: Instant,
}

impl ExpensiveResource {
    /// Build a resource, sleeping for `cost` to simulate the setup work
    pub fn new(id: usize, cost: Duration) -> Self {
        if !cost.is_zero() {
            thread::sleep(cost);
        }
        Self {
            id,
            valid: true,
            created_at: Instant::now(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Mark the resource broken, as a dropped connection would be
    pub fn invalidate(&mut self) {
        self.valid = false;
    }
}

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("resource {0} could not be created")]
    Unavailable(usize),
}

/// Call counts shared between a factory and whoever observes it
#[derive(Debug, Default)]
pub struct FactoryCounters {
    created: AtomicUsize,
    destroyed: AtomicUsize,
    validated: AtomicUsize,
}

impl FactoryCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn validated(&self) -> usize {
        self.validated.load(Ordering::SeqCst)
    }

    /// Objects created and not destroyed yet
    pub fn alive(&self) -> usize {
        self.created().saturating_sub(self.destroyed())
    }
}

/// Factory for [`ExpensiveResource`]
///
/// # Examples
///
/// ```
/// use blocking_objectpool::demo::{FactoryCounters, ResourceFactory};
/// use blocking_objectpool::{ObjectPool, PoolConfiguration};
/// use std::time::Duration;
///
/// let counters = FactoryCounters::new();
/// let factory = ResourceFactory::new(counters.clone(), Duration::from_millis(1));
/// let config = PoolConfiguration::new().with_min_size(3).with_max_size(5);
/// let pool = ObjectPool::new(factory, config).unwrap();
///
/// assert_eq!(counters.created(), 3);
/// pool.close().unwrap();
/// assert_eq!(counters.destroyed(), 3);
/// ```
#[derive(Debug)]
pub struct ResourceFactory {
    counters: Arc<FactoryCounters>,
    cost: Duration,
    next_id: usize,
    fail_after: Option<usize>,
}

impl ResourceFactory {
    pub fn new(counters: Arc<FactoryCounters>, cost: Duration) -> Self {
        Self {
            counters,
            cost,
            next_id: 0,
            fail_after: None,
        }
    }

    /// Refuse every creation once `count` resources were built
    pub fn failing_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }
}

impl ObjectFactory<ExpensiveResource> for ResourceFactory {
    type Error = ResourceError;

    fn create(&mut self) -> Result<ExpensiveResource, ResourceError> {
        let id = self.next_id;
        if self.fail_after.is_some_and(|limit| id >= limit) {
            return Err(ResourceError::Unavailable(id));
        }
        self.next_id += 1;
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Ok(ExpensiveResource::new(id, self.cost))
    }

    fn validate(&mut self, obj: &ExpensiveResource) -> Result<bool, ResourceError> {
        self.counters.validated.fetch_add(1, Ordering::SeqCst);
        Ok(obj.is_valid())
    }

    fn destroy(&mut self, obj: ExpensiveResource) -> Result<(), ResourceError> {
        self.counters.destroyed.fetch_add(1, Ordering::SeqCst);
        drop(obj);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_counts_calls() {
        let counters = FactoryCounters::new();
        let mut factory = ResourceFactory::new(Arc::clone(&counters), Duration::ZERO);

        let mut first = factory.create().unwrap();
        let second = factory.create().unwrap();
        assert_eq!((first.id(), second.id()), (0, 1));

        first.invalidate();
        assert!(!factory.validate(&first).unwrap());
        assert!(factory.validate(&second).unwrap());
        factory.destroy(first).unwrap();

        assert_eq!(counters.created(), 2);
        assert_eq!(counters.validated(), 2);
        assert_eq!(counters.destroyed(), 1);
        assert_eq!(counters.alive(), 1);
    }

    #[test]
    fn test_factory_fails_after_limit() {
        let counters = FactoryCounters::new();
        let mut factory =
            ResourceFactory::new(Arc::clone(&counters), Duration::ZERO).failing_after(1);

        assert!(factory.create().is_ok());
        let err = factory.create().unwrap_err();

        assert_eq!(err.to_string(), "resource 1 could not be created");
        assert_eq!(counters.created(), 1);
    }

    #[test]
    fn test_creation_cost_is_paid() {
        let start = Instant::now();
        let resource = ExpensiveResource::new(0, Duration::from_millis(5));

        assert!(start.elapsed() >= Duration::from_millis(5));
        assert!(resource.created_at() >= start);
    }
}
