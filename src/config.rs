//! Pool configuration options

use crate::errors::{PoolError, PoolResult};
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for object pool behavior
///
/// # Examples
///
/// ```
/// use blocking_objectpool::PoolConfiguration;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new()
///     .with_min_size(2)
///     .with_max_size(8)
///     .with_timeout(Duration::from_millis(250));
///
/// assert_eq!(config.min_size, 2);
/// assert_eq!(config.max_size, 8);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfiguration {
    /// Number of objects created eagerly when the pool is built
    pub min_size: usize,

    /// Maximum number of idle objects, and of objects the pool keeps alive
    pub max_size: usize,

    /// How long a borrow waits for a returned object once the pool is at capacity
    pub timeout: Duration,

    /// Upper bound on executor threads running creations and destructions
    pub max_blocking_threads: usize,

    /// Name given to the executor threads
    pub thread_name: String,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: 100,
            timeout: Duration::from_secs(30),
            max_blocking_threads: 16,
            thread_name: "objectpool-worker".to_string(),
        }
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of objects to preload
    pub fn with_min_size(mut self, size: usize) -> Self {
        self.min_size = size;
        self
    }

    /// Set the maximum pool size
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set the borrow timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the borrow timeout in milliseconds
    ///
    /// # Examples
    ///
    /// ```
    /// use blocking_objectpool::PoolConfiguration;
    /// use std::time::Duration;
    ///
    /// let config = PoolConfiguration::new().with_timeout_ms(50);
    /// assert_eq!(config.timeout, Duration::from_millis(50));
    /// ```
    pub fn with_timeout_ms(self, millis: u64) -> Self {
        self.with_timeout(Duration::from_millis(millis))
    }

    pub fn with_max_blocking_threads(mut self, threads: usize) -> Self {
        self.max_blocking_threads = threads;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Check the sizes are consistent
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_size == 0 {
            return Err(PoolError::InvalidConfiguration(
                "max_size must be greater than zero".to_string(),
            ));
        }
        if self.min_size > self.max_size {
            return Err(PoolError::InvalidConfiguration(format!(
                "min_size ({}) must not exceed max_size ({})",
                self.min_size, self.max_size
            )));
        }
        if self.max_blocking_threads == 0 {
            return Err(PoolError::InvalidConfiguration(
                "max_blocking_threads must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
