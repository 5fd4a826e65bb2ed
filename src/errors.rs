//! Error types for the object pool

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Underlying cause reported by a factory.
///
/// Shared so that [`PoolError`] stays cheap to clone.
pub type FactoryError = Arc<dyn StdError + Send + Sync + 'static>;

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("failed to create object: {source}")]
    Creation { source: FactoryError },

    #[error("failed to validate object: {source}")]
    Validation { source: FactoryError },

    #[error("failed to destroy object: {source}")]
    Destruction { source: FactoryError },

    #[error("no object became available within {0:?}")]
    BorrowTimeout(Duration),

    #[error("borrow was interrupted while waiting for an object")]
    BorrowInterrupted,

    #[error("failed to close pool: {} object(s) could not be destroyed", .failures.len())]
    Closure { failures: Vec<PoolError> },

    #[error("pool is closed")]
    Closed,

    #[error("invalid pool configuration: {0}")]
    InvalidConfiguration(String),

    #[error("failed to start pool executor: {0}")]
    Executor(String),
}

impl PoolError {
    pub fn creation(cause: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        PoolError::Creation { source: shared(cause) }
    }

    pub fn validation(cause: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        PoolError::Validation { source: shared(cause) }
    }

    pub fn destruction(cause: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        PoolError::Destruction { source: shared(cause) }
    }

    /// Whether the error was produced by a borrow that ran out of time
    pub fn is_timeout(&self) -> bool {
        matches!(self, PoolError::BorrowTimeout(_))
    }

    /// Destruction failures aggregated by a failed close
    pub fn closure_failures(&self) -> &[PoolError] {
        match self {
            PoolError::Closure { failures } => failures,
            _ => &[],
        }
    }
}

fn shared(cause: impl Into<Box<dyn StdError + Send + Sync>>) -> FactoryError {
    let boxed: Box<dyn StdError + Send + Sync> = cause.into();
    Arc::from(boxed)
}

pub type PoolResult<T> = Result<T, PoolError>;
