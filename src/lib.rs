//! # Blocking object pool
//!
//! Bounded, thread-safe pool for objects that are expensive to build, such
//! as connections or heavy handles. Construction is paid once and amortized
//! over many borrow/return cycles.
//!
//! ## Features
//!
//! - Preloads `min_size` objects and grows lazily up to `max_size`
//! - Blocking borrow with a timeout once every object is checked out
//! - Cancellable and async borrows
//! - Creation and destruction run on a tokio blocking pool, off the caller's thread
//! - Factories need no locking of their own: every call is serialized
//! - `close()` waits for every destruction and reports failures together
//! - Automatic return of objects via RAII (Drop trait)
//!
//! ## Quick Start
//!
//! ```rust
//! use blocking_objectpool::{FnFactory, ObjectPool, PoolConfiguration};
//!
//! let config = PoolConfiguration::new()
//!     .with_min_size(1)
//!     .with_max_size(4)
//!     .with_timeout_ms(100);
//! let pool = ObjectPool::new(FnFactory::new(|| String::from("conn")), config).unwrap();
//!
//! {
//!     let conn = pool.get_object().unwrap();
//!     println!("Got: {}", *conn);
//!     // Object automatically returned when `conn` goes out of scope
//! }
//!
//! pool.close().unwrap();
//! ```

mod config;
mod disposal;
mod errors;
mod executor;
mod factory;
mod idle;
mod pool;

pub mod demo;

pub use config::PoolConfiguration;
pub use errors::{FactoryError, PoolError, PoolResult};
pub use factory::{ConcurrentFactory, FnFactory, ObjectFactory, ThreadSafeFactory};
pub use pool::{ObjectPool, PooledObject};
pub use tokio_util::sync::CancellationToken;
