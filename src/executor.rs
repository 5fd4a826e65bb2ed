//! Task executor running creations and destructions off the caller's thread

use crate::config::PoolConfiguration;
use crate::errors::{PoolError, PoolResult};

use tokio::runtime::{Builder, Handle, Runtime};
use tracing::debug;

/// Blocking task pool backed by a tokio runtime.
///
/// Either owns a small runtime dedicated to the pool or borrows a handle
/// from the embedding application.
pub(crate) struct Executor {
    handle: Handle,
    runtime: Option<Runtime>,
}

impl Executor {
    /// Start a runtime owned by the pool
    pub fn owned(config: &PoolConfiguration) -> PoolResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.max_blocking_threads)
            .thread_name(config.thread_name.clone())
            .build()
            .map_err(|e| PoolError::Executor(e.to_string()))?;

        debug!(
            max_blocking_threads = config.max_blocking_threads,
            thread_name = %config.thread_name,
            "Started pool executor"
        );

        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
        })
    }

    /// Run on a runtime owned by the caller
    pub fn shared(handle: Handle) -> Self {
        Self {
            handle,
            runtime: None,
        }
    }

    /// Fire a blocking job; its completion is reported by the job itself
    pub fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        drop(self.handle.spawn_blocking(job));
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            // does not wait and is safe from async contexts
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_owned_runtime_runs_jobs_off_thread() {
        let executor = Executor::owned(&PoolConfiguration::default()).unwrap();
        let (tx, rx) = channel::bounded(1);
        let caller = thread::current().id();

        executor.spawn(move || {
            let _ = tx.send(thread::current().id());
        });

        let worker = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(worker, caller);
    }

    #[test]
    fn test_owned_runtime_uses_configured_name() {
        let config = PoolConfiguration::new().with_thread_name("custom-pool");
        let executor = Executor::owned(&config).unwrap();
        let (tx, rx) = channel::bounded(1);

        executor.spawn(move || {
            let _ = tx.send(thread::current().name().map(str::to_string));
        });

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("custom-pool"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shared_handle_can_be_dropped_in_async_context() {
        let executor = Executor::shared(Handle::current());
        let (tx, rx) = tokio::sync::oneshot::channel();

        executor.spawn(move || {
            let _ = tx.send(5);
        });

        assert_eq!(rx.await.unwrap(), 5);
        drop(executor);
    }

    #[tokio::test]
    async fn test_owned_runtime_can_be_dropped_in_async_context() {
        let executor = Executor::owned(&PoolConfiguration::default()).unwrap();
        drop(executor);
    }
}
