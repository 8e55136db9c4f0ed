//! Managed executor: the shared worker pool handed to every component that
//! runs work off the request path.
//!
//! Wraps a tokio runtime handle plus a semaphore that caps how many
//! submissions run at once (`max_async`). Blocking closures go to tokio's
//! blocking pool, futures to the runtime; both wait for a permit first.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tracing::error;

/// Default concurrency cap, matching the executor definition of the demos.
pub const DEFAULT_MAX_ASYNC: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    #[error("no tokio runtime available")]
    NoRuntime,
    #[error("executor is shut down")]
    Shutdown,
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("task cancelled")]
    Cancelled,
}

impl ExecutorError {
    fn from_join(e: JoinError) -> Self {
        if e.is_panic() {
            let msg = panic_message(e.into_panic());
            error!(panic = %msg, "managed task panicked");
            ExecutorError::Panicked(msg)
        } else {
            ExecutorError::Cancelled
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Cloneable handle to the shared pool. Clones share the same permits.
#[derive(Clone, Debug)]
pub struct ManagedExecutor {
    handle: Handle,
    permits: Arc<Semaphore>,
    max_async: usize,
}

impl ManagedExecutor {
    /// Bind to the runtime the caller is running on.
    pub fn new(max_async: usize) -> Result<Self, ExecutorError> {
        let handle = Handle::try_current().map_err(|_| ExecutorError::NoRuntime)?;
        Ok(Self::with_handle(handle, max_async))
    }

    /// Bind to an explicit runtime handle. A cap of zero is treated as one.
    pub fn with_handle(handle: Handle, max_async: usize) -> Self {
        let max_async = max_async.max(1);
        Self {
            handle,
            permits: Arc::new(Semaphore::new(max_async)),
            max_async,
        }
    }

    pub fn max_async(&self) -> usize {
        self.max_async
    }

    /// Permits not currently held by running submissions.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn is_shutdown(&self) -> bool {
        self.permits.is_closed()
    }

    /// Runtime handle for coordination tasks that must not hold a permit.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Run a blocking closure on the pool once a permit is free.
    pub fn submit<F, T>(&self, work: F) -> JoinHandle<Result<T, ExecutorError>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permits = self.permits.clone();
        self.handle.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| ExecutorError::Shutdown)?;
            tokio::task::spawn_blocking(work)
                .await
                .map_err(ExecutorError::from_join)
        })
    }

    /// Run a future on the runtime once a permit is free.
    pub fn spawn<Fut>(&self, fut: Fut) -> JoinHandle<Result<Fut::Output, ExecutorError>>
    where
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let permits = self.permits.clone();
        let handle = self.handle.clone();
        self.handle.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| ExecutorError::Shutdown)?;
            handle.spawn(fut).await.map_err(ExecutorError::from_join)
        })
    }

    /// Refuse new work. Submissions still waiting for a permit fail with
    /// [`ExecutorError::Shutdown`]; running ones finish normally.
    pub fn shutdown(&self) {
        self.permits.close();
    }
}
