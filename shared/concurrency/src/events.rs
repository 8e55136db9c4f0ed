//! Asynchronous event dispatch.
//!
//! An [`EventDispatcher`] owns its observers explicitly. `fire_async` returns
//! at once; observers run on the [`ManagedExecutor`] and the returned handle
//! completes with the event after all of them ran, or with an [`EventError`].

use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

use crate::executor::{ExecutorError, ManagedExecutor};

/// Default bound on one notification (all observers of one event).
pub const DEFAULT_NOTIFICATION_TIMEOUT: Duration = Duration::from_millis(1000);

pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

/// Receives events of type `E`. Runs on the executor's blocking pool.
pub trait Observer<E>: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn on_event(&self, event: &E) -> Result<(), ObserverError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotificationMode {
    /// Observers run one after another, in registration order.
    #[default]
    Serial,
    /// Observers run concurrently.
    Parallel,
}

impl NotificationMode {
    pub fn from_str(s: &str) -> Self {
        if s.eq_ignore_ascii_case("parallel") {
            Self::Parallel
        } else {
            Self::Serial
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error("notification timed out after {0:?}")]
    TimedOut(Duration),
    #[error("observer {observer} failed: {message}")]
    ObserverFailed { observer: String, message: String },
    #[error("notification interrupted: {0}")]
    Interrupted(String),
}

impl From<ExecutorError> for EventError {
    fn from(e: ExecutorError) -> Self {
        EventError::Interrupted(e.to_string())
    }
}

pub struct EventDispatcher<E> {
    observers: Vec<Arc<dyn Observer<E>>>,
    executor: ManagedExecutor,
    mode: NotificationMode,
    timeout: Duration,
}

impl<E> Clone for EventDispatcher<E> {
    fn clone(&self) -> Self {
        Self {
            observers: self.observers.clone(),
            executor: self.executor.clone(),
            mode: self.mode,
            timeout: self.timeout,
        }
    }
}

impl<E> EventDispatcher<E>
where
    E: Clone + Send + Sync + 'static,
{
    pub fn new(executor: ManagedExecutor) -> Self {
        Self {
            observers: Vec::new(),
            executor,
            mode: NotificationMode::default(),
            timeout: DEFAULT_NOTIFICATION_TIMEOUT,
        }
    }

    pub fn observe<O: Observer<E>>(mut self, observer: O) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    pub fn mode(mut self, mode: NotificationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn notification_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Notify every observer without blocking the caller.
    pub fn fire_async(&self, event: E) -> JoinHandle<Result<E, EventError>> {
        let observers = self.observers.clone();
        let executor = self.executor.clone();
        let mode = self.mode;
        let limit = self.timeout;
        // The coordinating task holds no permit; only observer work does.
        self.executor.handle().spawn(async move {
            let event = Arc::new(event);
            let notify = notify_all(&executor, mode, observers, event.clone());
            match tokio::time::timeout(limit, notify).await {
                Ok(Ok(())) => {
                    debug!(mode = ?mode, "event delivered");
                    Ok(Arc::try_unwrap(event).unwrap_or_else(|shared| (*shared).clone()))
                }
                Ok(Err(e)) => {
                    warn!(err = %e, "event delivery failed");
                    Err(e)
                }
                Err(_) => {
                    warn!(timeout_ms = limit.as_millis() as u64, "event delivery timed out");
                    Err(EventError::TimedOut(limit))
                }
            }
        })
    }
}

async fn notify_all<E>(
    executor: &ManagedExecutor,
    mode: NotificationMode,
    observers: Vec<Arc<dyn Observer<E>>>,
    event: Arc<E>,
) -> Result<(), EventError>
where
    E: Send + Sync + 'static,
{
    match mode {
        NotificationMode::Serial => {
            for observer in observers {
                notify_one(executor, observer, event.clone()).await?;
            }
            Ok(())
        }
        NotificationMode::Parallel => {
            let mut set = JoinSet::new();
            for observer in observers {
                let executor = executor.clone();
                let event = event.clone();
                set.spawn(async move { notify_one(&executor, observer, event).await });
            }
            while let Some(joined) = set.join_next().await {
                joined.map_err(|e| EventError::Interrupted(e.to_string()))??;
            }
            Ok(())
        }
    }
}

async fn notify_one<E>(
    executor: &ManagedExecutor,
    observer: Arc<dyn Observer<E>>,
    event: Arc<E>,
) -> Result<(), EventError>
where
    E: Send + Sync + 'static,
{
    let task = executor.submit(move || {
        observer
            .on_event(&event)
            .map_err(|e| EventError::ObserverFailed {
                observer: observer.name().to_string(),
                message: e.to_string(),
            })
    });
    task.await
        .map_err(|e| EventError::Interrupted(e.to_string()))??
}
