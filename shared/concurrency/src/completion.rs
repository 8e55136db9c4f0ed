//! Async completion: answer a caller exactly once, with the work's result, a
//! failure, or a timeout, whichever happens first.
//!
//! [`suspend`] splits a pending answer into two halves:
//! - [`AsyncResponse`], the sink handed to whoever produces the result. It
//!   can be cloned; the first `resume*` call wins and later calls return
//!   `false` without touching the delivered outcome.
//! - [`Suspended`], awaited by the caller. With a bound, an expiring timer
//!   competes for the same slot, so a late result is discarded and an early
//!   result is never replaced by a timeout.
//!
//! [`complete_blocking`] and [`complete_async`] wire both halves to a
//! [`ManagedExecutor`]; the work runs on the pool, never on the waiting task.

use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::executor::ManagedExecutor;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompletionError<E> {
    /// The bound elapsed before the work produced a result.
    #[error("operation timed out after {0:?}")]
    TimedOut(Duration),
    /// The work itself failed; the cause is carried unchanged.
    #[error("work failed: {0}")]
    Work(E),
    /// The work went away without answering (panic, executor shutdown).
    #[error("interrupted while waiting: {0}")]
    Interrupted(String),
}

impl<E> CompletionError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CompletionError::TimedOut(_))
    }
}

pub type Outcome<T, E> = Result<T, CompletionError<E>>;

struct Slot<T, E> {
    sender: Mutex<Option<oneshot::Sender<Outcome<T, E>>>>,
}

impl<T, E> Slot<T, E> {
    fn take_sender(&self) -> Option<oneshot::Sender<Outcome<T, E>>> {
        match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// First caller wins; everyone after gets `false`.
    fn resolve(&self, outcome: Outcome<T, E>) -> bool {
        match self.take_sender() {
            Some(tx) => {
                // A dropped receiver means the caller went away; the slot is
                // resolved all the same.
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    fn is_resolved(&self) -> bool {
        match self.sender.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}

/// Producer side of a suspended answer.
pub struct AsyncResponse<T, E> {
    slot: Arc<Slot<T, E>>,
}

impl<T, E> Clone for AsyncResponse<T, E> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T, E> AsyncResponse<T, E> {
    /// Deliver the work's result. Returns `false` if the answer was already
    /// given (by another handle or by the timer).
    pub fn resume(&self, result: Result<T, E>) -> bool {
        self.slot.resolve(result.map_err(CompletionError::Work))
    }

    pub fn resume_ok(&self, value: T) -> bool {
        self.slot.resolve(Ok(value))
    }

    pub fn resume_err(&self, err: E) -> bool {
        self.slot.resolve(Err(CompletionError::Work(err)))
    }

    /// Answer with an interruption, e.g. when the work could not be run.
    pub fn interrupt<S: Into<String>>(&self, reason: S) -> bool {
        self.slot.resolve(Err(CompletionError::Interrupted(reason.into())))
    }

    pub fn is_done(&self) -> bool {
        self.slot.is_resolved()
    }
}

/// Caller side of a suspended answer.
pub struct Suspended<T, E> {
    rx: oneshot::Receiver<Outcome<T, E>>,
    // Weak so that dropping every AsyncResponse closes the channel.
    slot: Weak<Slot<T, E>>,
    timeout: Option<Duration>,
}

/// Create a pending answer bounded by `timeout` (`None` waits indefinitely).
pub fn suspend<T, E>(timeout: Option<Duration>) -> (AsyncResponse<T, E>, Suspended<T, E>) {
    let (tx, rx) = oneshot::channel();
    let slot = Arc::new(Slot {
        sender: Mutex::new(Some(tx)),
    });
    let suspended = Suspended {
        rx,
        slot: Arc::downgrade(&slot),
        timeout,
    };
    (AsyncResponse { slot }, suspended)
}

impl<T, E> Suspended<T, E> {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Wait for the single terminal outcome.
    pub async fn wait(self) -> Outcome<T, E> {
        let Suspended {
            mut rx,
            slot,
            timeout,
        } = self;

        let Some(limit) = timeout else {
            return settle(rx.await);
        };

        match tokio::time::timeout(limit, &mut rx).await {
            Ok(received) => settle(received),
            Err(_) => {
                if let Some(slot) = slot.upgrade() {
                    if slot.resolve(Err(CompletionError::TimedOut(limit))) {
                        warn!(timeout_ms = limit.as_millis() as u64, "async completion timed out");
                    }
                }
                // Whichever resolution won is now in the channel.
                settle(rx.await)
            }
        }
    }
}

fn settle<T, E>(received: Result<Outcome<T, E>, oneshot::error::RecvError>) -> Outcome<T, E> {
    received.unwrap_or_else(|_| {
        error!("async completion abandoned without a result");
        Err(CompletionError::Interrupted(
            "work ended without a result".into(),
        ))
    })
}

/// Run a blocking unit of work on `executor` and wait for it through a
/// suspended answer bounded by `timeout`.
pub async fn complete_blocking<T, E, F>(
    executor: &ManagedExecutor,
    timeout: Option<Duration>,
    work: F,
) -> Outcome<T, E>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let (response, suspended) = suspend(timeout);
    let watcher = response.clone();
    let task = executor.submit(move || {
        if !response.resume(work()) {
            debug!("late result discarded, caller already answered");
        }
    });
    watch(executor, task, watcher);
    suspended.wait().await
}

/// Same as [`complete_blocking`] for work that is already a future.
pub async fn complete_async<T, E, Fut>(
    executor: &ManagedExecutor,
    timeout: Option<Duration>,
    work: Fut,
) -> Outcome<T, E>
where
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let (response, suspended) = suspend(timeout);
    let watcher = response.clone();
    let task = executor.spawn(async move {
        let result = work.await;
        if !response.resume(result) {
            debug!("late result discarded, caller already answered");
        }
    });
    watch(executor, task, watcher);
    suspended.wait().await
}

// Turns executor failures (shutdown, panic) into an interruption so the
// caller gets the cause instead of a bare closed channel.
fn watch<T, E>(
    executor: &ManagedExecutor,
    task: tokio::task::JoinHandle<Result<(), crate::executor::ExecutorError>>,
    watcher: AsyncResponse<T, E>,
) where
    T: Send + 'static,
    E: Send + 'static,
{
    executor.handle().spawn(async move {
        let failure = match task.await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(e) => e.to_string(),
        };
        if watcher.interrupt(failure.clone()) {
            error!(err = %failure, "async work interrupted");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn resume_delivers_value() {
        let (response, suspended) = suspend::<u32, String>(None);
        assert!(response.resume_ok(7));
        assert_eq!(suspended.wait().await, Ok(7));
        assert!(response.is_done());
    }

    #[tokio::test]
    async fn second_resolution_is_ignored() {
        let (response, suspended) = suspend::<u32, String>(Some(Duration::from_secs(5)));
        let other = response.clone();
        assert!(response.resume_ok(1));
        assert!(!other.resume_ok(2));
        assert!(!other.resume_err("late".into()));
        assert_eq!(suspended.wait().await, Ok(1));
    }

    #[tokio::test]
    async fn timeout_wins_and_late_result_is_discarded() {
        let (response, suspended) = suspend::<u32, String>(Some(Duration::from_millis(50)));
        let out = suspended.wait().await;
        assert_eq!(out, Err(CompletionError::TimedOut(Duration::from_millis(50))));
        assert!(response.is_done());
        assert!(!response.resume_ok(99));
    }

    #[tokio::test]
    async fn work_error_is_propagated_as_is() {
        let (response, suspended) = suspend::<u32, String>(Some(Duration::from_secs(5)));
        assert!(response.resume_err("db down".into()));
        assert_eq!(
            suspended.wait().await,
            Err(CompletionError::Work("db down".to_string()))
        );
    }

    #[tokio::test]
    async fn dropping_every_sink_interrupts_the_wait() {
        let (response, suspended) = suspend::<u32, String>(None);
        drop(response);
        assert!(matches!(
            suspended.wait().await,
            Err(CompletionError::Interrupted(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn work_within_bound_returns_result() {
        let exec = ManagedExecutor::new(5).unwrap();
        let out: Outcome<&str, String> =
            complete_blocking(&exec, Some(Duration::from_millis(1000)), || {
                std::thread::sleep(Duration::from_millis(500));
                Ok("asynchronous resource")
            })
            .await;
        assert_eq!(out, Ok("asynchronous resource"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn work_past_bound_times_out_once() {
        let exec = ManagedExecutor::new(5).unwrap();
        let started = Instant::now();
        let out: Outcome<&str, String> =
            complete_blocking(&exec, Some(Duration::from_millis(1000)), || {
                std::thread::sleep(Duration::from_millis(1300));
                Ok("too late")
            })
            .await;
        assert!(out.as_ref().unwrap_err().is_timeout());
        assert!(started.elapsed() < Duration::from_millis(1300));

        // Let the work finish; its result must not surface anywhere.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(exec.available(), 5);
    }

    #[tokio::test]
    async fn async_work_error_reaches_caller() {
        let exec = ManagedExecutor::new(1).unwrap();
        let out: Outcome<(), String> =
            complete_async(&exec, None, async { Err("no rows".to_string()) }).await;
        assert_eq!(out, Err(CompletionError::Work("no rows".to_string())));
    }

    #[tokio::test]
    async fn panicking_work_is_interrupted() {
        let exec = ManagedExecutor::new(1).unwrap();
        let out: Outcome<u8, String> = complete_blocking(&exec, None, || panic!("boom")).await;
        assert!(matches!(out, Err(CompletionError::Interrupted(_))));
    }

    #[tokio::test]
    async fn shut_down_executor_interrupts() {
        let exec = ManagedExecutor::new(1).unwrap();
        exec.shutdown();
        let out: Outcome<u8, String> = complete_blocking(&exec, None, || Ok(1)).await;
        assert!(matches!(out, Err(CompletionError::Interrupted(_))));
    }
}
