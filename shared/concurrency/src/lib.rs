//! Concurrency building blocks shared by the server: a managed executor,
//! single-resolution async completion with timeouts, and async event
//! dispatch. None of these create threads of their own; everything runs on
//! the tokio runtime behind [`ManagedExecutor`].

pub mod completion;
pub mod events;
pub mod executor;

pub use completion::{
    complete_async, complete_blocking, suspend, AsyncResponse, CompletionError, Outcome,
    Suspended,
};
pub use events::{EventDispatcher, EventError, NotificationMode, Observer, ObserverError};
pub use executor::{ExecutorError, ManagedExecutor, DEFAULT_MAX_ASYNC};
