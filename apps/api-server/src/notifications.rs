//! `TodoCompleted` notifications: the sender counts successful deliveries,
//! observers run on the managed executor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use concurrency::{EventDispatcher, EventError, ManagedExecutor, Observer, ObserverError};
use domain::TodoCompleted;
use tracing::{info, warn};

/// Logs each completed to-do.
pub struct TodoCompletedHandler;

impl Observer<TodoCompleted> for TodoCompletedHandler {
    fn name(&self) -> &str {
        "todo-completed-handler"
    }

    fn on_event(&self, event: &TodoCompleted) -> Result<(), ObserverError> {
        info!(
            todo_id = %event.todo_id,
            completed_at = %http_common::system_time_to_rfc3339(event.completed_at),
            "handling TodoCompleted event"
        );
        Ok(())
    }
}

#[derive(Clone)]
pub struct NotificationSender {
    dispatcher: EventDispatcher<TodoCompleted>,
    executor: ManagedExecutor,
    sent: Arc<AtomicU64>,
}

impl NotificationSender {
    pub fn new(dispatcher: EventDispatcher<TodoCompleted>, executor: ManagedExecutor) -> Self {
        Self {
            dispatcher,
            executor,
            sent: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of events every observer has handled.
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }

    /// Fire `event` and wait for delivery; the counter only moves on success.
    pub async fn send(&self, event: TodoCompleted) -> Result<TodoCompleted, EventError> {
        info!(todo_id = %event.todo_id, "sending event");
        let delivered = self
            .dispatcher
            .fire_async(event)
            .await
            .map_err(|e| EventError::Interrupted(e.to_string()))??;
        let count = self.sent.fetch_add(1, Ordering::SeqCst) + 1;
        info!(count, todo_id = %delivered.todo_id, "after sent");
        Ok(delivered)
    }

    /// Fire-and-forget variant for request handlers.
    pub fn dispatch(&self, event: TodoCompleted) {
        let sender = self.clone();
        self.executor.handle().spawn(async move {
            if let Err(e) = sender.send(event).await {
                warn!(err = %e, "notification not delivered");
            }
        });
    }
}
