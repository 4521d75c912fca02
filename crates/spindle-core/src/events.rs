// ABOUTME: Notification events emitted by tasks and the task manager
// ABOUTME: EventSink is the fire-and-forget boundary towards UIs and other observers

use crate::aggregator::{ResponseChunk, ResponseCompletion};
use crate::task::{ContextFile, TaskData};
use tokio::sync::mpsc;

/// Everything observers can be told about
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// A task was created (including duplicates and forks)
    TaskCreated(TaskData),
    /// A task and its persisted state were removed
    TaskDeleted { task_id: String },
    /// A task's record changed
    TaskUpdated(TaskData),
    /// The context files attached to a task changed
    ContextFilesUpdated {
        task_id: String,
        files: Vec<ContextFile>,
    },
    /// Throttled partial model output
    ResponseChunk(ResponseChunk),
    /// Final model output for a message
    ResponseCompleted(ResponseCompletion),
}

/// Receives task events. Delivery is fire-and-forget: no acknowledgement.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: TaskEvent);
}

impl EventSink for mpsc::UnboundedSender<TaskEvent> {
    fn emit(&self, event: TaskEvent) {
        if self.send(event).is_err() {
            tracing::debug!("Event channel closed, receiver dropped");
        }
    }
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: TaskEvent) {}
}
