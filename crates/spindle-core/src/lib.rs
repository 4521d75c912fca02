// ABOUTME: Core library for spindle - messages, streaming, tasks and their hierarchy
// ABOUTME: Shared between the spindle CLI and any embedding application

pub mod aggregator;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod message;
pub mod message_store;
pub mod project;
pub mod store;
pub mod task;

pub use aggregator::{
    ChunkAggregator, ChunkMetadata, CompletionDetails, ResponseChunk, ResponseCompletion,
    UsageReport,
};
pub use config::Config;
pub use error::{CoreError, Result};
pub use events::{EventSink, NoopSink, TaskEvent};
pub use manager::{CreateTaskParams, ManagerOptions, TaskHandle, TaskManager};
pub use message::{ContentPart, Message, MessageContent, Role};
pub use message_store::MessageStore;
pub use project::{LocalProject, ProjectEnvironment};
pub use store::{MemoryTaskStore, SqliteTaskStore, TaskStore};
pub use task::{
    ContextFile, EditMode, ModelSelection, SettingsOverride, Task, TaskData, TaskSettings,
    TaskUpdate, WorkingMode, Worktree, INTERNAL_TASK_ID,
};

/// Make an id safe to use as a single path component
pub(crate) fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
