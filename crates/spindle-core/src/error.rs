// ABOUTME: Error types for spindle-core
// ABOUTME: CoreError covers missing messages/tasks and propagated storage failures

use thiserror::Error;

/// Errors raised by the message store, task entity and task manager
#[derive(Debug, Error)]
pub enum CoreError {
    /// Neither a message nor a tool call matched the id
    #[error("Message or tool call with id {0} not found")]
    MessageNotFound(String),

    #[error("Task with id {0} not found")]
    TaskNotFound(String),

    /// Task creation referenced a parent that does not exist
    #[error("Parent task with id {0} not found")]
    ParentNotFound(String),

    /// Failure reported by a persistence or environment collaborator
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl CoreError {
    /// True for every "referenced id does not exist" error, parent lookups included
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CoreError::MessageNotFound(_)
                | CoreError::TaskNotFound(_)
                | CoreError::ParentNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
