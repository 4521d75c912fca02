// ABOUTME: Task entity - the persisted task record plus its message store and chunk aggregator
// ABOUTME: Glue between streamed model output, the message history and persistence

use crate::aggregator::{ChunkAggregator, ChunkMetadata, CompletionDetails};
use crate::error::Result;
use crate::events::{EventSink, TaskEvent};
use crate::message::{ContentPart, Message, MessageContent, Role};
use crate::message_store::MessageStore;
use crate::store::TaskStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Reserved, non-listable task holding project-wide default context
pub const INTERNAL_TASK_ID: &str = "internal";

/// Current task record schema version
pub const TASK_RECORD_VERSION: u32 = 1;

/// Where a task's agent edits files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkingMode {
    /// Directly in the project directory
    #[default]
    Local,
    /// In a dedicated worktree
    Worktree,
}

/// How the agent treats prompts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditMode {
    #[default]
    Code,
    Ask,
    Architect,
    Agent,
}

/// Provider plus model name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelection {
    pub provider: String,
    pub model: String,
}

impl ModelSelection {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }

    /// Parse "provider/model"; a bare name gets an empty provider
    pub fn parse(value: &str) -> Self {
        match value.split_once('/') {
            Some((provider, model)) => Self::new(provider.trim(), model.trim()),
            None => Self::new("", value.trim()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.model.is_empty()
    }
}

impl fmt::Display for ModelSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.provider.is_empty() {
            write!(f, "{}", self.model)
        } else {
            write!(f, "{}/{}", self.provider, self.model)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_tokens: Option<u32>,
}

/// Worktree a task is bound to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Worktree {
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_branch: Option<String>,
}

/// File attached to a task's context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextFile {
    pub path: String,
    #[serde(default)]
    pub read_only: bool,
}

/// Settings copied from the inheritance source when a task is created
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaskSettings {
    pub model: ModelSelection,
    pub reasoning: ReasoningSettings,
    /// Context usage percentage that triggers compaction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_compaction_threshold: Option<u8>,
    pub edit_mode: EditMode,
    pub auto_approve: bool,
}

/// The persisted task record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskData {
    #[serde(default = "default_version")]
    pub version: u32,
    pub id: String,
    #[serde(
        default,
        deserialize_with = "deserialize_parent_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub archived: bool,
    /// Free-form workflow label (TODO, IN_PROGRESS, DONE, ...)
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub settings: TaskSettings,
    #[serde(default)]
    pub working_mode: WorkingMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree: Option<Worktree>,
    #[serde(default)]
    pub context_files: Vec<ContextFile>,
}

fn default_version() -> u32 {
    TASK_RECORD_VERSION
}

/// Older records store a root task's parent as "" rather than null
fn deserialize_parent_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|id| !id.is_empty()))
}

impl TaskData {
    pub fn new(id: impl Into<String>, parent_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            version: TASK_RECORD_VERSION,
            id: id.into(),
            parent_id,
            name: String::new(),
            created_at: now,
            updated_at: Some(now),
            archived: false,
            state: String::new(),
            settings: TaskSettings::default(),
            working_mode: WorkingMode::Local,
            worktree: None,
            context_files: Vec::new(),
        }
    }

    /// Record for the reserved internal task
    pub fn internal() -> Self {
        let mut data = Self::new(INTERNAL_TASK_ID, None);
        data.name = "Internal".to_string();
        data.updated_at = None;
        data
    }

    pub fn is_internal(&self) -> bool {
        self.id == INTERNAL_TASK_ID
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Explicit setting values; `None` leaves the current value alone
#[derive(Debug, Clone, Default)]
pub struct SettingsOverride {
    pub model: Option<ModelSelection>,
    pub reasoning: Option<ReasoningSettings>,
    pub context_compaction_threshold: Option<u8>,
    pub edit_mode: Option<EditMode>,
    pub auto_approve: Option<bool>,
    pub working_mode: Option<WorkingMode>,
    pub worktree: Option<Worktree>,
}

impl SettingsOverride {
    pub fn apply(self, data: &mut TaskData) {
        if let Some(model) = self.model {
            data.settings.model = model;
        }
        if let Some(reasoning) = self.reasoning {
            data.settings.reasoning = reasoning;
        }
        if let Some(threshold) = self.context_compaction_threshold {
            data.settings.context_compaction_threshold = Some(threshold);
        }
        if let Some(edit_mode) = self.edit_mode {
            data.settings.edit_mode = edit_mode;
        }
        if let Some(auto_approve) = self.auto_approve {
            data.settings.auto_approve = auto_approve;
        }
        if let Some(working_mode) = self.working_mode {
            data.working_mode = working_mode;
        }
        if let Some(worktree) = self.worktree {
            data.worktree = Some(worktree);
        }
    }
}

/// Changes applied to an existing task
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub state: Option<String>,
    pub archived: Option<bool>,
    pub settings: SettingsOverride,
}

/// One agent working context: record, history and output throttle
pub struct Task {
    data: TaskData,
    messages: MessageStore,
    aggregator: ChunkAggregator,
    store: Arc<dyn TaskStore>,
    events: Arc<dyn EventSink>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("data", &self.data)
            .field("messages", &self.messages)
            .finish()
    }
}

impl Task {
    pub fn new(
        data: TaskData,
        messages: Vec<Message>,
        store: Arc<dyn TaskStore>,
        events: Arc<dyn EventSink>,
        flush_interval: Duration,
    ) -> Self {
        let aggregator = ChunkAggregator::new(data.id.clone(), flush_interval, events.clone());
        Self {
            data,
            messages: MessageStore::from_messages(messages),
            aggregator,
            store,
            events,
        }
    }

    pub fn id(&self) -> &str {
        &self.data.id
    }

    pub fn data(&self) -> &TaskData {
        &self.data
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    pub fn aggregator(&self) -> &ChunkAggregator {
        &self.aggregator
    }

    pub fn context_files(&self) -> &[ContextFile] {
        &self.data.context_files
    }

    /// Persist the message list in the background after every history change
    pub fn enable_autosave(&mut self) {
        let store = self.store.clone();
        let task_id = self.data.id.clone();
        self.messages.enable_autosave(Arc::new(move |messages: &[Message]| {
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                tracing::warn!(task_id = %task_id, "No runtime available, skipping autosave");
                return;
            };
            let store = store.clone();
            let task_id = task_id.clone();
            let messages = messages.to_vec();
            runtime.spawn(async move {
                if let Err(e) = store.save_messages(&task_id, &messages).await {
                    tracing::warn!(task_id = %task_id, error = %e, "Failed to autosave messages");
                }
            });
        }));
    }

    pub fn append_message(&mut self, message: Message) {
        self.messages.append_message(message);
        self.touch();
    }

    /// Cascade-safe removal of a message or tool call
    pub fn remove_message(&mut self, id: &str) -> Result<Vec<String>> {
        let removed = self.messages.remove_message_by_id(id)?;
        self.touch();
        Ok(removed)
    }

    pub fn edit_message_text(&mut self, id: &str, text: &str) -> Result<bool> {
        let retained = self.messages.edit_message_text(id, text)?;
        self.touch();
        Ok(retained)
    }

    /// Drop the last prompt and its answers so it can be sent again
    pub fn redo_last_user_prompt(&mut self) -> Option<String> {
        let prompt = self.messages.pop_last_user_prompt()?;
        self.touch();
        Some(prompt)
    }

    /// Feed a fragment of streamed model output into the throttle
    pub fn process_response_chunk(&self, message_id: &str, chunk: &str, metadata: ChunkMetadata) {
        self.aggregator.push_chunk(message_id, chunk, metadata);
    }

    /// Finish a streamed response and record it in the history.
    ///
    /// Returns false if the response was already completed or the task is closed.
    pub fn complete_response(
        &mut self,
        message_id: &str,
        content: &str,
        details: CompletionDetails,
    ) -> bool {
        if !self.aggregator.finish(message_id, content, details) {
            return false;
        }
        if !content.is_empty() {
            self.append_message(Message::with_id(
                message_id,
                Role::Assistant,
                MessageContent::Parts(vec![ContentPart::text(content)]),
            ));
        }
        true
    }

    /// Apply an update, persist the record and notify observers
    pub async fn update(&mut self, update: TaskUpdate) -> Result<TaskData> {
        if let Some(name) = update.name {
            self.data.name = name;
        }
        if let Some(state) = update.state {
            self.data.state = state;
        }
        if let Some(archived) = update.archived {
            self.data.archived = archived;
        }
        update.settings.apply(&mut self.data);
        self.touch();

        self.store.save_task(&self.data).await?;
        self.events.emit(TaskEvent::TaskUpdated(self.data.clone()));
        Ok(self.data.clone())
    }

    /// Attach a file; re-adding a path updates its read-only flag
    pub async fn add_context_file(&mut self, file: ContextFile) -> Result<()> {
        match self
            .data
            .context_files
            .iter_mut()
            .find(|f| f.path == file.path)
        {
            Some(existing) => existing.read_only = file.read_only,
            None => self.data.context_files.push(file),
        }
        self.context_files_changed().await
    }

    /// Detach a file. Returns false if it was not attached.
    pub async fn drop_context_file(&mut self, path: &str) -> Result<bool> {
        let before = self.data.context_files.len();
        self.data.context_files.retain(|f| f.path != path);
        if self.data.context_files.len() == before {
            return Ok(false);
        }
        self.context_files_changed().await?;
        Ok(true)
    }

    /// Write the record and the full history
    pub async fn save(&self) -> Result<()> {
        self.store.save_task(&self.data).await?;
        self.store
            .save_messages(&self.data.id, self.messages.get_messages())
            .await?;
        Ok(())
    }

    /// Release runtime resources. Idempotent.
    pub fn close(&mut self) {
        self.aggregator.shutdown();
        self.messages.disable_autosave();
    }

    async fn context_files_changed(&mut self) -> Result<()> {
        self.touch();
        self.store.save_task(&self.data).await?;
        self.events.emit(TaskEvent::ContextFilesUpdated {
            task_id: self.data.id.clone(),
            files: self.data.context_files.clone(),
        });
        Ok(())
    }

    fn touch(&mut self) {
        self.data.updated_at = Some(Utc::now());
    }
}
