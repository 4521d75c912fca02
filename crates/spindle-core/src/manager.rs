// ABOUTME: Task hierarchy manager - the single authority for one project's task lifecycle
// ABOUTME: Creation with inheritance, cascading deletion, duplication and forking

use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::events::{EventSink, TaskEvent};
use crate::message::Message;
use crate::project::ProjectEnvironment;
use crate::store::TaskStore;
use crate::task::{
    ContextFile, INTERNAL_TASK_ID, SettingsOverride, Task, TaskData, TaskSettings, TaskUpdate,
    WorkingMode,
};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell, RwLock};
use uuid::Uuid;

/// Shared, lockable task entity
pub type TaskHandle = Arc<Mutex<Task>>;

/// Behaviour knobs for a manager, usually derived from `Config`
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub flush_interval: Duration,
    /// Force auto-approve on for every new task
    pub auto_approve_locked: bool,
    /// Compaction threshold for tasks built from defaults
    pub default_compaction_threshold: Option<u8>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            flush_interval: crate::aggregator::DEFAULT_FLUSH_INTERVAL,
            auto_approve_locked: false,
            default_compaction_threshold: None,
        }
    }
}

impl From<&Config> for ManagerOptions {
    fn from(config: &Config) -> Self {
        Self {
            flush_interval: config.flush_interval(),
            auto_approve_locked: config.tasks.auto_approve_locked,
            default_compaction_threshold: config.tasks.compaction_threshold,
        }
    }
}

/// Parameters for `TaskManager::create_task`
#[derive(Debug, Clone)]
pub struct CreateTaskParams {
    /// Parent task; `None` and `Some("")` both create a root task
    pub parent_id: Option<String>,
    pub name: Option<String>,
    pub state: Option<String>,
    /// Applied after inheritance, so these win
    pub overrides: SettingsOverride,
    /// Emit a `TaskCreated` event
    pub send_event: bool,
}

impl Default for CreateTaskParams {
    fn default() -> Self {
        Self {
            parent_id: None,
            name: None,
            state: None,
            overrides: SettingsOverride::default(),
            send_event: true,
        }
    }
}

impl CreateTaskParams {
    pub fn subtask_of(parent_id: impl Into<String>) -> Self {
        Self {
            parent_id: Some(parent_id.into()),
            ..Default::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Owns every task of one project.
///
/// Constructed when a project opens and `close()`d when it closes. Tasks are
/// loaded lazily from the store on first use; every query waits for that load.
pub struct TaskManager {
    project_dir: PathBuf,
    store: Arc<dyn TaskStore>,
    environment: Arc<dyn ProjectEnvironment>,
    events: Arc<dyn EventSink>,
    options: ManagerOptions,
    tasks: RwLock<HashMap<String, TaskHandle>>,
    loaded: OnceCell<()>,
}

impl TaskManager {
    pub fn new(
        project_dir: impl Into<PathBuf>,
        store: Arc<dyn TaskStore>,
        environment: Arc<dyn ProjectEnvironment>,
        events: Arc<dyn EventSink>,
        options: ManagerOptions,
    ) -> Self {
        Self {
            project_dir: project_dir.into(),
            store,
            environment,
            events,
            options,
            tasks: RwLock::new(HashMap::new()),
            loaded: OnceCell::new(),
        }
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Load the project's tasks if that has not happened yet
    pub async fn ensure_loaded(&self) -> Result<()> {
        self.loaded.get_or_try_init(|| self.load_tasks()).await?;
        Ok(())
    }

    async fn load_tasks(&self) -> Result<()> {
        let ids = self.store.load_task_ids().await?;
        let mut loaded = HashMap::new();

        for id in ids {
            let data = match self.store.load_task(&id).await {
                Ok(Some(data)) => data,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(task_id = %id, error = %e, "Skipping unreadable task");
                    continue;
                }
            };
            let messages = self.store.load_messages(&id).await?;
            loaded.insert(id, self.new_handle(data, messages));
        }

        if !loaded.contains_key(INTERNAL_TASK_ID) {
            let data = TaskData::internal();
            self.store.save_task(&data).await?;
            loaded.insert(data.id.clone(), self.new_handle(data, Vec::new()));
        }

        tracing::info!(
            project = %self.project_dir.display(),
            tasks = loaded.len() - 1,
            "Loaded tasks"
        );
        self.tasks.write().await.extend(loaded);
        Ok(())
    }

    /// Fetch a task by id. The internal task is reachable here.
    pub async fn get_task(&self, task_id: &str) -> Result<Option<TaskHandle>> {
        self.ensure_loaded().await?;
        Ok(self.tasks.read().await.get(task_id).cloned())
    }

    /// The reserved task holding project-wide default context
    pub async fn get_internal_task(&self) -> Result<TaskHandle> {
        self.get_task(INTERNAL_TASK_ID)
            .await?
            .ok_or_else(|| CoreError::TaskNotFound(INTERNAL_TASK_ID.to_string()))
    }

    /// All listable tasks, oldest first
    pub async fn get_tasks(&self) -> Result<Vec<TaskData>> {
        self.get_tasks_filtered(true).await
    }

    pub async fn get_tasks_filtered(&self, include_archived: bool) -> Result<Vec<TaskData>> {
        self.ensure_loaded().await?;
        let mut tasks: Vec<TaskData> = self
            .snapshot()
            .await
            .into_iter()
            .filter(|t| include_archived || !t.archived)
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    /// Create a task, inheriting settings from its parent or the latest task
    pub async fn create_task(&self, params: CreateTaskParams) -> Result<TaskData> {
        self.ensure_loaded().await?;

        let parent_id = params.parent_id.filter(|id| !id.is_empty());
        let parent = match &parent_id {
            Some(id) => Some(
                self.listed_task_data(id)
                    .await
                    .ok_or_else(|| CoreError::ParentNotFound(id.clone()))?,
            ),
            None => None,
        };

        let mut data = TaskData::new(Uuid::new_v4().to_string(), parent_id);
        match &parent {
            // Subtasks share their parent's worktree
            Some(parent) => {
                data.settings = parent.settings.clone();
                data.working_mode = parent.working_mode;
                data.worktree = parent.worktree.clone();
            }
            None => match self.most_recent_task().await {
                Some(recent) => data.settings = recent.settings,
                None => {
                    data.settings = TaskSettings {
                        model: self.environment.default_model().await?,
                        context_compaction_threshold: self.options.default_compaction_threshold,
                        ..Default::default()
                    }
                }
            },
        }

        if let Some(name) = params.name {
            data.name = name;
        }
        if let Some(state) = params.state {
            data.state = state;
        }
        params.overrides.apply(&mut data);

        if self.options.auto_approve_locked {
            data.settings.auto_approve = true;
        }
        if data.working_mode == WorkingMode::Worktree && data.worktree.is_none() {
            // A subtask of a worktree task shares the parent's worktree even when
            // the parent never had one resolved
            let owner = match &parent {
                Some(parent) if parent.working_mode == WorkingMode::Worktree => parent.id.as_str(),
                _ => data.id.as_str(),
            };
            data.worktree = Some(self.environment.resolve_worktree(owner).await?);
        }
        data.context_files = self.default_context_files().await?;

        self.insert_task(data.clone(), Vec::new()).await?;
        tracing::info!(task_id = %data.id, parent_id = ?data.parent_id, "Created task");

        if params.send_event {
            self.events.emit(TaskEvent::TaskCreated(data.clone()));
        }
        Ok(data)
    }

    /// Delete a task and all of its descendants, children first.
    ///
    /// Unknown ids are skipped. Not transactional: if removing one task fails,
    /// the tasks already deleted stay deleted.
    pub async fn delete_task(&self, task_id: &str) -> Result<()> {
        self.ensure_loaded().await?;
        if task_id == INTERNAL_TASK_ID {
            tracing::warn!("Refusing to delete the internal task");
            return Ok(());
        }

        let parents: Vec<(String, Option<String>)> = self
            .snapshot()
            .await
            .into_iter()
            .map(|t| (t.id, t.parent_id))
            .collect();
        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        for (id, parent_id) in parents {
            if let Some(parent_id) = parent_id {
                children.entry(parent_id).or_default().push(id);
            }
        }

        let mut order = Vec::new();
        let mut visited = HashSet::new();
        collect_bottom_up(task_id, &children, &mut visited, &mut order);

        for id in order {
            self.delete_single(&id).await?;
        }
        Ok(())
    }

    async fn delete_single(&self, task_id: &str) -> Result<()> {
        let Some(handle) = self.tasks.read().await.get(task_id).cloned() else {
            tracing::debug!(task_id = %task_id, "Task already gone, skipping");
            return Ok(());
        };

        // Closed only once the record is gone; a failed removal leaves the task live
        self.store.remove_task(task_id).await?;
        self.tasks.write().await.remove(task_id);
        handle.lock().await.close();

        tracing::info!(task_id = %task_id, "Deleted task");
        self.events.emit(TaskEvent::TaskDeleted {
            task_id: task_id.to_string(),
        });
        Ok(())
    }

    /// Copy a task's configuration and full history into a new sibling task
    pub async fn duplicate_task(&self, task_id: &str) -> Result<TaskData> {
        let source = self.require_task(task_id).await?;
        let (mut data, messages) = {
            let task = source.lock().await;
            (task.data().clone(), task.messages().get_messages().to_vec())
        };

        reseed(&mut data);
        data.name = format!("{} (copy)", data.name).trim_start().to_string();
        if self.options.auto_approve_locked {
            data.settings.auto_approve = true;
        }

        self.insert_task(data.clone(), messages).await?;
        tracing::info!(source = %task_id, task_id = %data.id, "Duplicated task");
        self.events.emit(TaskEvent::TaskCreated(data.clone()));
        Ok(data)
    }

    /// Branch a task's history at `from_message_id` into a new task.
    ///
    /// The fork hangs below the source when the source is a root task, and
    /// next to it when the source is itself a subtask.
    pub async fn fork_task(&self, task_id: &str, from_message_id: &str) -> Result<TaskData> {
        let source = self.require_task(task_id).await?;
        let (mut data, messages) = {
            let task = source.lock().await;
            let messages = task.messages().messages_through(from_message_id)?;
            (task.data().clone(), messages)
        };

        data.parent_id = Some(data.parent_id.take().unwrap_or_else(|| data.id.clone()));
        reseed(&mut data);
        data.name = format!("{} (fork)", data.name).trim_start().to_string();
        data.state = String::new();
        if self.options.auto_approve_locked {
            data.settings.auto_approve = true;
        }

        self.insert_task(data.clone(), messages).await?;
        tracing::info!(
            source = %task_id,
            task_id = %data.id,
            from_message = %from_message_id,
            "Forked task"
        );
        self.events.emit(TaskEvent::TaskCreated(data.clone()));
        Ok(data)
    }

    /// Apply settings propagation or workflow changes to one task
    pub async fn update_task(&self, task_id: &str, update: TaskUpdate) -> Result<TaskData> {
        let handle = self.require_task(task_id).await?;
        let mut task = handle.lock().await;
        task.update(update).await
    }

    /// Attach a file to the project-wide default context inherited by new tasks
    pub async fn add_default_context_file(&self, file: ContextFile) -> Result<()> {
        let internal = self.get_internal_task().await?;
        let mut task = internal.lock().await;
        task.add_context_file(file).await
    }

    pub async fn drop_default_context_file(&self, path: &str) -> Result<bool> {
        let internal = self.get_internal_task().await?;
        let mut task = internal.lock().await;
        task.drop_context_file(path).await
    }

    /// Stop every task's streaming. Called when the project closes.
    pub async fn close(&self) {
        let handles: Vec<TaskHandle> = self.tasks.read().await.values().cloned().collect();
        for handle in handles {
            handle.lock().await.close();
        }
        tracing::info!(project = %self.project_dir.display(), "Closed task manager");
    }

    fn new_handle(&self, data: TaskData, messages: Vec<Message>) -> TaskHandle {
        let mut task = Task::new(
            data,
            messages,
            self.store.clone(),
            self.events.clone(),
            self.options.flush_interval,
        );
        task.enable_autosave();
        Arc::new(Mutex::new(task))
    }

    /// Persist a new task and register it
    async fn insert_task(&self, data: TaskData, messages: Vec<Message>) -> Result<()> {
        self.store.save_task(&data).await?;
        if !messages.is_empty() {
            self.store.save_messages(&data.id, &messages).await?;
        }
        let handle = self.new_handle(data.clone(), messages);
        self.tasks.write().await.insert(data.id, handle);
        Ok(())
    }

    /// A listable task, or `TaskNotFound`
    async fn require_task(&self, task_id: &str) -> Result<TaskHandle> {
        self.ensure_loaded().await?;
        if task_id == INTERNAL_TASK_ID {
            return Err(CoreError::TaskNotFound(task_id.to_string()));
        }
        self.tasks
            .read()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| CoreError::TaskNotFound(task_id.to_string()))
    }

    async fn listed_task_data(&self, task_id: &str) -> Option<TaskData> {
        let handle = self.require_task(task_id).await.ok()?;
        let task = handle.lock().await;
        Some(task.data().clone())
    }

    /// Records of every listable task, in no particular order
    async fn snapshot(&self) -> Vec<TaskData> {
        let handles: Vec<TaskHandle> = self
            .tasks
            .read()
            .await
            .iter()
            .filter(|(id, _)| id.as_str() != INTERNAL_TASK_ID)
            .map(|(_, handle)| handle.clone())
            .collect();

        let mut records = Vec::with_capacity(handles.len());
        for handle in handles {
            records.push(handle.lock().await.data().clone());
        }
        records
    }

    async fn most_recent_task(&self) -> Option<TaskData> {
        most_recent(self.snapshot().await)
    }

    async fn default_context_files(&self) -> Result<Vec<ContextFile>> {
        let internal = self.get_internal_task().await?;
        let task = internal.lock().await;
        Ok(task.context_files().to_vec())
    }
}

/// Most recently updated record; a missing timestamp counts as oldest.
/// Ties fall back to creation time, then id, so the pick never depends on map order.
fn most_recent(records: Vec<TaskData>) -> Option<TaskData> {
    records.into_iter().max_by(|a, b| {
        (a.updated_at, a.created_at, &a.id).cmp(&(b.updated_at, b.created_at, &b.id))
    })
}

/// Fresh identity and timestamps for a copied record
fn reseed(data: &mut TaskData) {
    let now = Utc::now();
    data.id = Uuid::new_v4().to_string();
    data.created_at = now;
    data.updated_at = Some(now);
    data.archived = false;
}

/// Post-order walk: every descendant lands before its ancestor
fn collect_bottom_up(
    task_id: &str,
    children: &HashMap<String, Vec<String>>,
    visited: &mut HashSet<String>,
    order: &mut Vec<String>,
) {
    if !visited.insert(task_id.to_string()) {
        return;
    }
    if let Some(kids) = children.get(task_id) {
        for child in kids {
            collect_bottom_up(child, children, visited, order);
        }
    }
    order.push(task_id.to_string());
}
