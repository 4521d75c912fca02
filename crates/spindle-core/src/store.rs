// ABOUTME: Persistence for task records and message histories
// ABOUTME: TaskStore trait with a SQLite implementation and an in-memory one

use crate::message::Message;
use crate::task::TaskData;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

/// Durable storage for one project's tasks
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Ids of every persisted task in the project, oldest first
    async fn load_task_ids(&self) -> Result<Vec<String>>;

    async fn load_task(&self, task_id: &str) -> Result<Option<TaskData>>;

    /// Insert or replace a task record
    async fn save_task(&self, task: &TaskData) -> Result<()>;

    async fn load_messages(&self, task_id: &str) -> Result<Vec<Message>>;

    /// Replace a task's stored history
    async fn save_messages(&self, task_id: &str, messages: &[Message]) -> Result<()>;

    /// Remove a task record together with its history
    async fn remove_task(&self, task_id: &str) -> Result<()>;
}

/// SQLite-backed task storage
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    /// Open or create a task store at the given path
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let url = format!("sqlite:{}?mode=rwc", path.display());

        // Foreign keys must be on for every pooled connection so history rows cascade
        let options = SqliteConnectOptions::from_str(&url)?
            .foreign_keys(true)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open task store {}", path.display()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                data TEXT NOT NULL,
                FOREIGN KEY (task_id) REFERENCES tasks(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_task ON messages(task_id, position)")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn load_task_ids(&self) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>("SELECT id FROM tasks ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn load_task(&self, task_id: &str) -> Result<Option<TaskData>> {
        let row = sqlx::query_as::<_, TaskRow>("SELECT id, data FROM tasks WHERE id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| {
            serde_json::from_str(&r.data)
                .with_context(|| format!("Failed to parse task record {}", r.id))
        })
        .transpose()
    }

    async fn save_task(&self, task: &TaskData) -> Result<()> {
        let data = serde_json::to_string(task).context("Failed to serialize task record")?;
        sqlx::query(
            r#"
            INSERT INTO tasks (id, data, created_at, updated_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at
            "#,
        )
        .bind(&task.id)
        .bind(data)
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_messages(&self, task_id: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT data FROM messages WHERE task_id = ? ORDER BY position ASC",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|data| {
                serde_json::from_str(data)
                    .with_context(|| format!("Failed to parse message of task {task_id}"))
            })
            .collect()
    }

    async fn save_messages(&self, task_id: &str, messages: &[Message]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM messages WHERE task_id = ?")
            .bind(task_id)
            .execute(&mut *tx)
            .await?;

        for (position, message) in messages.iter().enumerate() {
            let data = serde_json::to_string(message).context("Failed to serialize message")?;
            sqlx::query("INSERT INTO messages (task_id, position, data) VALUES (?, ?, ?)")
                .bind(task_id)
                .bind(position as i64)
                .bind(data)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn remove_task(&self, task_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    data: String,
}

/// Process-local task storage for ephemeral projects and tests
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<HashMap<String, TaskData>>,
    messages: Mutex<HashMap<String, Vec<Message>>>,
    failing_removals: Mutex<HashSet<String>>,
}

impl MemoryTaskStore {
    pub fn task(&self, task_id: &str) -> Option<TaskData> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.get(task_id).cloned()
    }

    pub fn messages(&self, task_id: &str) -> Vec<Message> {
        let messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        messages.get(task_id).cloned().unwrap_or_default()
    }

    /// Make `remove_task` fail for the given id, simulating an I/O error
    pub fn fail_removal_of(&self, task_id: &str) {
        let mut failing = self
            .failing_removals
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        failing.insert(task_id.to_string());
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn load_task_ids(&self) -> Result<Vec<String>> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let mut records: Vec<&TaskData> = tasks.values().collect();
        records.sort_by_key(|t| t.created_at);
        Ok(records.into_iter().map(|t| t.id.clone()).collect())
    }

    async fn load_task(&self, task_id: &str) -> Result<Option<TaskData>> {
        Ok(self.task(task_id))
    }

    async fn save_task(&self, task: &TaskData) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn load_messages(&self, task_id: &str) -> Result<Vec<Message>> {
        Ok(self.messages(task_id))
    }

    async fn save_messages(&self, task_id: &str, messages: &[Message]) -> Result<()> {
        let mut stored = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        stored.insert(task_id.to_string(), messages.to_vec());
        Ok(())
    }

    async fn remove_task(&self, task_id: &str) -> Result<()> {
        {
            let failing = self
                .failing_removals
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if failing.contains(task_id) {
                anyhow::bail!("I/O error removing task {task_id}");
            }
        }
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(task_id);
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(task_id);
        Ok(())
    }
}
