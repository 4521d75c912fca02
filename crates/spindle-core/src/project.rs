// ABOUTME: Project environment collaborator - worktree resolution and default model lookup
// ABOUTME: LocalProject derives both from the project directory and the loaded Config

use crate::config::Config;
use crate::task::{ModelSelection, Worktree};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Services the task manager needs from the surrounding project
#[async_trait]
pub trait ProjectEnvironment: Send + Sync {
    /// Resolve (creating if needed) the worktree a task will work in
    async fn resolve_worktree(&self, task_id: &str) -> Result<Worktree>;

    /// Model for tasks that have nothing to inherit from
    async fn default_model(&self) -> Result<ModelSelection>;
}

/// Environment for a project on the local filesystem
pub struct LocalProject {
    project_dir: PathBuf,
    config: Config,
}

impl LocalProject {
    pub fn new(project_dir: impl Into<PathBuf>, config: Config) -> Self {
        Self {
            project_dir: project_dir.into(),
            config,
        }
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }
}

#[async_trait]
impl ProjectEnvironment for LocalProject {
    async fn resolve_worktree(&self, task_id: &str) -> Result<Worktree> {
        let path = self
            .config
            .worktrees_dir(&self.project_dir)
            .join(crate::sanitize_id(task_id));
        tokio::fs::create_dir_all(&path)
            .await
            .with_context(|| format!("Failed to create worktree {}", path.display()))?;
        tracing::debug!(task_id = %task_id, path = %path.display(), "Resolved worktree");
        Ok(Worktree {
            path,
            base_branch: None,
        })
    }

    async fn default_model(&self) -> Result<ModelSelection> {
        let model = self.config.default_model();
        if model.is_empty() {
            anyhow::bail!("No default model configured (set [models] default)");
        }
        Ok(model)
    }
}
