// ABOUTME: Configuration loading and management for spindle
// ABOUTME: TOML config file under the XDG config dir with sensible defaults

use crate::task::ModelSelection;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub models: ModelsConfig,
    pub tasks: TasksConfig,
    pub streaming: StreamingConfig,
    pub storage: StorageConfig,
    pub worktrees: WorktreesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Model for tasks with nothing to inherit from ("provider/model")
    pub default: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default: "anthropic/claude-sonnet-4-20250514".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    /// Force auto-approve on for every new task
    pub auto_approve_locked: bool,
    /// Compaction threshold for tasks created from built-in defaults
    pub compaction_threshold: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Interval between flushes of buffered response chunks
    pub flush_interval_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file, relative to the project directory unless absolute
    pub db_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_file: PathBuf::from(".spindle").join("tasks.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorktreesConfig {
    /// Directory holding per-task worktrees, relative to the project unless absolute
    pub dir: PathBuf,
}

impl Default for WorktreesConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".spindle").join("worktrees"),
        }
    }
}

impl Config {
    /// Get the XDG config directory for spindle (~/.config/spindle)
    pub fn config_dir() -> PathBuf {
        std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|p| p.join(".config"))
                    .unwrap_or_else(|| PathBuf::from("."))
            })
            .join("spindle")
    }

    /// Get the default config file path
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load config from XDG config directory
    pub fn load() -> Result<Self> {
        let path = Self::config_path();

        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        Ok(config)
    }

    /// Save config to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory {}", parent.display())
            })?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }

    pub fn default_model(&self) -> ModelSelection {
        ModelSelection::parse(&self.models.default)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.streaming.flush_interval_ms)
    }

    /// Task database location for a project
    pub fn db_path(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(&self.storage.db_file)
    }

    /// Worktree root for a project
    pub fn worktrees_dir(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(&self.worktrees.dir)
    }

    /// Generate a default config file content
    pub fn default_toml() -> String {
        r#"# spindle configuration
# Location: ~/.config/spindle/config.toml

[models]
# Used when a new task has no parent and no earlier task to inherit from
default = "anthropic/claude-sonnet-4-20250514"

[tasks]
auto_approve_locked = false
# compaction_threshold = 80

[streaming]
flush_interval_ms = 100

[storage]
# db_file = ".spindle/tasks.db"  # Relative to the project directory

[worktrees]
# dir = ".spindle/worktrees"
"#
        .to_string()
    }

    /// Initialize config directory and create default config if needed
    pub fn init() -> Result<PathBuf> {
        let config_dir = Self::config_dir();
        let config_path = Self::config_path();

        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

        if !config_path.exists() {
            std::fs::write(&config_path, Self::default_toml())
                .with_context(|| format!("Failed to write config: {}", config_path.display()))?;
        }

        Ok(config_path)
    }
}
