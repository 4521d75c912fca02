// ABOUTME: CLI entry point for spindle.
// ABOUTME: Opens a project's task store and dispatches task hierarchy subcommands.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use spindle_core::{
    Config, CreateTaskParams, LocalProject, ManagerOptions, ModelSelection, NoopSink,
    SettingsOverride, SqliteTaskStore, TaskManager, WorkingMode,
};
use spindle_cli::{render_message, render_tree, VERSION};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "spindle")]
#[command(about = "Manage conversation tasks and their hierarchy")]
#[command(version)]
struct Cli {
    /// Project directory (defaults to the current directory)
    #[arg(long, short = 'p', global = true, env = "SPINDLE_PROJECT")]
    project: Option<PathBuf>,

    /// Config file (defaults to ~/.config/spindle/config.toml)
    #[arg(long, global = true, env = "SPINDLE_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default config file
    Init,

    /// Show the task tree
    List {
        /// Hide archived tasks
        #[arg(long)]
        active: bool,
    },

    /// Create a task
    Create {
        /// Parent task id, for a subtask
        #[arg(long)]
        parent: Option<String>,

        /// Task name
        #[arg(long, short = 'n')]
        name: Option<String>,

        /// Model as provider/model, overriding the inherited one
        #[arg(long, short = 'm')]
        model: Option<String>,

        /// Work in a dedicated worktree
        #[arg(long)]
        worktree: bool,
    },

    /// Delete a task and all of its subtasks
    Delete {
        /// Task id
        task: String,
    },

    /// Copy a task with its configuration and history
    Duplicate {
        /// Task id
        task: String,
    },

    /// Branch a task's history at a message
    Fork {
        /// Task id
        task: String,

        /// Last message to keep
        message: String,
    },

    /// Print a task's messages
    Show {
        /// Task id
        task: String,
    },

    /// Remove a message or tool call, with dependent tool results
    RemoveMessage {
        /// Task id
        task: String,

        /// Message id or tool call id
        id: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    spindle_log::init(cli.verbose);

    match cli.command {
        Commands::Init => run_init(),
        Commands::Version => {
            println!("spindle {VERSION}");
            Ok(())
        }
        command => {
            let config = match &cli.config {
                Some(path) => Config::load_from(path)?,
                None => Config::load()?,
            };
            let project = match cli.project {
                Some(dir) => dir,
                None => std::env::current_dir().context("Failed to read current directory")?,
            };
            let manager = open_manager(project, config).await?;
            let result = run_command(&manager, command).await;
            manager.close().await;
            result
        }
    }
}

fn run_init() -> Result<()> {
    let path = Config::init()?;
    println!("Config: {}", path.display());
    Ok(())
}

async fn open_manager(project: PathBuf, config: Config) -> Result<TaskManager> {
    let store = SqliteTaskStore::open(config.db_path(&project)).await?;
    tracing::debug!(project = %project.display(), "Opened task store");
    let options = ManagerOptions::from(&config);
    Ok(TaskManager::new(
        project.clone(),
        Arc::new(store),
        Arc::new(LocalProject::new(project, config)),
        Arc::new(NoopSink),
        options,
    ))
}

async fn run_command(manager: &TaskManager, command: Commands) -> Result<()> {
    match command {
        Commands::List { active } => {
            let tasks = manager.get_tasks_filtered(!active).await?;
            if tasks.is_empty() {
                println!("No tasks in {}", manager.project_dir().display());
            }
            for line in render_tree(&tasks) {
                println!("{line}");
            }
        }
        Commands::Create {
            parent,
            name,
            model,
            worktree,
        } => {
            let overrides = SettingsOverride {
                model: model.as_deref().map(ModelSelection::parse),
                working_mode: worktree.then_some(WorkingMode::Worktree),
                ..Default::default()
            };
            let task = manager
                .create_task(CreateTaskParams {
                    parent_id: parent,
                    name,
                    overrides,
                    ..Default::default()
                })
                .await?;
            println!("Created {} ({})", task.id, task.settings.model);
        }
        Commands::Delete { task } => {
            manager.delete_task(&task).await?;
            println!("Deleted {task}");
        }
        Commands::Duplicate { task } => {
            let copy = manager.duplicate_task(&task).await?;
            println!("Duplicated {task} as {}", copy.id);
        }
        Commands::Fork { task, message } => {
            let fork = manager.fork_task(&task, &message).await?;
            println!("Forked {task} at {message} as {}", fork.id);
        }
        Commands::Show { task } => {
            let handle = manager
                .get_task(&task)
                .await?
                .with_context(|| format!("Task {task} not found"))?;
            let task = handle.lock().await;
            for message in task.messages().get_messages() {
                for line in render_message(message) {
                    println!("{line}");
                }
            }
        }
        Commands::RemoveMessage { task, id } => {
            let handle = manager
                .get_task(&task)
                .await?
                .with_context(|| format!("Task {task} not found"))?;
            let mut task = handle.lock().await;
            let removed = task.remove_message(&id)?;
            task.save().await?;
            if removed.is_empty() {
                println!("Removed tool call {id}");
            } else {
                println!("Removed {} message(s): {}", removed.len(), removed.join(", "));
            }
        }
        // Handled in main without opening the project
        Commands::Init | Commands::Version => {}
    }
    Ok(())
}
