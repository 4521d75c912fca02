// ABOUTME: Logging setup for spindle binaries and applications embedding spindle-core
// ABOUTME: init() logs to stderr, init_file() to a per-project log, init_for() filters to one crate

use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// File name of the log written by `init_file`
pub const LOG_FILE_NAME: &str = "spindle.log";

/// Logging to stderr. `verbose` lowers the default level from INFO to DEBUG;
/// RUST_LOG directives still apply on top.
pub fn init(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(default_filter(level))
        .with_target(verbose)
        .try_init();
}

/// Logging to `<dir>/spindle.log` for interactive front ends that own the terminal.
/// Falls back to the user's config dir when `dir` is None. Default: WARN.
/// If setup fails, prints a warning to stderr and continues without logging.
pub fn init_file(dir: Option<&Path>) {
    if let Err(e) = init_file_inner(dir) {
        eprintln!("Warning: failed to set up file logging: {e}");
    }
}

fn init_file_inner(dir: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let path = match dir {
        Some(dir) => dir.join(LOG_FILE_NAME),
        None => default_log_path().ok_or("could not determine config directory")?,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(default_filter(Level::WARN))
        .with_ansi(false)
        .try_init()
        .map_err(|e| e.to_string())?;

    Ok(())
}

/// `~/.config/spindle/spindle.log`
pub fn default_log_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("spindle").join(LOG_FILE_NAME))
}

/// INFO for the named crate, WARN for everything else.
/// For hosts that embed spindle-core and only want its output.
pub fn init_for(crate_name: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(crate_filter(crate_name))
        .try_init();
}

fn default_filter(level: Level) -> EnvFilter {
    EnvFilter::from_default_env().add_directive(level.into())
}

fn crate_filter(crate_name: &str) -> EnvFilter {
    let directive = format!("{}=info", crate_name.replace('-', "_"));
    EnvFilter::from_default_env()
        .add_directive(Level::WARN.into())
        .add_directive(directive.parse().unwrap_or_else(|_| Level::INFO.into()))
}
