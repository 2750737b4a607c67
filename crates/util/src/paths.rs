//! Filesystem locations for persisted run state.

use std::env;
use std::path::PathBuf;

use dirs_next::{data_dir, home_dir};

/// Environment variable overriding where run journals are stored.
pub const STATE_DIR_ENV: &str = "SIGNFLOW_STATE_DIR";

/// Directory holding one journal file per run.
///
/// Resolution order: `SIGNFLOW_STATE_DIR`, then the platform data directory,
/// then the working directory.
pub fn default_journal_dir() -> PathBuf {
    if let Ok(path) = env::var(STATE_DIR_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde_path(PathBuf::from(path)).join("runs");
    }

    data_dir().unwrap_or_else(|| PathBuf::from(".")).join("signflow").join("runs")
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde_path(path: PathBuf) -> PathBuf {
    if let Some(first) = path.components().next()
        && first.as_os_str() != "~"
    {
        return path;
    }

    let input = path.to_string_lossy();
    let trimmed = input.trim();

    if trimmed == "~" {
        return home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }

    if let Some(rest) = trimmed.strip_prefix("~/") {
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }

    PathBuf::from(trimmed)
}
