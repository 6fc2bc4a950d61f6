pub mod config;
pub mod reconcile;
pub mod status;

use std::path::PathBuf;

use anyhow::{Context, Result};

/// Resolve `$HOME`, the way every subcommand locates `~/.cellsync/`.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// `42s`, `7m`, `3h`, `2d`.
pub fn format_seconds(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{seconds}s");
    }
    if seconds < 60 * 60 {
        return format!("{}m", seconds / 60);
    }
    if seconds < 60 * 60 * 24 {
        return format!("{}h", seconds / (60 * 60));
    }
    format!("{}d", seconds / (60 * 60 * 24))
}
