//! Utilities for managing scratch directories.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Prepare a work directory, removing it if it exists and creating it fresh.
pub fn prepare_work_dir(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        fs::remove_dir_all(path).with_context(|| format!("Failed to remove {}", path.display()))?;
    }
    fs::create_dir_all(path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(path.to_path_buf())
}

/// Wipe and recreate each of `paths`.
pub fn clean_up_paths(paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        prepare_work_dir(path)?;
    }
    Ok(())
}
