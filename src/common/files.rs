//! File and directory copy primitives used to compose overlay trees.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// How [`copy_tree`] places the source under the destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyMode {
    /// Copy what is inside `src` directly into `dst` rather than creating
    /// `dst/<basename of src>`.
    pub contents_only: bool,
    /// Remove the destination tree before copying.
    pub clear_first: bool,
}

impl CopyMode {
    pub const CONTENTS: CopyMode = CopyMode {
        contents_only: true,
        clear_first: false,
    };

    pub const NESTED: CopyMode = CopyMode {
        contents_only: false,
        clear_first: false,
    };

    pub fn cleared(self) -> Self {
        Self {
            clear_first: true,
            ..self
        }
    }
}

/// Write a file, creating parent directories as needed.
pub fn write_file_with_dirs<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, content: C) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

/// Recursively copy `src` into `dst`, overwriting files that collide.
///
/// A missing `src` copies nothing and returns `Ok(false)`; whether that is
/// acceptable is the caller's decision. Returns `Ok(true)` when `src`
/// existed and was copied.
pub fn copy_tree(src: &Path, dst: &Path, mode: CopyMode) -> Result<bool> {
    if !src.is_dir() {
        return Ok(false);
    }

    let root = if mode.contents_only {
        dst.to_path_buf()
    } else {
        match src.file_name() {
            Some(name) => dst.join(name),
            None => bail!("Cannot copy {}: path has no final component", src.display()),
        }
    };

    if mode.clear_first && root.exists() {
        fs::remove_dir_all(&root)
            .with_context(|| format!("Failed to clear {}", root.display()))?;
    }
    fs::create_dir_all(&root).with_context(|| format!("Failed to create {}", root.display()))?;

    for entry in WalkDir::new(src).follow_links(true).min_depth(1) {
        let entry = entry.with_context(|| format!("Failed to walk {}", src.display()))?;
        let rel = entry.path().strip_prefix(src)?;
        let out = root.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&out)
                .with_context(|| format!("Failed to create {}", out.display()))?;
        } else {
            if let Some(parent) = out.parent() {
                fs::create_dir_all(parent)?;
            }
            // A directory at the file's position must give way entirely.
            if out.is_dir() {
                fs::remove_dir_all(&out)?;
            }
            fs::copy(entry.path(), &out).with_context(|| {
                format!("Failed to copy {} to {}", entry.path().display(), out.display())
            })?;
        }
    }
    Ok(true)
}

/// Copy a single file into `dst_dir`, keeping its name.
///
/// With `must_exist`, a missing source is an error; otherwise it is skipped.
pub fn copy_file(src: &Path, dst_dir: &Path, must_exist: bool) -> Result<Option<PathBuf>> {
    if !src.is_file() {
        if must_exist {
            bail!("Required file {} does not exist", src.display());
        }
        return Ok(None);
    }
    let name = src
        .file_name()
        .with_context(|| format!("{} has no file name", src.display()))?;
    fs::create_dir_all(dst_dir)?;
    let out = dst_dir.join(name);
    fs::copy(src, &out)
        .with_context(|| format!("Failed to copy {} to {}", src.display(), out.display()))?;
    Ok(Some(out))
}

/// Regular files directly under `dir`, sorted by name. Missing dir = empty.
pub fn sorted_scripts(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut scripts = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() {
            scripts.push(path);
        }
    }
    scripts.sort();
    Ok(scripts)
}

/// Names of immediate subdirectories of `dir`, in directory-listing order.
pub fn subdirectories(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect()
}
