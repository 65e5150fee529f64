//! Treegen command - scaffolds an out-of-tree target.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::config::Settings;
use crate::overlay::generate_target_tree;
use crate::paths::PathMap;

/// Execute the treegen command.
pub fn cmd_treegen(base_dir: &Path, name: &str, parent: &Path, settings: &Settings) -> Result<PathBuf> {
    let paths = PathMap::standard(base_dir, &settings.container_home, None, settings.inside_container);
    let dst = generate_target_tree(name, parent, &paths)?;
    for entry in walkdir::WalkDir::new(&dst).sort_by_file_name() {
        let entry = entry?;
        let depth = entry.depth();
        println!("{}{}", "    ".repeat(depth), entry.file_name().to_string_lossy());
    }
    Ok(dst)
}
