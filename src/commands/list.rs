//! List-targets command.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::config::Settings;
use crate::paths::{BuildContext, PathMap};
use crate::target::{normalize_targets, Target, TargetResolver};

pub fn print_targets(targets: &[Target]) {
    if targets.is_empty() {
        println!("No support for any targets");
        return;
    }
    println!("Supported targets:");
    for target in targets {
        let origin = if target.location.is_external() {
            format!("  ({})", target.location.path().display())
        } else {
            String::new()
        };
        println!("\t ** {}{}", target.name, origin);
    }
}

/// Execute the list-targets command.
pub fn cmd_list_targets(base_dir: &Path, target_trees: &[PathBuf], settings: &Settings) -> Result<Vec<Target>> {
    let paths = PathMap::standard(base_dir, &settings.container_home, None, settings.inside_container);
    let resolver = TargetResolver::new(paths.get(BuildContext::Host, "tgroot")?);
    let targets = resolver.list_known_targets(&normalize_targets(target_trees));
    print_targets(&targets);
    Ok(targets)
}
