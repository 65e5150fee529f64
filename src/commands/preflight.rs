//! Preflight command - runs preflight checks.

use anyhow::Result;
use std::path::Path;

use crate::config::Settings;
use crate::paths::PathMap;
use crate::preflight;

/// Execute the preflight command.
pub fn cmd_preflight(base_dir: &Path, strict: bool, settings: &Settings) -> Result<()> {
    settings.print();
    println!();
    let paths = PathMap::standard(base_dir, &settings.container_home, None, settings.inside_container);
    if strict {
        preflight::run_preflight_or_fail(&paths, &settings.container_tech)?;
    } else {
        let report = preflight::run_preflight(&paths, &settings.container_tech);
        report.print();
        if !report.all_passed() {
            println!("Some checks failed. Use --strict to fail the build.");
        }
    }
    Ok(())
}
