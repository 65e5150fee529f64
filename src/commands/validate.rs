//! Validate command - checks every configuration document against its
//! schema, out-of-tree targets and image recipes included.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

use crate::common::sorted_scripts;
use crate::config::Settings;
use crate::overlay::OverlayComposer;
use crate::paths::{BuildContext, PathMap};
use crate::sdk::parse_steps;
use crate::spec::target_spec_file_name;
use crate::store::{self, DocumentKind};
use crate::target::{normalize_buildspecs, normalize_targets, COMMON_DIR};

fn check(path: &Path, kind: DocumentKind, schemas: &Path) -> Result<()> {
    let doc = store::validate_against_schema(path, kind, schemas)?;
    if kind == DocumentKind::BuildSteps {
        parse_steps(&doc)?;
    }
    println!(" # {} : valid.", path.display());
    Ok(())
}

/// Validate the merged scratch tree. Returns the number of documents checked.
pub fn validate_all(paths: &PathMap, devconfig: Option<&Path>) -> Result<usize> {
    use BuildContext::Tmp;
    let schemas = paths.get(Tmp, "schemas")?;
    let mut count = 0;

    println!("Validating steps specs ...");
    for file in sorted_scripts(&paths.get(Tmp, "steps_dir")?)? {
        check(&file, DocumentKind::BuildSteps, &schemas)?;
        count += 1;
    }

    println!("Validating common specs ...");
    for file in sorted_scripts(&paths.get(Tmp, "common")?.join("specs"))? {
        check(&file, DocumentKind::EnvDefaults, &schemas)?;
        count += 1;
    }

    println!("Validating target specs ...");
    let tgroot = paths.get(Tmp, "tgroot")?;
    for dir in crate::common::subdirectories(&tgroot) {
        let Some(name) = dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        if name == COMMON_DIR {
            continue;
        }
        let spec = dir.join(target_spec_file_name(&name));
        if !spec.is_file() {
            bail!("Target {name} missing '{}'", target_spec_file_name(&name));
        }
        check(&spec, DocumentKind::TargetSpec, &schemas)?;
        count += 1;
    }

    if let Some(devconfig) = devconfig {
        println!("Validating {} ...", devconfig.display());
        check(devconfig, DocumentKind::DeveloperConfig, &schemas)?;
        count += 1;
    }
    Ok(count)
}

/// Execute the validate command.
pub fn cmd_validate(
    base_dir: &Path,
    target_trees: &[PathBuf],
    container_specs: &[PathBuf],
    devconfig: Option<&Path>,
    settings: &Settings,
) -> Result<usize> {
    let paths = PathMap::standard(base_dir, &settings.container_home, None, settings.inside_container);
    OverlayComposer::install_overlay(
        &paths,
        &normalize_targets(target_trees),
        &normalize_buildspecs(container_specs),
    )?;
    let devconfig = super::build::developer_config_path(&paths, devconfig);
    let count = validate_all(&paths, devconfig.as_deref())?;
    println!("{count} document(s) valid.");
    Ok(count)
}
