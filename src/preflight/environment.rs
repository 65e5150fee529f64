//! Project tree checks (specs, schemas, hook runner, output dir).

use std::path::Path;

use crate::overlay::HOOK_RUNNER;
use crate::paths::{BuildContext, PathMap};
use crate::store::DocumentKind;

use super::types::CheckResult;

fn check_present(results: &mut Vec<CheckResult>, name: &str, path: &Path, required: bool) {
    if path.exists() {
        results.push(CheckResult::pass_with(name, &path.display().to_string()));
    } else {
        let msg = format!("Missing {}", path.display());
        results.push(if required {
            CheckResult::fail(name, &msg)
        } else {
            CheckResult::warn(name, &msg)
        });
    }
}

/// Check the project tree holds what a build needs.
pub fn check_project_tree(paths: &PathMap) -> Vec<CheckResult> {
    let mut results = Vec::new();
    let host = |label: &str| paths.try_get(BuildContext::Host, label);

    let required = [
        ("target root", host("tgroot")),
        ("env defaults", host("env_defaults")),
        ("hook runner", host("common_hooks").map(|p| p.join(HOOK_RUNNER))),
        ("automated build steps", host("automated_build_steps")),
        ("dev build steps", host("dev_build_steps")),
    ];
    for (name, path) in required {
        match path {
            Some(p) => check_present(&mut results, name, &p, true),
            None => results.push(CheckResult::fail(name, "No such path label")),
        }
    }

    if let Some(schemas) = host("schemas") {
        for kind in [
            DocumentKind::TargetSpec,
            DocumentKind::BuildSteps,
            DocumentKind::EnvDefaults,
            DocumentKind::DeveloperConfig,
        ] {
            let file = schemas.join(kind.schema_file());
            check_present(&mut results, kind.schema_file(), &file, true);
        }
    }

    // Output directory must be creatable/writable.
    if let Some(outdir) = host("outdir") {
        let probe = outdir.join(".preflight-test");
        let writable = std::fs::create_dir_all(&outdir)
            .and_then(|_| std::fs::write(&probe, "test"))
            .map(|_| {
                let _ = std::fs::remove_file(&probe);
            });
        match writable {
            Ok(()) => results.push(CheckResult::pass("out/ writable")),
            Err(e) => results.push(CheckResult::fail(
                "out/ writable",
                &format!("Cannot write to {}: {}", outdir.display(), e),
            )),
        }
    }

    results
}
