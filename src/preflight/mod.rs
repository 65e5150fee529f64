//! Preflight checks for sdkbuilder.
//!
//! Validates host tools and the project tree before starting a build.
//! Run with `sdkbuilder preflight` to check everything is ready.

mod environment;
mod host_tools;
pub(crate) mod types;

use anyhow::{bail, Result};

use crate::paths::PathMap;

pub use types::{CheckResult, CheckStatus, PreflightReport};

/// Run all preflight checks.
pub fn run_preflight(paths: &PathMap, container_tech: &str) -> PreflightReport {
    let mut checks = Vec::new();

    println!("Running preflight checks...\n");

    println!("Checking host tools...");
    checks.extend(host_tools::check_host_tools(container_tech));

    println!("Checking project tree...");
    checks.extend(environment::check_project_tree(paths));

    println!();

    PreflightReport { checks }
}

/// Run preflight and bail if any checks fail.
pub fn run_preflight_or_fail(paths: &PathMap, container_tech: &str) -> Result<()> {
    let report = run_preflight(paths, container_tech);
    report.print();

    if !report.all_passed() {
        bail!(
            "Preflight failed: {} check(s) failed. Fix the issues above before building.",
            report.fail_count()
        );
    }

    println!("All preflight checks passed!\n");
    Ok(())
}
