//! Layered composition of the scratch and staging trees.
//!
//! Two trees are built per run. The scratch tree (`.tmp/spec`) is the
//! in-tree specs directory with every out-of-tree target and image recipe
//! copied on top; it is what schema validation sees. The staging tree is
//! what ends up as the container's base directory: build materials merged
//! from common, SDK-family and target layers, in that order, later layers
//! overwriting earlier ones file by file.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::common::{copy_file, copy_tree, prepare_work_dir, CopyMode};
use crate::error::BuildError;
use crate::paths::{BuildContext, PathMap};
use crate::store::{self, BUILDSPECS_ENUM_FILE, TARGETS_ENUM_FILE};
use crate::target::{normalize_buildspecs, Target, TargetResolver};

/// File name of the hook dispatcher script shipped with the common tree.
pub const HOOK_RUNNER: &str = "run_hooks";

/// Build stages, run in this order.
pub const STAGES: [&str; 3] = ["prebuild", "build", "postbuild"];

/// Hook categories under `scripts/hooks/`.
pub const HOOKS: [&str; 4] = ["prepare_system", "prepare_sdk", "install_configs", "build_packages"];

/// Config sets under `files/`.
pub const CONFIG_SETS: [&str; 2] = ["system_config", "sdk_config"];

/// Name of the family-agnostic variant in each common category.
const COMMON_VARIANT: &str = "common";

/// Precedence of a layer. Layers apply in increasing rank.
pub mod rank {
    pub const INVARIANT: u32 = 10;
    pub const COMMON: u32 = 20;
    pub const SDK_FAMILY: u32 = 30;
    pub const TARGET: u32 = 40;
    pub const MERGED_SPECS: u32 = 50;
    pub const SOURCE: u32 = 60;
}

/// What a layer copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    /// A directory tree, copied with the given mode.
    Tree(CopyMode),
    /// A single file, copied into the destination directory.
    File,
}

/// One (source, destination, rank) entry of a composition.
#[derive(Debug, Clone)]
pub struct OverlayLayer {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub rank: u32,
    pub kind: LayerKind,
    /// A missing source aborts composition instead of being skipped.
    pub mandatory: bool,
}

impl OverlayLayer {
    pub fn tree(source: impl Into<PathBuf>, destination: impl Into<PathBuf>, rank: u32) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            rank,
            kind: LayerKind::Tree(CopyMode::CONTENTS),
            mandatory: false,
        }
    }

    pub fn file(source: impl Into<PathBuf>, destination: impl Into<PathBuf>, rank: u32) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            rank,
            kind: LayerKind::File,
            mandatory: false,
        }
    }

    pub fn nested(mut self) -> Self {
        self.kind = LayerKind::Tree(CopyMode::NESTED);
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    /// Copy this layer. Returns whether anything was copied.
    pub fn apply(&self) -> Result<bool> {
        let copied = match self.kind {
            LayerKind::Tree(mode) => copy_tree(&self.source, &self.destination, mode)?,
            LayerKind::File => copy_file(&self.source, &self.destination, false)?.is_some(),
        };
        if !copied && self.mandatory {
            return Err(BuildError::MissingSource(self.source.clone()).into());
        }
        Ok(copied)
    }
}

/// An ordered set of layers.
#[derive(Debug, Clone, Default)]
pub struct OverlayPlan {
    layers: Vec<OverlayLayer>,
}

impl OverlayPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, layer: OverlayLayer) {
        self.layers.push(layer);
    }

    /// Layers in application order: by rank, ties in insertion order.
    pub fn ordered(&self) -> Vec<&OverlayLayer> {
        let mut layers: Vec<&OverlayLayer> = self.layers.iter().collect();
        layers.sort_by_key(|l| l.rank);
        layers
    }

    /// Check mandatory sources up front so nothing is copied on failure.
    fn check_mandatory(&self) -> Result<()> {
        for layer in self.layers.iter().filter(|l| l.mandatory) {
            let present = match layer.kind {
                LayerKind::Tree(_) => layer.source.is_dir(),
                LayerKind::File => layer.source.is_file(),
            };
            if !present {
                return Err(BuildError::MissingSource(layer.source.clone()).into());
            }
        }
        Ok(())
    }

    pub fn apply(&self) -> Result<()> {
        self.check_mandatory()?;
        for layer in self.ordered() {
            let copied = layer.apply()?;
            debug!(
                "layer {} {} -> {}{}",
                layer.rank,
                layer.source.display(),
                layer.destination.display(),
                if copied { "" } else { " (absent)" }
            );
        }
        Ok(())
    }
}

/// Composes the scratch and staging trees for one target.
#[derive(Debug, Clone)]
pub struct OverlayComposer {
    paths: PathMap,
    sdk_name: String,
}

impl OverlayComposer {
    /// `paths` must be the host view with a target selected.
    pub fn new(paths: &PathMap, sdk_name: impl Into<String>) -> Self {
        Self {
            paths: paths.clone_for(BuildContext::Host),
            sdk_name: sdk_name.into(),
        }
    }

    /// Merge in-tree specs with out-of-tree targets and image recipes
    /// into the scratch tree, then rewrite the target and recipe
    /// enumerations to the merged universe.
    ///
    /// Runs before a backend (and so an SDK family) is known, hence no
    /// `self`. Returns the targets known after the merge.
    pub fn install_overlay(
        paths: &PathMap,
        target_paths: &[PathBuf],
        buildspec_paths: &[PathBuf],
    ) -> Result<Vec<Target>> {
        use BuildContext::{Host, Tmp};

        let host_specs = paths.get(Host, "specs")?;
        let tmp_specs = paths.get(Tmp, "specs")?;
        let tmp_tgroot = paths.get(Tmp, "tgroot")?;
        let tmp_buildspecs = paths.get(Tmp, "buildspecs")?;
        let tmp_schemas = paths.get(Tmp, "schemas")?;

        OverlayLayer {
            source: host_specs,
            destination: tmp_specs,
            rank: rank::INVARIANT,
            kind: LayerKind::Tree(CopyMode::CONTENTS.cleared()),
            mandatory: true,
        }
        .apply()?;

        for target in target_paths {
            info!("Adding out-of-tree target {}", target.display());
            OverlayLayer::tree(target, &tmp_tgroot, rank::TARGET)
                .nested()
                .mandatory()
                .apply()?;
        }
        for buildspec in buildspec_paths {
            info!("Adding out-of-tree buildspec {}", buildspec.display());
            copy_file(buildspec, &tmp_buildspecs, true)?;
        }

        let targets = TargetResolver::new(&tmp_tgroot).in_tree();
        let target_names: Vec<String> = targets.iter().map(|t| t.name.clone()).collect();
        let buildspec_names: Vec<String> = normalize_buildspecs(&[tmp_buildspecs])
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();

        fs::create_dir_all(&tmp_schemas)
            .with_context(|| format!("Failed to create {}", tmp_schemas.display()))?;
        store::write_enum(&tmp_schemas.join(TARGETS_ENUM_FILE), &target_names)?;
        store::write_enum(&tmp_schemas.join(BUILDSPECS_ENUM_FILE), &buildspec_names)?;
        debug!("targets: {:?}", target_names);
        debug!("buildspecs: {:?}", buildspec_names);
        Ok(targets)
    }

    fn host(&self, label: &str) -> Result<PathBuf> {
        Ok(self.paths.get(BuildContext::Host, label)?)
    }

    fn staging(&self, label: &str) -> Result<PathBuf> {
        Ok(self.paths.get(BuildContext::Staging, label)?)
    }

    /// Push the common (or family) variant of every category.
    fn push_variant(&self, plan: &mut OverlayPlan, variant: &str, rank: u32) -> Result<()> {
        let common_files = self.host("common_files")?;
        let common_scripts = self.host("common_scripts")?;
        let common_hooks = self.host("common_hooks")?;
        let files = self.staging("files")?;
        let scripts = self.staging("scripts")?;
        let hooks = self.staging("hooks")?;

        for set in CONFIG_SETS {
            plan.push(OverlayLayer::tree(common_files.join(set).join(variant), files.join(set), rank));
        }
        for stage in STAGES {
            plan.push(OverlayLayer::tree(common_scripts.join(stage).join(variant), scripts.join(stage), rank));
        }
        for hook in HOOKS {
            plan.push(OverlayLayer::tree(common_hooks.join(hook).join(variant), hooks.join(hook), rank));
        }
        Ok(())
    }

    /// The staging composition, in precedence order.
    pub fn staging_plan(&self) -> Result<OverlayPlan> {
        use BuildContext::{Host, Tmp};

        let mut plan = OverlayPlan::new();
        let staging_base = self.staging("basedir")?;

        plan.push(OverlayLayer::tree(self.host("depends")?, self.staging("depends")?, rank::INVARIANT));
        plan.push(OverlayLayer::tree(self.host("steps_dir")?, self.staging("steps_dir")?, rank::INVARIANT));
        plan.push(
            OverlayLayer::file(self.host("env_defaults")?, self.staging("common")?.join("specs"), rank::INVARIANT)
                .mandatory(),
        );
        plan.push(
            OverlayLayer::file(self.host("common_hooks")?.join(HOOK_RUNNER), self.staging("hooks")?, rank::INVARIANT)
                .mandatory(),
        );

        self.push_variant(&mut plan, COMMON_VARIANT, rank::COMMON)?;
        self.push_variant(&mut plan, &self.sdk_name, rank::SDK_FAMILY)?;

        if self.paths.get(Host, "tgspec")?.is_file() {
            plan.push(OverlayLayer::tree(self.host("target_files")?, &staging_base, rank::TARGET).nested());
            plan.push(OverlayLayer::tree(self.host("target_scripts")?, &staging_base, rank::TARGET).nested());
        } else {
            let tmp_tgspec = self.paths.get(Tmp, "tgspec")?;
            if !tmp_tgspec.is_file() {
                return Err(BuildError::MissingSource(tmp_tgspec).into());
            }
            plan.push(OverlayLayer::tree(self.paths.get(Tmp, "target")?, &staging_base, rank::TARGET));
        }

        plan.push(OverlayLayer::tree(self.paths.get(Tmp, "specs")?, self.staging("specs")?, rank::MERGED_SPECS));
        plan.push(OverlayLayer::tree(self.host("src")?, self.staging("src")?, rank::SOURCE));
        Ok(plan)
    }

    /// Wipe and rebuild the staging tree.
    pub fn populate_staging_dir(&self) -> Result<PathBuf> {
        let plan = self.staging_plan()?;
        let staging_base = self.staging("basedir")?;
        info!("Populating staging directory {}", staging_base.display());
        prepare_work_dir(&staging_base)?;
        plan.apply()?;
        Ok(staging_base)
    }

    pub fn staging_root(&self) -> Result<PathBuf> {
        self.staging("basedir")
    }
}

/// Scaffold an out-of-tree target under `parent/<name>` from the common
/// tree: default config files are copied, stage and hook directories are
/// created empty.
pub fn generate_target_tree(name: &str, parent: &Path, paths: &PathMap) -> Result<PathBuf> {
    if !parent.is_dir() {
        anyhow::bail!("No such directory: {}", parent.display());
    }
    let common_files = paths.get(BuildContext::Host, "common_files")?;
    let dst = parent.join(name);

    for set in CONFIG_SETS {
        let out = dst.join("files").join(set);
        fs::create_dir_all(&out)?;
        copy_tree(&common_files.join(set).join(COMMON_VARIANT), &out, CopyMode::CONTENTS)?;
    }
    for stage in STAGES {
        fs::create_dir_all(dst.join("scripts").join(stage))?;
    }
    for hook in HOOKS {
        fs::create_dir_all(dst.join("scripts/hooks").join(hook))?;
    }
    info!("Generated target tree at {}", dst.display());
    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::write_file_with_dirs;
    use tempfile::TempDir;

    #[test]
    fn test_plan_orders_by_rank_then_insertion() {
        let mut plan = OverlayPlan::new();
        plan.push(OverlayLayer::tree("/b", "/x", rank::TARGET));
        plan.push(OverlayLayer::tree("/a", "/x", rank::COMMON));
        plan.push(OverlayLayer::tree("/c", "/x", rank::TARGET));
        let order: Vec<_> = plan.ordered().iter().map(|l| l.source.clone()).collect();
        assert_eq!(order, [PathBuf::from("/a"), "/b".into(), "/c".into()]);
    }

    #[test]
    fn test_higher_rank_wins_same_path() {
        let tmp = TempDir::new().unwrap();
        let low = tmp.path().join("low");
        let high = tmp.path().join("high");
        write_file_with_dirs(low.join("cfg/conf"), "low").unwrap();
        write_file_with_dirs(low.join("cfg/only_low"), "low").unwrap();
        write_file_with_dirs(high.join("cfg/conf"), "high").unwrap();
        let out = tmp.path().join("out");

        let mut plan = OverlayPlan::new();
        plan.push(OverlayLayer::tree(&high, &out, rank::SDK_FAMILY));
        plan.push(OverlayLayer::tree(&low, &out, rank::COMMON));
        plan.apply().unwrap();

        assert_eq!(fs::read_to_string(out.join("cfg/conf")).unwrap(), "high");
        assert_eq!(fs::read_to_string(out.join("cfg/only_low")).unwrap(), "low");
    }

    #[test]
    fn test_missing_mandatory_aborts_before_copying() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        write_file_with_dirs(src.join("f"), "x").unwrap();
        let out = tmp.path().join("out");

        let mut plan = OverlayPlan::new();
        plan.push(OverlayLayer::tree(&src, &out, rank::COMMON));
        plan.push(OverlayLayer::file(tmp.path().join("runner"), &out, rank::INVARIANT).mandatory());
        let err = plan.apply().unwrap_err();

        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::MissingSource(_))
        ));
        assert!(!out.exists());
    }

    #[test]
    fn test_generate_target_tree_layout() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("proj");
        write_file_with_dirs(
            root.join("spec/targets/common/files/system_config/common/hostname"),
            "box",
        )
        .unwrap();
        let paths = PathMap::standard(&root, Path::new("/home/dev"), None, false);
        let out = tmp.path().join("ext");
        fs::create_dir_all(&out).unwrap();

        let dst = generate_target_tree("acme", &out, &paths).unwrap();
        assert_eq!(
            fs::read_to_string(dst.join("files/system_config/hostname")).unwrap(),
            "box"
        );
        assert!(dst.join("files/sdk_config").is_dir());
        assert!(dst.join("scripts/postbuild").is_dir());
        assert!(dst.join("scripts/hooks/build_packages").is_dir());
    }

    #[test]
    fn test_generate_target_tree_requires_parent() {
        let paths = PathMap::standard(Path::new("/proj"), Path::new("/home/dev"), None, false);
        assert!(generate_target_tree("acme", Path::new("/nonexistent/parent"), &paths).is_err());
    }
}
