//! Target and buildspec discovery.
//!
//! Targets are directories named after the target that contain
//! `<name>_spec.json`. They live in-tree under `spec/targets/` or anywhere
//! outside the repository, supplied on the command line. Discovery is
//! permissive: paths that do not look like targets are dropped, never
//! reported as errors. Callers decide what an empty result means.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::spec::target_spec_file_name;

/// Reserved entry under the target root holding shared materials.
pub const COMMON_DIR: &str = "common";

/// File name suffix of container image recipes ("buildspecs").
pub const BUILDSPEC_SUFFIX: &str = "Dockerfile";

/// Where a target was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetLocation {
    InTree(PathBuf),
    External(PathBuf),
}

impl TargetLocation {
    pub fn path(&self) -> &Path {
        match self {
            TargetLocation::InTree(p) | TargetLocation::External(p) => p,
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, TargetLocation::External(_))
    }
}

/// A discovered target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub name: String,
    pub location: TargetLocation,
}

fn basename(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

/// True iff `path` is a directory holding `<basename>_spec.json`.
pub fn is_target_dir(path: &Path) -> bool {
    if !path.is_dir() {
        return false;
    }
    match basename(path) {
        Some(name) => path.join(target_spec_file_name(&name)).is_file(),
        None => false,
    }
}

fn sorted_children(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut children: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    children.sort();
    children
}

fn push_unique(out: &mut Vec<PathBuf>, seen: &mut HashSet<PathBuf>, path: PathBuf) {
    if seen.insert(path.clone()) {
        out.push(path);
    }
}

/// Reduce raw paths to target directories.
///
/// A path is kept if it is a target directory itself; otherwise, if it is a
/// directory, its immediate children that are target directories are kept
/// instead. Anything else is dropped.
pub fn normalize_targets(raw_paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for path in raw_paths {
        if is_target_dir(path) {
            push_unique(&mut out, &mut seen, path.clone());
        } else if path.is_dir() {
            for child in sorted_children(path) {
                if is_target_dir(&child) {
                    push_unique(&mut out, &mut seen, child);
                }
            }
        }
    }
    out
}

fn is_buildspec_file(path: &Path) -> bool {
    path.is_file()
        && path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().ends_with(BUILDSPEC_SUFFIX))
}

/// Reduce raw paths to buildspec files.
///
/// Files are kept iff their name ends with [`BUILDSPEC_SUFFIX`];
/// directories are scanned one level deep for such files.
pub fn normalize_buildspecs(raw_paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for path in raw_paths {
        if is_buildspec_file(path) {
            push_unique(&mut out, &mut seen, path.clone());
        } else if path.is_dir() {
            for child in sorted_children(path) {
                if is_buildspec_file(&child) {
                    push_unique(&mut out, &mut seen, child);
                }
            }
        }
    }
    out
}

/// Resolves target names against the in-tree target root plus any
/// out-of-tree target directories.
#[derive(Debug, Clone)]
pub struct TargetResolver {
    tgroot: PathBuf,
}

impl TargetResolver {
    pub fn new(tgroot: impl Into<PathBuf>) -> Self {
        Self {
            tgroot: tgroot.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.tgroot
    }

    /// In-tree targets, in scan order, excluding the `common` entry.
    pub fn in_tree(&self) -> Vec<Target> {
        sorted_children(&self.tgroot)
            .into_iter()
            .filter(|p| basename(p).is_some_and(|n| n != COMMON_DIR))
            .filter(|p| is_target_dir(p))
            .filter_map(|p| {
                basename(&p).map(|name| Target {
                    name,
                    location: TargetLocation::InTree(p),
                })
            })
            .collect()
    }

    /// All known targets: in-tree first, then `extra`. A name present in
    /// both appears once, at its first position, with the external
    /// location.
    pub fn list_known_targets(&self, extra: &[PathBuf]) -> Vec<Target> {
        let mut targets = self.in_tree();
        for path in extra {
            let Some(name) = basename(path) else { continue };
            let location = TargetLocation::External(path.clone());
            match targets.iter_mut().find(|t| t.name == name) {
                Some(existing) => existing.location = location,
                None => targets.push(Target { name, location }),
            }
        }
        targets
    }

    /// Case-exact lookup against in-tree and `extra` basenames.
    pub fn is_known_target(&self, name: &str, extra: &[PathBuf]) -> bool {
        self.find(name, extra).is_some()
    }

    pub fn find(&self, name: &str, extra: &[PathBuf]) -> Option<Target> {
        self.list_known_targets(extra)
            .into_iter()
            .find(|t| t.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::write_file_with_dirs;
    use tempfile::TempDir;

    fn make_target(root: &Path, name: &str) -> PathBuf {
        let dir = root.join(name);
        write_file_with_dirs(dir.join(target_spec_file_name(name)), "{}").unwrap();
        dir
    }

    #[test]
    fn test_normalize_keeps_target_dir_itself() {
        let tmp = TempDir::new().unwrap();
        let acme = make_target(tmp.path(), "acme");
        assert_eq!(normalize_targets(&[acme.clone()]), vec![acme]);
    }

    #[test]
    fn test_normalize_expands_parent_to_children() {
        let tmp = TempDir::new().unwrap();
        let a = make_target(tmp.path(), "a");
        let b = make_target(tmp.path(), "b");
        fs::create_dir_all(tmp.path().join("not_a_target")).unwrap();
        assert_eq!(normalize_targets(&[tmp.path().to_path_buf()]), vec![a, b]);
    }

    #[test]
    fn test_normalize_drops_nonexistent_and_mismatched() {
        let tmp = TempDir::new().unwrap();
        // Spec file named after something else.
        write_file_with_dirs(tmp.path().join("x/y_spec.json"), "{}").unwrap();
        let raw = vec![tmp.path().join("x"), tmp.path().join("missing")];
        assert!(normalize_targets(&raw).is_empty());
    }

    #[test]
    fn test_normalize_buildspecs_suffix_and_shallow_scan() {
        let tmp = TempDir::new().unwrap();
        let direct = tmp.path().join("openwrt.Dockerfile");
        write_file_with_dirs(&direct, "FROM x").unwrap();
        let dir = tmp.path().join("recipes");
        write_file_with_dirs(dir.join("yocto.Dockerfile"), "FROM y").unwrap();
        write_file_with_dirs(dir.join("README"), "").unwrap();
        write_file_with_dirs(dir.join("deep/z.Dockerfile"), "").unwrap();

        let found = normalize_buildspecs(&[direct.clone(), dir.clone(), tmp.path().join("README")]);
        assert_eq!(found, vec![direct, dir.join("yocto.Dockerfile")]);
    }

    #[test]
    fn test_in_tree_excludes_common() {
        let tmp = TempDir::new().unwrap();
        make_target(tmp.path(), "common");
        make_target(tmp.path(), "board");
        let names: Vec<_> = TargetResolver::new(tmp.path())
            .in_tree()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, ["board"]);
    }

    #[test]
    fn test_is_known_target_case_exact() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("targets");
        make_target(&root, "board");
        let ext = make_target(&tmp.path().join("ext"), "acme");
        let resolver = TargetResolver::new(&root);

        assert!(resolver.is_known_target("board", &[]));
        assert!(resolver.is_known_target("acme", &[ext.clone()]));
        assert!(!resolver.is_known_target("acme", &[]));
        assert!(!resolver.is_known_target("Board", &[ext]));
    }

    #[test]
    fn test_list_known_targets_external_wins_duplicates() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("targets");
        make_target(&root, "board");
        make_target(&root, "zeta");
        let ext = make_target(&tmp.path().join("ext"), "board");
        let extra = make_target(&tmp.path().join("ext"), "acme");

        let targets = TargetResolver::new(&root).list_known_targets(&[ext.clone(), extra.clone()]);
        let names: Vec<_> = targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["board", "zeta", "acme"]);
        assert_eq!(targets[0].location, TargetLocation::External(ext));
    }

    #[test]
    fn test_missing_root_yields_empty() {
        let resolver = TargetResolver::new("/nonexistent/targets/root");
        assert!(resolver.list_known_targets(&[]).is_empty());
    }
}
