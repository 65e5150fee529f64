//! Logical path lookup per execution context.
//!
//! A run touches the same logical locations (specs, hooks, output, ...) from
//! four vantage points: the host project root, the scratch `.tmp` tree, the
//! staging tree that becomes the container's base directory, and the
//! container itself. Instead of a variable per (location, vantage point)
//! pair, paths are registered once per label and resolved per context.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::BuildError;

/// Execution context selecting the active path view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BuildContext {
    Host,
    Container,
    Staging,
    Tmp,
}

impl BuildContext {
    pub const ALL: [BuildContext; 4] = [
        BuildContext::Host,
        BuildContext::Container,
        BuildContext::Staging,
        BuildContext::Tmp,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BuildContext::Host => "host",
            BuildContext::Container => "container",
            BuildContext::Staging => "staging",
            BuildContext::Tmp => "tmp",
        }
    }
}

impl fmt::Display for BuildContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildContext {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host" => Ok(BuildContext::Host),
            "container" => Ok(BuildContext::Container),
            "staging" => Ok(BuildContext::Staging),
            "tmp" => Ok(BuildContext::Tmp),
            other => Err(BuildError::UnknownContext(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    path: PathBuf,
    parent: Option<String>,
}

/// Per-context table of labelled paths.
#[derive(Debug, Clone)]
pub struct PathMap {
    contexts: BTreeMap<BuildContext, BTreeMap<String, Entry>>,
    current: BuildContext,
}

impl PathMap {
    pub fn new(current: BuildContext) -> Self {
        Self {
            contexts: BTreeMap::new(),
            current,
        }
    }

    /// Register a context rooted at `basedir`.
    pub fn add_context(&mut self, context: BuildContext, basedir: impl Into<PathBuf>) {
        let mut labels = BTreeMap::new();
        labels.insert(
            "basedir".to_string(),
            Entry {
                path: basedir.into(),
                parent: None,
            },
        );
        self.contexts.insert(context, labels);
    }

    /// Set `label` in each of `contexts`, optionally relative to another label.
    ///
    /// Contexts that were never added are skipped.
    pub fn set(
        &mut self,
        contexts: &[BuildContext],
        label: &str,
        path: impl AsRef<Path>,
        relative_to: Option<&str>,
    ) {
        for ctx in contexts {
            if let Some(labels) = self.contexts.get_mut(ctx) {
                labels.insert(
                    label.to_string(),
                    Entry {
                        path: path.as_ref().to_path_buf(),
                        parent: relative_to.map(str::to_string),
                    },
                );
            }
        }
    }

    pub fn current(&self) -> BuildContext {
        self.current
    }

    /// A view of the same table with a different active context.
    pub fn clone_for(&self, context: BuildContext) -> PathMap {
        PathMap {
            contexts: self.contexts.clone(),
            current: context,
        }
    }

    pub fn get(&self, context: BuildContext, label: &str) -> Result<PathBuf, BuildError> {
        let unknown = || BuildError::UnknownPath {
            context: context.to_string(),
            label: label.to_string(),
        };
        let entry = self
            .contexts
            .get(&context)
            .and_then(|labels| labels.get(label))
            .ok_or_else(unknown)?;

        match &entry.parent {
            Some(parent) if !entry.path.is_absolute() => {
                Ok(self.get(context, parent)?.join(&entry.path))
            }
            _ => Ok(entry.path.clone()),
        }
    }

    pub fn try_get(&self, context: BuildContext, label: &str) -> Option<PathBuf> {
        self.get(context, label).ok()
    }

    /// Resolve `label` in the active context.
    pub fn path(&self, label: &str) -> Result<PathBuf, BuildError> {
        self.get(self.current, label)
    }

    /// The standard layout used by every run.
    ///
    /// `target` may be absent for commands that do not build anything
    /// (listing, validation, tree generation).
    pub fn standard(
        project_root: &Path,
        container_home: &Path,
        target: Option<&str>,
        inside_container: bool,
    ) -> PathMap {
        use BuildContext::*;
        const ALL: &[BuildContext] = &BuildContext::ALL;

        let current = if inside_container { Container } else { Host };
        let mut p = PathMap::new(current);
        p.add_context(Host, project_root);
        p.add_context(Container, container_home.join("base"));
        p.add_context(Staging, project_root.join("staging"));
        p.add_context(Tmp, project_root.join(".tmp"));

        p.set(&[Container], "home", container_home, None);
        p.set(ALL, "tmpdir", ".tmp", Some("basedir"));
        p.set(ALL, "specs", "spec", Some("basedir"));
        p.set(ALL, "tgroot", "targets", Some("specs"));
        p.set(ALL, "schemas", "json_schema", Some("specs"));
        p.set(ALL, "steps_dir", "steps", Some("specs"));
        p.set(ALL, "buildspecs", "container_image_buildspec", Some("specs"));
        p.set(ALL, "common", "common", Some("tgroot"));
        p.set(ALL, "env_defaults", "specs/environment.json", Some("common"));
        p.set(ALL, "automated_build_steps", "automated_build.json", Some("steps_dir"));
        p.set(ALL, "dev_build_steps", "dev_build.json", Some("steps_dir"));
        if let Some(target) = target {
            p.set(ALL, "target", target, Some("tgroot"));
            p.set(ALL, "tgspec", format!("{target}_spec.json"), Some("target"));
            p.set(ALL, "target_files", "files", Some("target"));
            p.set(ALL, "target_scripts", "scripts", Some("target"));
        }

        p.set(&[Host], "outdir", "out", Some("basedir"));
        p.set(&[Container], "outdir", "out", Some("home"));
        p.set(&[Host, Container], "pkg_outdir", "package", Some("outdir"));
        p.set(&[Host], "timestamp", "timestamp", Some("tmpdir"));
        p.set(&[Host], "buildlog", "build.log", Some("tmpdir"));
        p.set(&[Host], "devconfig", "developer.json", Some("basedir"));
        p.set(&[Host], "sdk_path", project_root, None);
        p.set(&[Container], "sdk_path", container_home, None);
        p.set(&[Host], "staging", project_root.join("staging"), None);

        p.set(&[Host], "depends", "depends", Some("specs"));
        p.set(&[Staging, Container], "depends", "depends", Some("basedir"));
        p.set(&[Host], "common_scripts", "scripts", Some("common"));
        p.set(&[Host], "common_hooks", "hooks", Some("common_scripts"));
        p.set(&[Host], "common_files", "files", Some("common"));

        p.set(&[Host, Staging, Container], "src", "src", Some("basedir"));
        p.set(&[Staging, Container], "files", "files", Some("basedir"));
        p.set(&[Staging, Container], "scripts", "scripts", Some("basedir"));
        p.set(&[Staging, Container], "hooks", "hooks", Some("scripts"));
        p.set(&[Staging, Container], "system_configs", "system_config", Some("files"));
        p.set(&[Staging, Container], "sdk_configs", "sdk_config", Some("files"));
        p
    }
}
