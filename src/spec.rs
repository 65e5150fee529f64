//! Target spec documents and the per-invocation build configuration.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::Settings;
use crate::error::BuildError;
use crate::store;

/// Suffix every target spec file carries: `<target>_spec.json`.
pub const TARGET_SPEC_SUFFIX: &str = "_spec.json";

pub fn target_spec_file_name(target: &str) -> String {
    format!("{target}{TARGET_SPEC_SUFFIX}")
}

/// `environment` section shared by target specs, env defaults and
/// developer configs.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Environment {
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

/// A target's `<target>_spec.json`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TargetSpec {
    #[serde(default)]
    pub target: String,
    pub sdk_name: String,
    pub sdk_url: Vec<String>,
    pub sdk_tag: String,
    pub environment: Environment,
    pub build_artifacts_archive_name: String,
    pub container_image_buildspec_file: String,
}

impl TargetSpec {
    /// Load a target spec, stamping it with the target name.
    pub fn load(path: &Path, target: &str) -> Result<Self> {
        let mut spec: TargetSpec = store::load_json(path)?;
        spec.target = target.to_string();
        Ok(spec)
    }
}

/// Env defaults document (`common/specs/environment.json`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvDefaults {
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
struct MountEntry {
    source: PathBuf,
    target: PathBuf,
    #[serde(rename = "type")]
    kind: String,
}

/// Developer config: per-developer env and mount overrides for dev builds.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeveloperConfig {
    #[serde(default)]
    pub environment: Environment,
    /// Label → mount, in document order.
    #[serde(default)]
    mounts: serde_json::Map<String, serde_json::Value>,
}

impl DeveloperConfig {
    /// Mounts in document order; relative targets resolve against
    /// `container_home`.
    pub fn mounts(&self, container_home: &Path) -> Result<Vec<MountSpec>> {
        let mut out = Vec::with_capacity(self.mounts.len());
        for (label, value) in &self.mounts {
            let entry: MountEntry = serde_json::from_value(value.clone())
                .map_err(|e| anyhow::anyhow!("Invalid mount '{label}': {e}"))?;
            let destination = if entry.target.is_absolute() {
                entry.target
            } else {
                container_home.join(entry.target)
            };
            out.push(MountSpec::new(entry.source, destination, entry.kind));
        }
        Ok(out)
    }
}

/// A host → container mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub kind: String,
}

impl MountSpec {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>, kind: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            kind: kind.into(),
        }
    }

    pub fn bind(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self::new(source, destination, "bind")
    }
}

impl fmt::Display for MountSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} ({})",
            self.source.display(),
            self.destination.display(),
            self.kind
        )
    }
}

/// Reject mount lists the engine would refuse or silently shadow: two
/// mounts onto the same container path, or a bind of a missing host path.
///
/// The list is returned unchanged, order included.
pub fn validate_mounts(mounts: Vec<MountSpec>) -> Result<Vec<MountSpec>, BuildError> {
    let mut seen = HashSet::new();
    for mount in &mounts {
        if !seen.insert(&mount.destination) {
            return Err(BuildError::MountConflict(format!(
                "{} is mounted more than once",
                mount.destination.display()
            )));
        }
        if mount.kind == "bind" && !mount.source.exists() {
            return Err(BuildError::MountConflict(format!(
                "bind source {} does not exist",
                mount.source.display()
            )));
        }
    }
    Ok(mounts)
}

/// Whether artifacts stay on the host (dev) or live in the image (automated).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildType {
    Dev,
    Automated,
}

impl BuildType {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildType::Dev => "dev",
            BuildType::Automated => "automated",
        }
    }
}

impl fmt::Display for BuildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options taken from the command line.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub target: String,
    pub build_type: BuildType,
    pub num_build_cores: Option<u32>,
    pub start_clean: bool,
    pub verbose: bool,
}

/// Everything a backend needs, composed once per invocation.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub target: String,
    pub spec: TargetSpec,
    pub build_type: BuildType,
    pub num_build_cores: u32,
    pub start_clean: bool,
    pub verbose: bool,
    pub build_user: String,
    pub container_tech: String,
    pub entrypoint: String,
    pub inside_container: bool,
    pub env_defaults: BTreeMap<String, String>,
    pub env_overrides: BTreeMap<String, String>,
    pub mount_defaults: Vec<MountSpec>,
    pub mount_overrides: Vec<MountSpec>,
}

impl BuildConfig {
    pub fn compose(
        options: &BuildOptions,
        settings: &Settings,
        spec: TargetSpec,
        env_defaults: EnvDefaults,
        devconfig: Option<&DeveloperConfig>,
    ) -> Result<Self> {
        let (env_overrides, mount_overrides) = match devconfig {
            Some(dc) => (
                dc.environment.variables.clone(),
                dc.mounts(&settings.container_home)?,
            ),
            None => (BTreeMap::new(), Vec::new()),
        };

        Ok(Self {
            target: options.target.clone(),
            spec,
            build_type: options.build_type,
            num_build_cores: options.num_build_cores.unwrap_or(1),
            start_clean: options.start_clean,
            verbose: options.verbose,
            build_user: settings.build_user.clone(),
            container_tech: settings.container_tech.clone(),
            entrypoint: settings.entrypoint.clone(),
            inside_container: settings.inside_container,
            env_defaults: env_defaults.variables,
            env_overrides,
            // No configured default mounts yet; kept as a layer so the
            // append order stays fixed.
            mount_defaults: Vec::new(),
            mount_overrides,
        })
    }

    pub fn is_dev(&self) -> bool {
        self.build_type == BuildType::Dev
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_spec_parses_required_fields() {
        let json = r#"{
            "sdk_name": "yocto",
            "sdk_url": ["https://a", "https://b"],
            "sdk_tag": "kirkstone",
            "environment": {"variables": {"MACHINE": "qemuarm"}},
            "build_artifacts_archive_name": "acme-fw",
            "container_image_buildspec_file": "Dockerfile.yocto"
        }"#;
        let spec: TargetSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.sdk_url.len(), 2);
        assert_eq!(spec.environment.variables["MACHINE"], "qemuarm");
        assert!(spec.target.is_empty());
    }

    #[test]
    fn test_devconfig_mounts_keep_order_and_resolve_relative() {
        let json = r#"{
            "mounts": {
                "zeta": {"source": "/src/z", "target": "dl", "type": "bind"},
                "alpha": {"source": "/src/a", "target": "/abs/a", "type": "bind"}
            }
        }"#;
        let dc: DeveloperConfig = serde_json::from_str(json).unwrap();
        let mounts = dc.mounts(Path::new("/home/dev")).unwrap();
        assert_eq!(mounts[0], MountSpec::bind("/src/z", "/home/dev/dl"));
        assert_eq!(mounts[1], MountSpec::bind("/src/a", "/abs/a"));
    }

    #[test]
    fn test_validate_mounts_rejects_duplicate_destination() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mounts = vec![
            MountSpec::bind(tmp.path(), "/home/dev/x"),
            MountSpec::bind(tmp.path(), "/home/dev/x"),
        ];
        assert!(matches!(
            validate_mounts(mounts),
            Err(BuildError::MountConflict(_))
        ));
    }

    #[test]
    fn test_validate_mounts_rejects_missing_bind_source() {
        let mounts = vec![MountSpec::bind("/nonexistent/src", "/home/dev/x")];
        assert!(validate_mounts(mounts).is_err());
    }

    #[test]
    fn test_validate_mounts_keeps_order() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mounts = vec![
            MountSpec::bind(tmp.path(), "/b"),
            MountSpec::new("vol", "/a", "volume"),
        ];
        assert_eq!(validate_mounts(mounts.clone()).unwrap(), mounts);
    }
}
