//! SDK backends.
//!
//! A backend owns the build lifecycle of one SDK family: checkout,
//! environment and mount computation, the staged build, restricted builds
//! in a prebuilt image, and artifact retrieval. Families are registered by
//! name in [`SdkRegistry`]; the target spec's `sdk_name` picks one.

mod standard;
pub mod task;

pub use standard::StandardSdk;
pub use task::{load_steps, parse_steps, Hook, Step, Task};

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::container::ContainerRuntime;
use crate::error::BuildError;
use crate::paths::PathMap;
use crate::source::SourceFetcher;
use crate::spec::{BuildConfig, MountSpec};

/// Build lifecycle operations of an SDK family.
pub trait SdkBackend {
    /// Family name, e.g. `openwrt`.
    fn family(&self) -> &str;

    /// Tag of the image this build runs in.
    fn image_tag(&self) -> &str;

    fn checkout(&mut self) -> Result<()>;

    /// Environment for build scripts and containers, later layers winning:
    /// inherited (optional), defaults, family vars, computed, overrides.
    fn get_env_vars(&self, inherit: bool) -> Result<BTreeMap<String, String>>;

    /// Host mounts for the build container. Empty unless a dev build on
    /// the host.
    fn get_mounts(&self, validate: bool) -> Result<Vec<MountSpec>>;

    fn populate_staging_dir(&mut self) -> Result<()>;

    fn run_staged_build(&mut self) -> Result<()>;

    /// Full build for automated builds, firmware-only for dev builds.
    fn build(&mut self) -> Result<()>;

    fn build_only_firmware(&mut self) -> Result<()>;

    fn build_single_packages(&mut self, packages: &[String]) -> Result<()>;

    fn get_interactive_container(&mut self, ephemeral: bool) -> Result<()>;

    fn build_container_image(&mut self, short_circuit: bool) -> Result<()>;

    /// Copy build output into the artifacts archive. Returns the archive.
    fn retrieve_build_artifacts(
        &mut self,
        source: Option<&Path>,
        archive_prefix: Option<&str>,
    ) -> Result<PathBuf>;

    fn run_hook(&mut self, hook: Hook) -> Result<()>;

    /// Run an invocable task.
    fn execute_task(&mut self, task: Task) -> Result<()> {
        match task {
            Task::Checkout => self.checkout(),
            Task::Build => self.build(),
            Task::RunStagedBuild => self.run_staged_build(),
            Task::BuildOnlyFirmware => self.build_only_firmware(),
            Task::BuildContainerImage => self.build_container_image(false),
            Task::RetrieveBuildArtifacts => self.retrieve_build_artifacts(None, None).map(|_| ()),
            Task::PopulateStagingDir => self.populate_staging_dir(),
            Task::PrepareSystem | Task::PrepareSdk | Task::InstallConfigs => match task.hook() {
                Some(hook) => self.run_hook(hook),
                None => Err(BuildError::TaskNotInvocable(task.name().to_string()).into()),
            },
            Task::BuildSinglePackages
            | Task::GetInteractiveContainer
            | Task::GetEnvVars
            | Task::GetMounts => Err(BuildError::TaskNotInvocable(task.name().to_string()).into()),
        }
    }

    /// Resolve `name` and run it.
    fn execute_task_by_name(&mut self, name: &str) -> Result<()> {
        let task = Task::invocable(name)?;
        self.execute_task(task)
    }
}

/// Everything a backend is built from.
pub struct SdkParts {
    pub config: BuildConfig,
    pub paths: PathMap,
    pub runtime: Box<dyn ContainerRuntime>,
    pub fetcher: Box<dyn SourceFetcher>,
}

pub type SdkConstructor = fn(SdkParts) -> Result<Box<dyn SdkBackend>>;

fn openwrt(parts: SdkParts) -> Result<Box<dyn SdkBackend>> {
    Ok(Box::new(StandardSdk::new("openwrt", parts)?))
}

fn yocto(parts: SdkParts) -> Result<Box<dyn SdkBackend>> {
    Ok(Box::new(StandardSdk::new("yocto", parts)?))
}

/// Name → constructor table of SDK families.
#[derive(Clone)]
pub struct SdkRegistry {
    constructors: BTreeMap<String, SdkConstructor>,
}

impl SdkRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Registry with the built-in families.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("openwrt", openwrt);
        registry.register("yocto", yocto);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, constructor: SdkConstructor) {
        self.constructors.insert(name.into(), constructor);
    }

    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    /// Instantiate the backend for the family named by the target spec.
    pub fn create(&self, parts: SdkParts) -> Result<Box<dyn SdkBackend>> {
        let name = parts.config.spec.sdk_name.clone();
        let constructor = self
            .constructors
            .get(&name)
            .ok_or(BuildError::UnknownSdk(name))?;
        constructor(parts)
    }
}

impl Default for SdkRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_families() {
        assert_eq!(SdkRegistry::builtin().names(), ["openwrt", "yocto"]);
        assert!(SdkRegistry::empty().names().is_empty());
    }
}
