//! The default backend, shared by every registered SDK family.

use anyhow::{Context, Result};
use chrono::Local;
use nix::unistd::{getgid, getuid};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::{Hook, SdkBackend, SdkParts};
use crate::common::{append_to_tarball, sorted_scripts};
use crate::container::{Container, ContainerOptions, ContainerRuntime, ImageBuild};
use crate::error::BuildError;
use crate::overlay::{OverlayComposer, HOOK_RUNNER, STAGES};
use crate::paths::{BuildContext, PathMap};
use crate::process::Cmd;
use crate::source::SourceFetcher;
use crate::spec::{validate_mounts, BuildConfig, BuildType, MountSpec};

/// Interactive session command.
const SHELL: &str = "/bin/bash";

/// Flag that makes a nested invocation exit immediately.
pub const SHORT_CIRCUIT_FLAG: &str = "--skip-all";

fn time_string() -> String {
    Local::now().format("%b %d %Y ~ %H:%M").to_string()
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Backend implementing the standard lifecycle. Families differ only in
/// name, which selects their layers in the staging tree.
pub struct StandardSdk {
    family: String,
    config: BuildConfig,
    paths: PathMap,
    runtime: Box<dyn ContainerRuntime>,
    fetcher: Box<dyn SourceFetcher>,
    dir_name: String,
    checkout_path: PathBuf,
    image_tag: String,
    /// Last container used by a restricted build, kept for retrieval.
    container: Option<Box<dyn Container>>,
}

impl StandardSdk {
    pub fn new(family: &str, parts: SdkParts) -> Result<Self> {
        let SdkParts {
            config,
            paths,
            runtime,
            fetcher,
        } = parts;
        let spec = &config.spec;
        let dir_name = format!("{}_{}", spec.sdk_name, spec.sdk_tag);
        let checkout_path = paths.path("sdk_path")?.join(&dir_name);
        let image_tag = format!(
            "{}_{}:latest_{}_{}",
            spec.sdk_name, spec.sdk_tag, config.build_type, config.target
        )
        .to_lowercase();

        let sdk = Self {
            family: family.to_string(),
            config,
            paths,
            runtime,
            fetcher,
            dir_name,
            checkout_path,
            image_tag,
            container: None,
        };
        sdk.record_timestamp("Started:   ")?;
        Ok(sdk)
    }

    pub fn checkout_path(&self) -> &Path {
        &self.checkout_path
    }

    fn container_path(&self, label: &str) -> Result<PathBuf> {
        Ok(self.paths.get(BuildContext::Container, label)?)
    }

    /// A staged-tree location as seen from where we run: the container
    /// base directory inside the container, the staging tree on the host.
    fn staged_path(&self, label: &str) -> Result<PathBuf> {
        let context = match self.paths.current() {
            BuildContext::Container => BuildContext::Container,
            _ => BuildContext::Staging,
        };
        Ok(self.paths.get(context, label)?)
    }

    /// Append a line to the host timestamp file. No-op where there is none.
    fn record_timestamp(&self, what: &str) -> Result<()> {
        let Some(path) = self.paths.try_get(self.paths.current(), "timestamp") else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        writeln!(file, "{what} {}", time_string())?;
        Ok(())
    }

    fn computed_env(&self) -> Result<BTreeMap<String, String>> {
        let inherited_pythonpath = std::env::var("PYTHONPATH").unwrap_or_default();
        let mut env = BTreeMap::new();
        env.insert(
            "VERBOSE".to_string(),
            if self.config.verbose { "Y" } else { "" }.to_string(),
        );
        env.insert(
            "BUILD_ARTIFACTS_OUTDIR".to_string(),
            path_str(&self.container_path("outdir")?),
        );
        env.insert(
            "PACKAGE_OUTDIR".to_string(),
            path_str(&self.container_path("pkg_outdir")?),
        );
        env.insert(
            "NUM_BUILD_CORES".to_string(),
            self.config.num_build_cores.to_string(),
        );
        env.insert(
            "PYTHONPATH".to_string(),
            format!(
                "{inherited_pythonpath}:{}:{}",
                self.container_path("basedir")?.display(),
                self.container_path("src")?.display()
            ),
        );
        env.insert(
            "CONFIGS_DIR".to_string(),
            path_str(&self.container_path("files")?),
        );
        env.insert(
            "SDK_TOPDIR".to_string(),
            path_str(&self.container_path("sdk_path")?.join(&self.dir_name)),
        );
        Ok(env)
    }

    fn require_image(&self) -> Result<()> {
        if !self.runtime.image_exists(&self.image_tag)? {
            warn!("Action not possible: no appropriate container image found");
            return Err(BuildError::ImageNotFound(self.image_tag.clone()).into());
        }
        Ok(())
    }

    /// Run `cmd` in a fresh container from the build image and stream its
    /// logs. A non-zero exit is returned as [`BuildError::ContainerExit`].
    fn run_in_container(&mut self, env: BTreeMap<String, String>, cmd: &str) -> Result<()> {
        self.require_image()?;
        let mut container =
            self.runtime
                .new_container(&self.image_tag, env, ContainerOptions::default())?;
        container.set_mounts(self.get_mounts(true)?);

        info!("Starting container with cmd '{cmd}'");
        container.run(cmd)?;
        let outcome = container
            .logs(&mut |line| info!("{line}"))
            .and_then(|()| container.wait())
            .and_then(|code| {
                info!("Container exited with exit code {code}");
                if code != 0 {
                    return Err(BuildError::ContainerExit { code }.into());
                }
                Ok(())
            });
        // Only a successful container is kept for artifact retrieval.
        if let Err(e) = outcome {
            if let Err(rm) = container.remove() {
                warn!("Failed to remove container: {rm:#}");
            }
            return Err(e);
        }
        self.container = Some(container);
        Ok(())
    }

    /// Run one executable with the computed environment, logging its output.
    fn run_script(&self, script: &Path, env: &BTreeMap<String, String>, args: &[&str]) -> Result<()> {
        let cwd = self.staged_path("basedir")?;
        let mut stream = Cmd::new(path_str(script))
            .args(args)
            .dir(&cwd)
            .env_clear()
            .envs(env)
            .error_msg(format!("{} failed", script.display()))
            .stream()?;
        for line in stream.by_ref() {
            info!("{line}");
        }
        stream.finish()?;
        Ok(())
    }

    fn build_args(&self, short_circuit: bool) -> Result<BTreeMap<String, String>> {
        let basedir = self.paths.get(BuildContext::Host, "basedir")?;
        let relative = |label: &str| -> Result<String> {
            let staged = self.paths.get(BuildContext::Staging, label)?;
            let rel = staged.strip_prefix(&basedir).with_context(|| {
                format!("{} is outside {}", staged.display(), basedir.display())
            })?;
            Ok(path_str(&Path::new(".").join(rel)))
        };
        let flag = |on: bool, value: &str| if on { value.to_string() } else { String::new() };

        let user = self.config.build_user.clone();
        Ok(BTreeMap::from([
            ("UID".to_string(), getuid().to_string()),
            ("GID".to_string(), getgid().to_string()),
            ("USER".to_string(), user.clone()),
            ("GROUP".to_string(), user),
            ("SDK_DIRNAME".to_string(), self.dir_name.clone()),
            ("TARGET".to_string(), self.config.target.clone()),
            ("QUIET_MODE_CLI_FLAG".to_string(), flag(!self.config.verbose, "--quiet")),
            (
                "NUM_BUILD_CORES_CLI_FLAG".to_string(),
                format!("--cores={}", self.config.num_build_cores),
            ),
            (
                "BUILD_ARTIFACTS_OUTDIR".to_string(),
                path_str(&self.container_path("outdir")?),
            ),
            ("DEV_BUILD_CLI_FLAG".to_string(), flag(self.config.is_dev(), "-d")),
            (
                "SHORT_CIRCUIT_MAGIC_CLI_FLAG".to_string(),
                flag(short_circuit, SHORT_CIRCUIT_FLAG),
            ),
            ("SYSTEM_CONFIGS".to_string(), relative("system_configs")?),
            ("SDK_CONFIGS".to_string(), relative("sdk_configs")?),
        ]))
    }
}

impl SdkBackend for StandardSdk {
    fn family(&self) -> &str {
        &self.family
    }

    fn image_tag(&self) -> &str {
        &self.image_tag
    }

    fn checkout(&mut self) -> Result<()> {
        let urls = &self.config.spec.sdk_url;
        let tag = &self.config.spec.sdk_tag;
        let path = &self.checkout_path;
        if urls.is_empty() {
            return Err(BuildError::NoMirrors.into());
        }

        if self.config.start_clean && path.exists() {
            info!("Removing {} for clean build", path.display());
            fs::remove_dir_all(path)?;
        }

        if path.exists() {
            if self.fetcher.is_repository(path) {
                info!("Checking out {tag} in {}", path.display());
                return self.fetcher.checkout_tag(path, tag);
            }
            warn!("Removing stale checkout {}", path.display());
            fs::remove_dir_all(path)?;
        }

        for url in urls {
            info!("Cloning {url} ({tag}) into {}", path.display());
            match self.fetcher.clone_tag(url, tag, path) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("Failed to clone sdk repo from {url}: {e:#}");
                    if path.exists() {
                        fs::remove_dir_all(path).with_context(|| {
                            format!("Failed to remove partial clone {}", path.display())
                        })?;
                    }
                }
            }
        }
        Err(BuildError::MirrorsExhausted { urls: urls.clone() }.into())
    }

    fn get_env_vars(&self, inherit: bool) -> Result<BTreeMap<String, String>> {
        let mut env = BTreeMap::new();
        if inherit {
            env.extend(std::env::vars());
        }
        env.extend(self.config.env_defaults.clone());
        env.extend(self.config.spec.environment.variables.clone());
        env.extend(self.computed_env()?);
        env.extend(self.config.env_overrides.clone());
        Ok(env)
    }

    fn get_mounts(&self, validate: bool) -> Result<Vec<MountSpec>> {
        if self.config.build_type != BuildType::Dev || self.config.inside_container {
            return Ok(Vec::new());
        }

        let mut mounts = self.config.mount_defaults.clone();
        mounts.push(MountSpec::bind(
            &self.checkout_path,
            self.container_path("home")?.join(&self.dir_name),
        ));
        mounts.push(MountSpec::bind(
            self.paths.get(BuildContext::Host, "staging")?,
            self.container_path("basedir")?,
        ));
        mounts.extend(self.config.mount_overrides.iter().cloned());

        if validate {
            Ok(validate_mounts(mounts)?)
        } else {
            Ok(mounts)
        }
    }

    fn populate_staging_dir(&mut self) -> Result<()> {
        OverlayComposer::new(&self.paths, &self.config.spec.sdk_name).populate_staging_dir()?;
        Ok(())
    }

    fn run_staged_build(&mut self) -> Result<()> {
        let env = self.get_env_vars(true)?;
        let scripts = self.staged_path("scripts")?;
        for stage in STAGES {
            info!(
                "============| Stage: {stage} [{}] |============",
                Local::now().format("%H:%M:%S")
            );
            for script in sorted_scripts(&scripts.join(stage))? {
                info!("Running {}", script.display());
                self.run_script(&script, &env, &[])?;
            }
        }
        Ok(())
    }

    fn build(&mut self) -> Result<()> {
        match self.config.build_type {
            BuildType::Automated => self.run_staged_build(),
            BuildType::Dev => self.build_only_firmware(),
        }
    }

    fn build_only_firmware(&mut self) -> Result<()> {
        info!("Restricted firmware-only build using prebuilt sdk");
        let env = self.get_env_vars(false)?;
        let cmd = format!(
            "{} build -t {} --cores={}",
            self.container_path("src")?.join(&self.config.entrypoint).display(),
            self.config.target,
            self.config.num_build_cores
        );
        self.run_in_container(env, &cmd)
    }

    fn build_single_packages(&mut self, packages: &[String]) -> Result<()> {
        info!("Restricted build for packages: {packages:?}");
        let mut env = self.get_env_vars(false)?;
        env.insert("PACKAGES_TO_BUILD".to_string(), packages.join(" "));
        let cmd = format!(
            "{} {}",
            self.container_path("hooks")?.join(HOOK_RUNNER).display(),
            Hook::BuildPackages
        );
        self.run_in_container(env, &cmd)
    }

    fn get_interactive_container(&mut self, ephemeral: bool) -> Result<()> {
        info!("Getting interactive container for image '{}'", self.image_tag);
        self.require_image()?;
        let env = self.get_env_vars(false)?;
        let options = ContainerOptions {
            interactive: true,
            ephemeral,
        };
        let mut container = self.runtime.new_container(&self.image_tag, env, options)?;
        container.set_mounts(self.get_mounts(true)?);
        info!("Starting container with cmd '{SHELL}'");
        container.run(SHELL)
    }

    fn build_container_image(&mut self, short_circuit: bool) -> Result<()> {
        let recipe = self
            .paths
            .get(BuildContext::Staging, "buildspecs")?
            .join(&self.config.spec.container_image_buildspec_file);
        let build = ImageBuild {
            no_cache: self.config.start_clean,
            context_dir: self.paths.get(BuildContext::Host, "basedir")?,
            recipe,
            tag: self.image_tag.clone(),
            build_args: self.build_args(short_circuit)?,
        };
        info!("Building container image {}", build.tag);
        self.runtime
            .build_image(&build, &mut |line| info!("{line}"))?;
        info!("Container image build done");
        Ok(())
    }

    fn retrieve_build_artifacts(
        &mut self,
        source: Option<&Path>,
        archive_prefix: Option<&str>,
    ) -> Result<PathBuf> {
        let outdir = self.paths.path("outdir")?;
        fs::create_dir_all(&outdir)?;
        let archive = outdir.join(format!("{}.tar", self.config.spec.build_artifacts_archive_name));
        let src = match source {
            Some(p) => p.to_path_buf(),
            None => self.container_path("outdir")?,
        };
        let prefix = match archive_prefix {
            Some(p) => p.to_string(),
            None => src
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };

        match (self.container.take(), self.config.build_type) {
            (Some(container), _) => {
                info!("Copying artifacts from scope-restricted build");
                let id = container
                    .id()
                    .ok_or_else(|| BuildError::ContainerNotFound(self.image_tag.clone()))?;
                if !self.runtime.container_exists(&id)? {
                    return Err(BuildError::ContainerNotFound(id).into());
                }
                self.runtime.cp_from_container(&id, &src, &archive, true)?;
            }
            (None, BuildType::Automated) => {
                info!("Copying full build artifacts");
                self.require_image()?;
                self.runtime.cp_from_image(&self.image_tag, &src, &archive)?;
            }
            (None, BuildType::Dev) => {
                return Err(BuildError::ContainerNotFound(self.image_tag.clone()).into());
            }
        }

        self.record_timestamp("Completed: ")?;
        let current = self.paths.current();
        let extras: Vec<PathBuf> = ["buildlog", "timestamp"]
            .into_iter()
            .filter_map(|label| self.paths.try_get(current, label))
            .filter(|p| p.is_file())
            .collect();
        let extras: Vec<&Path> = extras.iter().map(PathBuf::as_path).collect();
        append_to_tarball(&archive, &extras, &prefix)?;
        info!("Artifacts bundled in {}", archive.display());
        Ok(archive)
    }

    fn run_hook(&mut self, hook: Hook) -> Result<()> {
        let runner = self.staged_path("hooks")?.join(HOOK_RUNNER);
        info!("[Hook runner] {} {hook}", runner.display());
        let env = self.get_env_vars(true)?;
        self.run_script(&runner, &env, &[hook.as_str()])
    }
}
