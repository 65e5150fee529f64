//! Shared test utilities for sdkbuilder tests.
#![allow(dead_code)]

use anyhow::{bail, Result};
use sdkbuilder::commands::build::Collaborators;
use sdkbuilder::config::Settings;
use sdkbuilder::container::{Container, ContainerOptions, ContainerRuntime, ImageBuild};
use sdkbuilder::paths::PathMap;
use sdkbuilder::sdk::{SdkBackend, SdkParts, SdkRegistry};
use sdkbuilder::source::SourceFetcher;
use sdkbuilder::spec::{BuildConfig, BuildOptions, BuildType, DeveloperConfig, EnvDefaults, MountSpec, TargetSpec};
use serde_json::json;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;

pub const CONTAINER_HOME: &str = "/home/dev";

/// A throwaway project tree with the minimal in-tree layout.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Project root
    pub root: PathBuf,
    /// Scratch area outside the project, for out-of-tree inputs
    pub outside: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().join("project");
        let outside = temp_dir.path().join("ext");
        fs::create_dir_all(&outside).expect("Failed to create ext dir");
        create_project(&root);
        Self {
            _temp_dir: temp_dir,
            root,
            outside,
        }
    }

    pub fn settings(&self) -> Settings {
        Settings::from_vars(&HashMap::from([(
            "SDKBUILDER_CONTAINER_HOME".to_string(),
            CONTAINER_HOME.to_string(),
        )]))
    }

    pub fn paths(&self, target: Option<&str>) -> PathMap {
        PathMap::standard(&self.root, Path::new(CONTAINER_HOME), target, false)
    }

    pub fn tgroot(&self) -> PathBuf {
        self.root.join("spec/targets")
    }

    pub fn common(&self) -> PathBuf {
        self.tgroot().join("common")
    }

    /// Write a file under the project root.
    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.root.join(rel);
        write(&path, content);
        path
    }
}

pub fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    fs::write(path, content).expect("Failed to write file");
}

pub fn write_executable(path: &Path, content: &str) {
    write(path, content);
    let mut perms = fs::metadata(path).expect("Failed to get metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("Failed to set permissions");
}

pub fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_else(|e| panic!("Failed to read {}: {e}", path.display()))
}

fn target_spec_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "required": [
            "sdk_name", "sdk_url", "sdk_tag", "environment",
            "build_artifacts_archive_name", "container_image_buildspec_file"
        ],
        "properties": {
            "sdk_name": {"type": "string"},
            "sdk_url": {"type": "array", "items": {"type": "string"}},
            "sdk_tag": {"type": "string"},
            "environment": {
                "type": "object",
                "required": ["variables"],
                "properties": {"variables": {"type": "object"}}
            },
            "build_artifacts_archive_name": {"type": "string"},
            "container_image_buildspec_file": {"$ref": "#/$defs/buildspecs"}
        }
    })
}

/// Populate `root` with specs, schemas, steps, common layers and a hook runner.
pub fn create_project(root: &Path) {
    let specs = root.join("spec");
    let schemas = specs.join("json_schema");
    write(&schemas.join("target_spec.schema.json"), &target_spec_schema().to_string());
    write(
        &schemas.join("build_steps.schema.json"),
        &json!({"type": "object", "required": ["steps"]}).to_string(),
    );
    write(
        &schemas.join("environment.schema.json"),
        &json!({"type": "object", "required": ["variables"]}).to_string(),
    );
    write(
        &schemas.join("developer_config.schema.json"),
        &json!({"type": "object"}).to_string(),
    );

    write(
        &specs.join("steps/automated_build.json"),
        &json!({"steps": [
            {"checkout": "host"},
            {"populate_staging_dir": "host"},
            {"build_container_image": "host"},
            {"run_staged_build": "container"},
            {"retrieve_build_artifacts": "host"}
        ]})
        .to_string(),
    );
    write(
        &specs.join("steps/dev_build.json"),
        &json!({"steps": [
            {"checkout": "host"},
            {"populate_staging_dir": "host"},
            {"build_container_image": "host"},
            {"build": "host"},
            {"retrieve_build_artifacts": "host"}
        ]})
        .to_string(),
    );
    write(&specs.join("container_image_buildspec/yocto.Dockerfile"), "FROM scratch\n");
    write(&specs.join("container_image_buildspec/openwrt.Dockerfile"), "FROM scratch\n");
    write(&specs.join("depends/host.txt"), "git\n");

    let common = specs.join("targets/common");
    write(
        &common.join("specs/environment.json"),
        &json!({"variables": {"LAYER": "defaults", "TZ": "UTC"}}).to_string(),
    );
    write_executable(&common.join("scripts/hooks/run_hooks"), "#!/bin/sh\necho hook \"$1\"\n");
    write(&common.join("files/system_config/common/hostname"), "common\n");
    write(&common.join("files/sdk_config/common/feeds.conf"), "common\n");
    write(&root.join("src/main.rs"), "fn main() {}\n");
}

/// A target spec document.
pub fn spec_json(sdk_name: &str, urls: &[&str]) -> String {
    json!({
        "sdk_name": sdk_name,
        "sdk_url": urls,
        "sdk_tag": "v1.0",
        "environment": {"variables": {"LAYER": "family", "MACHINE": "qemuarm"}},
        "build_artifacts_archive_name": "firmware",
        "container_image_buildspec_file": format!("{sdk_name}.Dockerfile")
    })
    .to_string()
}

/// Create `<parent>/<name>/<name>_spec.json`; returns the target dir.
pub fn create_target(parent: &Path, name: &str, sdk_name: &str) -> PathBuf {
    let dir = parent.join(name);
    write(&dir.join(format!("{name}_spec.json")), &spec_json(sdk_name, &["https://mirror.example/sdk.git"]));
    dir
}

pub fn target_spec(name: &str, sdk_name: &str, urls: &[&str]) -> TargetSpec {
    let mut spec: TargetSpec = serde_json::from_str(&spec_json(sdk_name, urls)).unwrap();
    spec.target = name.to_string();
    spec
}

// =============================================================================
// Fake container runtime
// =============================================================================

/// A container started through [`FakeRuntime`].
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<MountSpec>,
    pub options: ContainerOptions,
    pub cmd: String,
}

#[derive(Debug, Default)]
pub struct RuntimeState {
    pub images: HashSet<String>,
    pub containers: HashSet<String>,
    pub builds: Vec<ImageBuild>,
    pub runs: Vec<RunRecord>,
    pub copies: Vec<(String, PathBuf, PathBuf)>,
    pub exit_code: i32,
    pub log_lines: Vec<String>,
    /// Make `wait` fail as if the engine connection dropped.
    pub fail_wait: bool,
}

/// Records every call; images and containers exist only in memory.
#[derive(Clone, Default)]
pub struct FakeRuntime {
    pub state: Rc<RefCell<RuntimeState>>,
}

impl FakeRuntime {
    pub fn with_image(tag: &str) -> Self {
        let rt = Self::default();
        rt.state.borrow_mut().images.insert(tag.to_string());
        rt
    }
}

fn write_empty_tar(dst: &Path) -> Result<()> {
    let file = fs::File::create(dst)?;
    let mut builder = tar::Builder::new(file);
    let mut header = tar::Header::new_gnu();
    let data = b"artifact";
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, "out/firmware.bin", &data[..])?;
    builder.finish()?;
    Ok(())
}

impl ContainerRuntime for FakeRuntime {
    fn image_exists(&self, tag: &str) -> Result<bool> {
        Ok(self.state.borrow().images.contains(tag))
    }

    fn container_exists(&self, id: &str) -> Result<bool> {
        Ok(self.state.borrow().containers.contains(id))
    }

    fn build_image(&self, build: &ImageBuild, on_line: &mut dyn FnMut(&str)) -> Result<()> {
        on_line("Step 1/1 : FROM scratch");
        let mut state = self.state.borrow_mut();
        state.images.insert(build.tag.clone());
        state.builds.push(build.clone());
        Ok(())
    }

    fn new_container(
        &self,
        tag: &str,
        env: BTreeMap<String, String>,
        options: ContainerOptions,
    ) -> Result<Box<dyn Container>> {
        Ok(Box::new(FakeContainer {
            state: self.state.clone(),
            image: tag.to_string(),
            env,
            mounts: Vec::new(),
            options,
            id: None,
        }))
    }

    fn cp_from_container(&self, id: &str, src: &Path, dst: &Path, remove_after: bool) -> Result<()> {
        write_empty_tar(dst)?;
        let mut state = self.state.borrow_mut();
        state.copies.push((id.to_string(), src.to_path_buf(), dst.to_path_buf()));
        if remove_after {
            state.containers.remove(id);
        }
        Ok(())
    }

    fn cp_from_image(&self, tag: &str, src: &Path, dst: &Path) -> Result<()> {
        write_empty_tar(dst)?;
        self.state
            .borrow_mut()
            .copies
            .push((tag.to_string(), src.to_path_buf(), dst.to_path_buf()));
        Ok(())
    }
}

pub struct FakeContainer {
    state: Rc<RefCell<RuntimeState>>,
    image: String,
    env: BTreeMap<String, String>,
    mounts: Vec<MountSpec>,
    options: ContainerOptions,
    id: Option<String>,
}

impl Container for FakeContainer {
    fn set_mounts(&mut self, mounts: Vec<MountSpec>) {
        self.mounts = mounts;
    }

    fn run(&mut self, cmd: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let id = format!("c{}", state.runs.len());
        state.containers.insert(id.clone());
        state.runs.push(RunRecord {
            image: self.image.clone(),
            env: self.env.clone(),
            mounts: self.mounts.clone(),
            options: self.options,
            cmd: cmd.to_string(),
        });
        self.id = Some(id);
        Ok(())
    }

    fn logs(&mut self, on_line: &mut dyn FnMut(&str)) -> Result<()> {
        for line in self.state.borrow().log_lines.iter() {
            on_line(line);
        }
        Ok(())
    }

    fn wait(&mut self) -> Result<i32> {
        let state = self.state.borrow();
        if state.fail_wait {
            bail!("engine connection lost");
        }
        Ok(state.exit_code)
    }

    fn id(&self) -> Option<String> {
        self.id.clone()
    }

    fn remove(&mut self) -> Result<()> {
        if let Some(id) = self.id.take() {
            self.state.borrow_mut().containers.remove(&id);
        }
        Ok(())
    }
}

// =============================================================================
// Fake source fetcher
// =============================================================================

const REPO_MARKER: &str = ".fake-repo";

#[derive(Debug, Default)]
pub struct FetchState {
    pub failing_urls: HashSet<String>,
    pub clones: Vec<String>,
    pub checkouts: Vec<(PathBuf, String)>,
}

/// Clones by creating a directory; failing URLs leave a partial clone
/// behind before erroring.
#[derive(Clone, Default)]
pub struct FakeFetcher {
    pub state: Rc<RefCell<FetchState>>,
}

impl FakeFetcher {
    pub fn failing(urls: &[&str]) -> Self {
        let fetcher = Self::default();
        fetcher
            .state
            .borrow_mut()
            .failing_urls
            .extend(urls.iter().map(|u| u.to_string()));
        fetcher
    }
}

impl SourceFetcher for FakeFetcher {
    fn is_repository(&self, dir: &Path) -> bool {
        dir.join(REPO_MARKER).exists()
    }

    fn checkout_tag(&self, dir: &Path, tag: &str) -> Result<()> {
        self.state
            .borrow_mut()
            .checkouts
            .push((dir.to_path_buf(), tag.to_string()));
        Ok(())
    }

    fn clone_tag(&self, url: &str, _tag: &str, dest: &Path) -> Result<()> {
        self.state.borrow_mut().clones.push(url.to_string());
        fs::create_dir_all(dest)?;
        fs::write(dest.join("partial"), url)?;
        if self.state.borrow().failing_urls.contains(url) {
            bail!("fatal: could not read from {url}");
        }
        fs::write(dest.join(REPO_MARKER), "")?;
        Ok(())
    }
}

// =============================================================================
// Backend construction
// =============================================================================

pub fn collaborators(runtime: &FakeRuntime, fetcher: &FakeFetcher) -> Collaborators {
    Collaborators {
        registry: SdkRegistry::builtin(),
        runtime: Box::new(runtime.clone()),
        fetcher: Box::new(fetcher.clone()),
    }
}

pub fn options(target: &str, build_type: BuildType) -> BuildOptions {
    BuildOptions {
        target: target.to_string(),
        build_type,
        num_build_cores: Some(4),
        start_clean: false,
        verbose: true,
    }
}

/// Backend over `env` for `spec`, built through the registry.
pub fn backend(
    env: &TestEnv,
    spec: TargetSpec,
    opts: &BuildOptions,
    settings: &Settings,
    devconfig: Option<&DeveloperConfig>,
    runtime: &FakeRuntime,
    fetcher: &FakeFetcher,
) -> Box<dyn SdkBackend> {
    let defaults: EnvDefaults =
        serde_json::from_str(r#"{"variables": {"LAYER": "defaults", "TZ": "UTC"}}"#).unwrap();
    let config = BuildConfig::compose(opts, settings, spec, defaults, devconfig).unwrap();
    let paths = PathMap::standard(
        &env.root,
        Path::new(CONTAINER_HOME),
        Some(&opts.target),
        settings.inside_container,
    );
    SdkRegistry::builtin()
        .create(SdkParts {
            config,
            paths,
            runtime: Box::new(runtime.clone()),
            fetcher: Box::new(fetcher.clone()),
        })
        .unwrap()
}
