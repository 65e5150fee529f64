//! Container engine abstraction.
//!
//! The build drives the engine as an opaque subprocess: images are built
//! from recipes in the staging tree, containers run one command, their
//! logs are streamed and their exit code collected. Everything is
//! synchronous; a call returns once the engine is done.

mod docker;

pub use docker::{DockerCli, DockerContainer};

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::BuildError;
use crate::spec::MountSpec;

/// How a new container is attached to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerOptions {
    /// Attach the terminal; logs are not captured.
    pub interactive: bool,
    /// Remove the container when it exits.
    pub ephemeral: bool,
}

/// Parameters of an image build.
#[derive(Debug, Clone)]
pub struct ImageBuild {
    pub no_cache: bool,
    pub context_dir: PathBuf,
    pub recipe: PathBuf,
    pub tag: String,
    pub build_args: BTreeMap<String, String>,
}

/// A container created from an image, valid for one call chain.
pub trait Container {
    fn set_mounts(&mut self, mounts: Vec<MountSpec>);

    /// Start the container running `cmd`.
    fn run(&mut self, cmd: &str) -> Result<()>;

    /// Stream log lines until the container stops.
    fn logs(&mut self, on_line: &mut dyn FnMut(&str)) -> Result<()>;

    /// Block until the container exits; returns its exit code.
    fn wait(&mut self) -> Result<i32>;

    /// Engine identifier, once started.
    fn id(&self) -> Option<String>;

    /// Force-remove the container. A no-op before it was started.
    fn remove(&mut self) -> Result<()>;
}

/// Image and container lifecycle operations of a container engine.
pub trait ContainerRuntime {
    fn image_exists(&self, tag: &str) -> Result<bool>;

    fn container_exists(&self, id: &str) -> Result<bool>;

    /// Build (or refresh) an image, feeding each output line to `on_line`.
    fn build_image(&self, build: &ImageBuild, on_line: &mut dyn FnMut(&str)) -> Result<()>;

    fn new_container(
        &self,
        tag: &str,
        env: BTreeMap<String, String>,
        options: ContainerOptions,
    ) -> Result<Box<dyn Container>>;

    /// Copy `src` out of a container as a tar archive written to `dst`.
    fn cp_from_container(&self, id: &str, src: &Path, dst: &Path, remove_after: bool)
        -> Result<()>;

    /// Copy `src` out of an image as a tar archive written to `dst`.
    fn cp_from_image(&self, tag: &str, src: &Path, dst: &Path) -> Result<()>;
}

/// Runtime for a named container technology.
pub fn runtime_for(tech: &str) -> Result<Box<dyn ContainerRuntime>> {
    match tech {
        "docker" => Ok(Box::new(DockerCli::new())),
        other => Err(BuildError::UnknownContainerTech(other.to_string()).into()),
    }
}
