//! Docker engine driven through the `docker` CLI.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use super::{Container, ContainerOptions, ContainerRuntime, ImageBuild};
use crate::error::BuildError;
use crate::process::Cmd;
use crate::spec::MountSpec;

const DOCKER: &str = "docker";

fn env_args(env: &BTreeMap<String, String>) -> Vec<String> {
    env.iter()
        .flat_map(|(k, v)| ["-e".to_string(), format!("{k}={v}")])
        .collect()
}

fn mount_args(mounts: &[MountSpec]) -> Vec<String> {
    mounts
        .iter()
        .flat_map(|m| {
            [
                "--mount".to_string(),
                format!(
                    "type={},source={},target={}",
                    m.kind,
                    m.source.display(),
                    m.destination.display()
                ),
            ]
        })
        .collect()
}

/// [`ContainerRuntime`] backed by the docker CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
}

impl DockerCli {
    pub fn new() -> Self {
        Self {
            program: DOCKER.to_string(),
        }
    }

    fn cmd(&self) -> Cmd {
        Cmd::new(&self.program)
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerRuntime for DockerCli {
    fn image_exists(&self, tag: &str) -> Result<bool> {
        let result = self
            .cmd()
            .args(["image", "inspect", tag])
            .allow_fail()
            .run()?;
        Ok(result.success())
    }

    fn container_exists(&self, id: &str) -> Result<bool> {
        let result = self
            .cmd()
            .args(["container", "inspect", id])
            .allow_fail()
            .run()?;
        Ok(result.success())
    }

    fn build_image(&self, build: &ImageBuild, on_line: &mut dyn FnMut(&str)) -> Result<()> {
        let mut cmd = self.cmd().args(["build", "--network", "host", "--rm"]);
        if build.no_cache {
            cmd = cmd.arg("--no-cache");
        }
        cmd = cmd
            .arg("-f")
            .arg_path(&build.recipe)
            .args(["-t", &build.tag]);
        for (k, v) in &build.build_args {
            cmd = cmd.arg("--build-arg").arg(format!("{k}={v}"));
        }
        cmd = cmd.arg_path(&build.context_dir);

        debug!("{}", cmd.display());
        let mut stream = cmd.stream()?;
        for line in stream.by_ref() {
            if !line.is_empty() {
                on_line(&line);
            }
        }
        stream
            .finish()
            .map_err(|e| BuildError::ImageBuildFailed(format!("{e:#}")))?;
        Ok(())
    }

    fn new_container(
        &self,
        tag: &str,
        env: BTreeMap<String, String>,
        options: ContainerOptions,
    ) -> Result<Box<dyn Container>> {
        Ok(Box::new(DockerContainer {
            program: self.program.clone(),
            image: tag.to_string(),
            env,
            mounts: Vec::new(),
            options,
            id: None,
            exit_code: None,
        }))
    }

    fn cp_from_container(
        &self,
        id: &str,
        src: &Path,
        dst: &Path,
        remove_after: bool,
    ) -> Result<()> {
        if !self.container_exists(id)? {
            return Err(BuildError::ContainerNotFound(id.to_string()).into());
        }
        self.cmd()
            .arg("cp")
            .arg(format!("{id}:{}", src.display()))
            .arg("-")
            .stdout_to(dst)
            .error_msg(format!("Failed to copy {} out of container {id}", src.display()))
            .run()?;
        if remove_after {
            self.cmd().args(["rm", "--force", id]).run()?;
        }
        Ok(())
    }

    fn cp_from_image(&self, tag: &str, src: &Path, dst: &Path) -> Result<()> {
        if !self.image_exists(tag)? {
            return Err(BuildError::ImageNotFound(tag.to_string()).into());
        }
        // Images cannot be copied from directly; go through a throwaway
        // container.
        let created = self
            .cmd()
            .args(["create", tag])
            .error_msg(format!("Failed to create container from {tag}"))
            .run()?;
        let id = created.stdout_trimmed().to_string();
        let copied = self.cp_from_container(&id, src, dst, false);
        self.cmd().args(["rm", "--force", &id]).allow_fail().run()?;
        copied
    }
}

/// A container started through the docker CLI.
pub struct DockerContainer {
    program: String,
    image: String,
    env: BTreeMap<String, String>,
    mounts: Vec<MountSpec>,
    options: ContainerOptions,
    id: Option<String>,
    exit_code: Option<i32>,
}

impl DockerContainer {
    fn require_id(&self) -> Result<&str> {
        match &self.id {
            Some(id) => Ok(id),
            None => bail!("Container for {} has not been started", self.image),
        }
    }

    fn interact(&mut self, cmd: &str) -> Result<()> {
        let mut docker = Cmd::new(&self.program).arg("run");
        if self.options.ephemeral {
            docker = docker.arg("--rm");
        }
        docker = docker
            .args(["--network", "host"])
            .args(env_args(&self.env))
            .args(mount_args(&self.mounts))
            .args(["-it", &self.image])
            .args(cmd.split_whitespace())
            .allow_fail();
        let status = docker.run_interactive()?;
        self.exit_code = Some(status.code().unwrap_or(-1));
        Ok(())
    }
}

impl Container for DockerContainer {
    fn set_mounts(&mut self, mounts: Vec<MountSpec>) {
        self.mounts = mounts;
    }

    fn run(&mut self, cmd: &str) -> Result<()> {
        if self.options.interactive {
            return self.interact(cmd);
        }
        let mut docker = Cmd::new(&self.program).args(["run", "--detach", "--network", "host"]);
        if self.options.ephemeral {
            docker = docker.arg("--rm");
        }
        let result = docker
            .args(env_args(&self.env))
            .args(mount_args(&self.mounts))
            .arg(&self.image)
            .args(cmd.split_whitespace())
            .error_msg(format!("Failed to start container from {}", self.image))
            .run()
            .context("docker run")?;
        self.id = Some(result.stdout_trimmed().to_string());
        Ok(())
    }

    fn logs(&mut self, on_line: &mut dyn FnMut(&str)) -> Result<()> {
        if self.options.interactive {
            bail!("Interactive containers do not return logs");
        }
        let id = self.require_id()?.to_string();
        let mut stream = Cmd::new(&self.program)
            .args(["logs", "--follow", &id])
            .allow_fail()
            .stream()?;
        for line in stream.by_ref() {
            on_line(&line);
        }
        stream.finish()?;
        Ok(())
    }

    fn wait(&mut self) -> Result<i32> {
        if let Some(code) = self.exit_code {
            return Ok(code);
        }
        let id = self.require_id()?.to_string();
        let result = Cmd::new(&self.program).args(["wait", &id]).run()?;
        let code = result
            .stdout_trimmed()
            .parse::<i32>()
            .with_context(|| format!("Unexpected 'docker wait' output: {}", result.stdout))?;
        self.exit_code = Some(code);
        Ok(code)
    }

    fn id(&self) -> Option<String> {
        self.id.clone()
    }

    fn remove(&mut self) -> Result<()> {
        let Some(id) = self.id.take() else {
            return Ok(());
        };
        Cmd::new(&self.program)
            .args(["rm", "--force", &id])
            .error_msg(format!("Failed to remove container {id}"))
            .run()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_args_pairs() {
        let env = BTreeMap::from([("A".to_string(), "1".to_string())]);
        assert_eq!(env_args(&env), ["-e", "A=1"]);
    }

    #[test]
    fn test_mount_args_format() {
        let args = mount_args(&[MountSpec::bind("/host/sdk", "/home/dev/sdk")]);
        assert_eq!(
            args,
            ["--mount", "type=bind,source=/host/sdk,target=/home/dev/sdk"]
        );
    }

    #[test]
    fn test_wait_before_run_fails() {
        let mut c = DockerCli::new()
            .new_container("img:tag", BTreeMap::new(), ContainerOptions::default())
            .unwrap();
        assert!(c.wait().is_err());
        assert!(c.id().is_none());
    }

    #[test]
    fn test_remove_before_run_is_noop() {
        let mut c = DockerCli::new()
            .new_container("img:tag", BTreeMap::new(), ContainerOptions::default())
            .unwrap();
        c.remove().unwrap();
    }
}
