//! Named backend operations and the step lists that sequence them.

use anyhow::{bail, Result};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::BuildError;
use crate::paths::BuildContext;
use crate::store;

/// Hooks the staged hook runner understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    PrepareSystem,
    PrepareSdk,
    InstallConfigs,
    BuildPackages,
}

impl Hook {
    pub fn as_str(self) -> &'static str {
        match self {
            Hook::PrepareSystem => "prepare_system",
            Hook::PrepareSdk => "prepare_sdk",
            Hook::InstallConfigs => "install_configs",
            Hook::BuildPackages => "build_packages",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every backend operation addressable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Checkout,
    Build,
    RunStagedBuild,
    BuildOnlyFirmware,
    BuildContainerImage,
    RetrieveBuildArtifacts,
    PopulateStagingDir,
    PrepareSystem,
    PrepareSdk,
    InstallConfigs,
    // Resolvable, but need arguments or return data.
    BuildSinglePackages,
    GetInteractiveContainer,
    GetEnvVars,
    GetMounts,
}

impl Task {
    pub const ALL: [Task; 14] = [
        Task::Checkout,
        Task::Build,
        Task::RunStagedBuild,
        Task::BuildOnlyFirmware,
        Task::BuildContainerImage,
        Task::RetrieveBuildArtifacts,
        Task::PopulateStagingDir,
        Task::PrepareSystem,
        Task::PrepareSdk,
        Task::InstallConfigs,
        Task::BuildSinglePackages,
        Task::GetInteractiveContainer,
        Task::GetEnvVars,
        Task::GetMounts,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Task::Checkout => "checkout",
            Task::Build => "build",
            Task::RunStagedBuild => "run_staged_build",
            Task::BuildOnlyFirmware => "build_only_firmware",
            Task::BuildContainerImage => "build_container_image",
            Task::RetrieveBuildArtifacts => "retrieve_build_artifacts",
            Task::PopulateStagingDir => "populate_staging_dir",
            Task::PrepareSystem => "prepare_system",
            Task::PrepareSdk => "prepare_sdk",
            Task::InstallConfigs => "install_configs",
            Task::BuildSinglePackages => "build_single_packages",
            Task::GetInteractiveContainer => "get_interactive_container",
            Task::GetEnvVars => "get_env_vars",
            Task::GetMounts => "get_mounts",
        }
    }

    /// Whether the task can run from a step list.
    pub fn is_invocable(self) -> bool {
        !matches!(
            self,
            Task::BuildSinglePackages
                | Task::GetInteractiveContainer
                | Task::GetEnvVars
                | Task::GetMounts
        )
    }

    /// The hook a task runs, if it is a hook task.
    pub fn hook(self) -> Option<Hook> {
        match self {
            Task::PrepareSystem => Some(Hook::PrepareSystem),
            Task::PrepareSdk => Some(Hook::PrepareSdk),
            Task::InstallConfigs => Some(Hook::InstallConfigs),
            _ => None,
        }
    }

    /// Resolve `name` to an invocable task.
    pub fn invocable(name: &str) -> Result<Task, BuildError> {
        let task: Task = name.parse()?;
        if !task.is_invocable() {
            return Err(BuildError::TaskNotInvocable(name.to_string()));
        }
        Ok(task)
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Task {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Task::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| BuildError::UnknownTask(s.to_string()))
    }
}

/// One entry of a step list: run `task` when executing in `context`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub task: Task,
    pub context: BuildContext,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.task, self.context)
    }
}

/// Parse a step document: `{"steps": [{"<task>": "<context>"}, ...]}`.
///
/// Every task name is resolved here, so a bad step list fails before
/// anything runs.
pub fn parse_steps(doc: &Value) -> Result<Vec<Step>> {
    let Some(entries) = doc.get("steps").and_then(Value::as_array) else {
        bail!("Step document has no \"steps\" array");
    };

    let mut steps = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(obj) = entry.as_object().filter(|o| o.len() == 1) else {
            bail!("Malformed step {entry}: expected {{\"<task>\": \"<context>\"}}");
        };
        for (name, ctx) in obj {
            let Some(ctx) = ctx.as_str() else {
                bail!("Step '{name}' has a non-string context");
            };
            steps.push(Step {
                task: Task::invocable(name)?,
                context: ctx.parse()?,
            });
        }
    }
    Ok(steps)
}

/// Load and parse a step file.
pub fn load_steps(path: &Path) -> Result<Vec<Step>> {
    let doc = store::load_json_value(path)?;
    parse_steps(&doc)
}
