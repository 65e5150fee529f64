//! Error types for sdkbuilder.

use std::path::PathBuf;

use thiserror::Error;

/// Exit code used when the mandatory `--target` argument is missing.
pub const EXIT_MISSING_TARGET: i32 = 13;

/// Broad class of a [`BuildError`], used for reporting and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad invocation or missing inputs; nothing has been touched yet.
    Precondition,
    /// A restricted-mode operation needs an image/container that is absent.
    ResourceNotFound,
    /// The build container exited non-zero.
    ExternalProcess,
    /// Source checkout failed on every mirror.
    SourceFailure,
    /// A step names a task the backend cannot run.
    TaskResolution,
    /// A configuration document is malformed or fails its schema.
    Config,
}

/// Errors that can occur while resolving, composing and building an SDK.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Target specified ('{0}') not supported")]
    UnknownTarget(String),

    #[error("Mandatory argument not specified: '{0}'")]
    MissingArgument(&'static str),

    #[error("Invalid command line: {0}")]
    ConflictingFlags(String),

    #[error("Mandatory source missing: {}", .0.display())]
    MissingSource(PathBuf),

    #[error("No Sdk backend registered with name '{0}'")]
    UnknownSdk(String),

    #[error("No interface for container technology '{0}'")]
    UnknownContainerTech(String),

    #[error("Developer configs can only be used for dev builds")]
    DevConfigNotAllowed,

    #[error("No suitable container image found: '{0}'")]
    ImageNotFound(String),

    #[error("No suitable container found: '{0}'. Try full/clean build?")]
    ContainerNotFound(String),

    #[error("Container exited with exit code {code}")]
    ContainerExit { code: i32 },

    #[error("Container image build failure: {0}")]
    ImageBuildFailed(String),

    #[error("Cannot clone sdk: no URL provided")]
    NoMirrors,

    #[error("Failed to clone sdk repo. All urls failed. Urls: {urls:?}")]
    MirrorsExhausted { urls: Vec<String> },

    #[error("'{0}' does not identify an Sdk task")]
    UnknownTask(String),

    #[error("'{0}' identifies an Sdk operation that cannot be invoked as a task")]
    TaskNotInvocable(String),

    #[error("Unknown build context: '{0}'")]
    UnknownContext(String),

    #[error("No such path '{label}' in context '{context}'")]
    UnknownPath { context: String, label: String },

    #[error("{} failed schema validation:\n{}", .path.display(), .errors.join("\n"))]
    SchemaViolation { path: PathBuf, errors: Vec<String> },

    #[error("Conflicting mounts: {0}")]
    MountConflict(String),
}

impl BuildError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BuildError::UnknownTarget(_)
            | BuildError::MissingArgument(_)
            | BuildError::ConflictingFlags(_)
            | BuildError::MissingSource(_)
            | BuildError::UnknownSdk(_)
            | BuildError::UnknownContainerTech(_)
            | BuildError::DevConfigNotAllowed
            | BuildError::MountConflict(_) => ErrorKind::Precondition,
            BuildError::ImageNotFound(_) | BuildError::ContainerNotFound(_) => {
                ErrorKind::ResourceNotFound
            }
            BuildError::ContainerExit { .. } | BuildError::ImageBuildFailed(_) => {
                ErrorKind::ExternalProcess
            }
            BuildError::NoMirrors | BuildError::MirrorsExhausted { .. } => {
                ErrorKind::SourceFailure
            }
            BuildError::UnknownTask(_) | BuildError::TaskNotInvocable(_) => {
                ErrorKind::TaskResolution
            }
            BuildError::UnknownContext(_)
            | BuildError::UnknownPath { .. }
            | BuildError::SchemaViolation { .. } => ErrorKind::Config,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            BuildError::ContainerExit { code } => *code,
            BuildError::MissingArgument("target") => EXIT_MISSING_TARGET,
            _ => 1,
        }
    }
}

/// Pick the process exit code for an error bubbling out of `main`.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|e| e.downcast_ref::<BuildError>())
        .map(BuildError::exit_code)
        .unwrap_or(1)
}

/// Fold an exit code into the byte a process can return, the way a shell
/// reports it (`code mod 256`). A failure never folds to success.
pub fn exit_status_byte(code: i32) -> u8 {
    match code.rem_euclid(256) {
        0 if code != 0 => 1,
        folded => folded as u8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_container_exit_propagates_code() {
        let err = BuildError::ContainerExit { code: 42 };
        assert_eq!(err.exit_code(), 42);
        assert_eq!(err.kind(), ErrorKind::ExternalProcess);
    }

    #[test]
    fn test_exit_status_byte_wraps_like_a_shell() {
        assert_eq!(exit_status_byte(2), 2);
        assert_eq!(exit_status_byte(EXIT_MISSING_TARGET), 13);
        assert_eq!(exit_status_byte(300), 44);
        assert_eq!(exit_status_byte(-1), 255);
        assert_eq!(exit_status_byte(256), 1);
        assert_eq!(exit_status_byte(0), 0);
    }

    #[test]
    fn test_exit_code_found_through_context() {
        let err: anyhow::Error = Err::<(), _>(BuildError::ContainerExit { code: 7 })
            .context("building firmware")
            .unwrap_err();
        assert_eq!(exit_code_for(&err), 7);
    }

    #[test]
    fn test_missing_target_exit_code() {
        let err = anyhow::Error::new(BuildError::MissingArgument("target"));
        assert_eq!(exit_code_for(&err), EXIT_MISSING_TARGET);
    }

    #[test]
    fn test_untyped_error_exits_one() {
        assert_eq!(exit_code_for(&anyhow::anyhow!("boom")), 1);
    }

    #[test]
    fn test_resource_errors_classified() {
        assert_eq!(
            BuildError::ImageNotFound("x".into()).kind(),
            ErrorKind::ResourceNotFound
        );
        assert_eq!(
            BuildError::ContainerNotFound("x".into()).kind(),
            ErrorKind::ResourceNotFound
        );
    }
}
