//! Build command - resolves a target, composes the build tree and drives
//! the SDK backend.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::common::clean_up_paths;
use crate::config::Settings;
use crate::container::{self, ContainerRuntime};
use crate::dispatch::dispatch;
use crate::error::BuildError;
use crate::logging;
use crate::overlay::OverlayComposer;
use crate::paths::{BuildContext, PathMap};
use crate::sdk::{parse_steps, SdkBackend, SdkParts, SdkRegistry, Step};
use crate::source::{GitCli, SourceFetcher};
use crate::spec::{BuildConfig, BuildOptions, BuildType, DeveloperConfig, EnvDefaults, TargetSpec};
use crate::store::{self, DocumentKind};
use crate::target::{normalize_buildspecs, normalize_targets, TargetResolver};
use crate::timing::PhaseTimer;

/// What the invocation should do once the backend exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildMode {
    /// Run the step list for the current context.
    Full,
    /// Rebuild only the firmware in the prebuilt image.
    Firmware,
    /// Rebuild only the named packages in the prebuilt image.
    Packages(Vec<String>),
    /// Open a shell in the build image.
    Interactive { ephemeral: bool },
    /// Populate the staging tree and stop.
    Stage,
}

impl BuildMode {
    /// Modes that build something get verbose output by default.
    pub fn is_build(&self) -> bool {
        !matches!(self, BuildMode::Interactive { .. } | BuildMode::Stage)
    }

    pub fn is_interactive(&self) -> bool {
        matches!(self, BuildMode::Interactive { .. })
    }
}

/// Command-line input of a build.
#[derive(Debug, Clone)]
pub struct BuildArgs {
    pub target: Option<String>,
    pub dev: bool,
    pub target_trees: Vec<PathBuf>,
    pub container_specs: Vec<PathBuf>,
    pub clean: bool,
    pub cores: Option<u32>,
    pub quiet: bool,
    pub verbose: bool,
    pub devconfig: Option<PathBuf>,
    pub mode: BuildMode,
}

impl BuildArgs {
    pub fn new(target: &str, mode: BuildMode) -> Self {
        Self {
            target: Some(target.to_string()),
            dev: false,
            target_trees: Vec::new(),
            container_specs: Vec::new(),
            clean: false,
            cores: None,
            quiet: false,
            verbose: false,
            devconfig: None,
            mode,
        }
    }

    pub fn build_type(&self) -> BuildType {
        if self.dev {
            BuildType::Dev
        } else {
            BuildType::Automated
        }
    }

    pub fn is_verbose(&self) -> bool {
        !self.quiet && (self.mode.is_build() || self.verbose)
    }

    /// Reject nonsensical flag combinations.
    pub fn sanitize(&self) -> Result<(), BuildError> {
        if self.quiet && self.verbose {
            return Err(BuildError::ConflictingFlags(
                "'--verbose' and '--quiet' together".to_string(),
            ));
        }
        Ok(())
    }
}

/// Collaborators a session drives.
pub struct Collaborators {
    pub registry: SdkRegistry,
    pub runtime: Box<dyn ContainerRuntime>,
    pub fetcher: Box<dyn SourceFetcher>,
}

impl Collaborators {
    pub fn for_settings(settings: &Settings) -> Result<Self> {
        Ok(Self {
            registry: SdkRegistry::builtin(),
            runtime: container::runtime_for(&settings.container_tech)?,
            fetcher: Box::new(GitCli),
        })
    }
}

/// A resolved build, ready to execute.
pub struct Session {
    pub paths: PathMap,
    pub steps: Vec<Step>,
    pub backend: Box<dyn SdkBackend>,
    /// Out-of-tree target directories in play.
    pub external_targets: Vec<PathBuf>,
}

/// Target named on the command line, lowercased.
pub fn requested_target(args: &BuildArgs) -> Result<String, BuildError> {
    match args.target.as_deref() {
        Some(t) if !t.is_empty() => Ok(t.to_lowercase()),
        _ => Err(BuildError::MissingArgument("target")),
    }
}

/// Check `target` is in-tree or among `external`, listing alternatives
/// when it is not.
pub fn ensure_known_target(paths: &PathMap, target: &str, external: &[PathBuf]) -> Result<()> {
    let resolver = TargetResolver::new(paths.get(BuildContext::Host, "tgroot")?);
    if resolver.is_known_target(target, external) {
        return Ok(());
    }
    super::list::print_targets(&resolver.list_known_targets(external));
    Err(BuildError::UnknownTarget(target.to_string()).into())
}

/// Wipe the scratch tree, and the output directory unless the run is
/// interactive.
pub fn clean_run_dirs(paths: &PathMap, interactive: bool) -> Result<Vec<PathBuf>> {
    let mut dirs = vec![paths.get(BuildContext::Host, "tmpdir")?];
    if !interactive {
        dirs.push(paths.get(BuildContext::Host, "outdir")?);
    }
    clean_up_paths(&dirs)?;
    Ok(dirs)
}

/// Developer config to use, if any: `--devconfig`, else the project's
/// `developer.json` when present.
pub fn developer_config_path(paths: &PathMap, explicit: Option<&Path>) -> Option<PathBuf> {
    let candidate = match explicit {
        Some(p) => p.to_path_buf(),
        None => paths.try_get(paths.current(), "devconfig")?,
    };
    candidate.is_file().then_some(candidate)
}

/// Compose the scratch tree, validate every document the build reads and
/// instantiate the backend. Expects the run directories already cleaned.
pub fn prepare(
    paths: &PathMap,
    args: &BuildArgs,
    settings: &Settings,
    collaborators: Collaborators,
) -> Result<Session> {
    use BuildContext::Tmp;

    let target = requested_target(args)?;
    let external_targets = normalize_targets(&args.target_trees);
    let buildspecs = normalize_buildspecs(&args.container_specs);

    OverlayComposer::install_overlay(paths, &external_targets, &buildspecs)?;

    let schemas = paths.get(Tmp, "schemas")?;
    let tgspec_path = paths.get(Tmp, "tgspec")?;
    info!("Validating {} against schema", tgspec_path.display());
    store::validate_against_schema(&tgspec_path, DocumentKind::TargetSpec, &schemas)?;
    let spec = TargetSpec::load(&tgspec_path, &target)?;

    let steps_label = match args.build_type() {
        BuildType::Dev => "dev_build_steps",
        BuildType::Automated => "automated_build_steps",
    };
    let steps_path = paths.get(Tmp, steps_label)?;
    info!("Validating {} against schema", steps_path.display());
    let steps_doc = store::validate_against_schema(&steps_path, DocumentKind::BuildSteps, &schemas)?;
    let steps = parse_steps(&steps_doc)?;

    let devconfig = match developer_config_path(paths, args.devconfig.as_deref()) {
        Some(path) => {
            if (args.mode.is_build() || args.mode.is_interactive()) && !args.dev {
                return Err(BuildError::DevConfigNotAllowed.into());
            }
            info!("Validating {} against schema", path.display());
            store::validate_against_schema(&path, DocumentKind::DeveloperConfig, &schemas)?;
            Some(store::load_json::<DeveloperConfig>(&path)?)
        }
        None => None,
    };

    let env_defaults: EnvDefaults = store::load_json(&paths.get(Tmp, "env_defaults")?)?;
    let options = BuildOptions {
        target: target.clone(),
        build_type: args.build_type(),
        num_build_cores: args.cores,
        start_clean: args.clean,
        verbose: args.is_verbose(),
    };
    let config = BuildConfig::compose(&options, settings, spec, env_defaults, devconfig.as_ref())?;

    info!("SDK type:   '{}'", config.build_type);
    info!("SDK target: '{}'", config.target);
    info!("SDK family: '{}'", config.spec.sdk_name);

    let backend = collaborators.registry.create(SdkParts {
        config,
        paths: paths.clone(),
        runtime: collaborators.runtime,
        fetcher: collaborators.fetcher,
    })?;

    if args.mode == BuildMode::Full {
        let names: Vec<String> = steps.iter().map(|s| s.to_string()).collect();
        debug!("steps: {names:?}");
    }
    debug!("environment: {:?}", backend.get_env_vars(false)?);
    debug!("mounts: {:?}", backend.get_mounts(false)?);

    Ok(Session {
        paths: paths.clone(),
        steps,
        backend,
        external_targets,
    })
}

/// Run the selected mode against a prepared session.
pub fn execute(session: &mut Session, mode: &BuildMode, dev: bool) -> Result<()> {
    let backend = session.backend.as_mut();
    match mode {
        BuildMode::Stage => backend.populate_staging_dir(),
        BuildMode::Interactive { ephemeral } => {
            backend.populate_staging_dir()?;
            backend.get_interactive_container(*ephemeral)
        }
        BuildMode::Packages(packages) => {
            backend.populate_staging_dir()?;
            if dev {
                backend.build_container_image(true)?;
            }
            backend.build_single_packages(packages)?;
            let src = session.paths.get(BuildContext::Container, "pkg_outdir")?;
            backend.retrieve_build_artifacts(Some(&src), None)?;
            Ok(())
        }
        BuildMode::Firmware => {
            backend.populate_staging_dir()?;
            if dev {
                backend.build_container_image(true)?;
            }
            backend.build_only_firmware()?;
            let src = session.paths.get(BuildContext::Container, "outdir")?;
            backend.retrieve_build_artifacts(Some(&src), None)?;
            Ok(())
        }
        BuildMode::Full => {
            let ran = dispatch(&session.steps, session.paths.current(), backend)?;
            info!("{ran} step(s) run in context {}", session.paths.current());
            Ok(())
        }
    }
}

/// Execute the build command.
pub fn cmd_build(base_dir: &Path, args: BuildArgs, settings: &Settings) -> Result<()> {
    args.sanitize()?;
    let target = requested_target(&args)?;
    let paths = PathMap::standard(
        base_dir,
        &settings.container_home,
        Some(&target),
        settings.inside_container,
    );

    let external_targets = normalize_targets(&args.target_trees);
    ensure_known_target(&paths, &target, &external_targets)?;

    let cleaned = clean_run_dirs(&paths, args.mode.is_interactive())?;
    let log_file = if settings.inside_container {
        None
    } else {
        Some(paths.get(BuildContext::Host, "buildlog")?)
    };
    logging::init(args.is_verbose(), log_file.as_deref())?;
    info!("Cleaned up {cleaned:?}");

    let stamp = paths.try_get(paths.current(), "timestamp");
    let timer = PhaseTimer::start("prepare").recording_to(stamp.clone());
    let collaborators = Collaborators::for_settings(settings)?;
    let mut session = prepare(&paths, &args, settings, collaborators)?;
    timer.finish()?;

    let timer = PhaseTimer::start("build").recording_to(stamp);
    execute(&mut session, &args.mode, args.dev)?;
    timer.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_and_verbose_conflict() {
        let mut args = BuildArgs::new("acme", BuildMode::Full);
        args.quiet = true;
        args.verbose = true;
        assert!(matches!(
            args.sanitize(),
            Err(BuildError::ConflictingFlags(_))
        ));
    }

    #[test]
    fn test_verbosity_defaults_by_mode() {
        assert!(BuildArgs::new("acme", BuildMode::Full).is_verbose());
        assert!(!BuildArgs::new("acme", BuildMode::Stage).is_verbose());
        let mut quiet = BuildArgs::new("acme", BuildMode::Firmware);
        quiet.quiet = true;
        assert!(!quiet.is_verbose());
        let mut loud = BuildArgs::new("acme", BuildMode::Interactive { ephemeral: true });
        loud.verbose = true;
        assert!(loud.is_verbose());
    }

    #[test]
    fn test_target_required_and_lowercased() {
        let mut args = BuildArgs::new("ACME", BuildMode::Full);
        assert_eq!(requested_target(&args).unwrap(), "acme");
        args.target = None;
        let err = requested_target(&args).unwrap_err();
        assert_eq!(err.exit_code(), 13);
    }
}
