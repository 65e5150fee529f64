//! sdkbuilder - builds embedded firmware SDKs for in-tree and out-of-tree
//! targets inside build containers.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use sdkbuilder::commands::{self, build::BuildArgs, build::BuildMode};
use sdkbuilder::config::Settings;
use sdkbuilder::error::{exit_code_for, exit_status_byte};
use sdkbuilder::logging;

#[derive(Parser)]
#[command(name = "sdkbuilder")]
#[command(about = "Layered SDK build orchestrator")]
#[command(
    after_help = "QUICK START:\n  sdkbuilder preflight              Check host tools and project tree\n  sdkbuilder list-targets           Show buildable targets\n  sdkbuilder build -t TARGET        Full automated build\n  sdkbuilder build -d -t TARGET     Dev build with host mounts"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Project root (default: current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Exit successfully without doing anything (used by nested image builds)
    #[arg(long, global = true, hide = true)]
    skip_all: bool,
}

/// Out-of-tree inputs shared by several commands.
#[derive(Args, Clone, Default)]
struct ExternalArgs {
    /// Out-of-tree target directory (or a directory of them); repeatable
    #[arg(long = "target-tree", value_name = "TREE")]
    target_trees: Vec<PathBuf>,

    /// Out-of-tree container image recipe (or a directory of them); repeatable
    #[arg(long = "container-spec", value_name = "SPEC")]
    container_specs: Vec<PathBuf>,
}

#[derive(Args)]
struct TargetArgs {
    /// Target platform to build for
    #[arg(short, long, value_name = "PLATFORM")]
    target: Option<String>,

    /// Build in directories mounted from the host and keep artifacts there
    #[arg(short = 'd', long = "dev", alias = "devbuild-with-host-mounts")]
    dev: bool,

    #[command(flatten)]
    external: ExternalArgs,

    /// Developer config to use instead of developer.json
    #[arg(long, value_name = "CONFIG")]
    devconfig: Option<PathBuf>,

    /// Do not print diagnostic messages
    #[arg(short, long)]
    quiet: bool,

    /// Print diagnostic messages when they are silenced by default
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the SDK for a target
    Build {
        #[command(flatten)]
        target: TargetArgs,

        /// Start clean (fresh checkout, no image cache)
        #[arg(long)]
        clean: bool,

        /// Number of processor cores to use for the build (default: 1)
        #[arg(long)]
        cores: Option<u32>,

        /// Build firmware using the prebuilt SDK image
        #[arg(long, conflicts_with_all = ["build_package", "container"])]
        build_firmware: bool,

        /// Build only the given package(s) using the prebuilt SDK image
        #[arg(long, num_args = 1.., value_name = "PACKAGE", conflicts_with = "container")]
        build_package: Option<Vec<String>>,

        /// Open a shell in the build container instead of building
        #[arg(long)]
        container: bool,

        /// With --container, remove the container on exit
        #[arg(long, requires = "container")]
        ephemeral: bool,
    },

    /// Populate the staging directory and do nothing else
    Stage {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// List currently supported targets
    ListTargets {
        #[command(flatten)]
        external: ExternalArgs,
    },

    /// Validate all configuration documents against their schemas
    Validate {
        #[command(flatten)]
        external: ExternalArgs,

        /// Developer config to validate instead of developer.json
        #[arg(long, value_name = "CONFIG")]
        devconfig: Option<PathBuf>,
    },

    /// Generate an out-of-tree target tree under PATH/<NAME>
    Treegen {
        /// Name of the target to scaffold
        #[arg(long, value_name = "NAME")]
        target: String,

        /// Directory to create the tree in
        path: PathBuf,
    },

    /// Check host tools and the project tree
    Preflight {
        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },
}

fn build_args(target: TargetArgs, mode: BuildMode) -> BuildArgs {
    BuildArgs {
        target: target.target,
        dev: target.dev,
        target_trees: target.external.target_trees,
        container_specs: target.external.container_specs,
        clean: false,
        cores: None,
        quiet: target.quiet,
        verbose: target.verbose,
        devconfig: target.devconfig,
        mode,
    }
}

fn run(cli: Cli) -> Result<()> {
    let Some(command) = cli.command else {
        anyhow::bail!("No command given. See --help.");
    };
    let base_dir = match cli.root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let settings = Settings::load(&base_dir);

    match command {
        Commands::Build {
            target,
            clean,
            cores,
            build_firmware,
            build_package,
            container,
            ephemeral,
        } => {
            let mode = if let Some(packages) = build_package {
                BuildMode::Packages(packages)
            } else if build_firmware {
                BuildMode::Firmware
            } else if container {
                BuildMode::Interactive { ephemeral }
            } else {
                BuildMode::Full
            };
            let mut args = build_args(target, mode);
            args.clean = clean;
            args.cores = cores;
            commands::cmd_build(&base_dir, args, &settings)?;
        }

        Commands::Stage { target } => {
            commands::cmd_build(&base_dir, build_args(target, BuildMode::Stage), &settings)?;
        }

        Commands::ListTargets { external } => {
            logging::init(false, None)?;
            commands::cmd_list_targets(&base_dir, &external.target_trees, &settings)?;
        }

        Commands::Validate { external, devconfig } => {
            logging::init(false, None)?;
            commands::cmd_validate(
                &base_dir,
                &external.target_trees,
                &external.container_specs,
                devconfig.as_deref(),
                &settings,
            )?;
        }

        Commands::Treegen { target, path } => {
            logging::init(false, None)?;
            commands::cmd_treegen(&base_dir, &target, &path, &settings)?;
        }

        Commands::Preflight { strict } => {
            logging::init(true, None)?;
            commands::cmd_preflight(&base_dir, strict, &settings)?;
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    println!(" ** Invocation: {:?}", std::env::args().collect::<Vec<_>>());
    let cli = Cli::parse();

    if cli.skip_all {
        println!("Short-circuit flag passed, exiting ok");
        return ExitCode::SUCCESS;
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(exit_status_byte(exit_code_for(&e)))
        }
    }
}
