#![deny(unsafe_code)]
//! `asp`: a thin façade over the Agent Spaces library crates, for manual
//! testing during development. See the crate README for scope.

mod commands;
mod session_factory;

use anyhow::Result;
use asp_harness_core::HarnessId;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Exit code used for any command that returns an error.
const EXIT_RUNTIME_ERROR: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "asp", version, about = "Agent Spaces CLI (manual testing façade)")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,

    /// Registry clone URL recorded in the lock file.
    #[arg(long, global = true, default_value = "https://example.invalid/agent-spaces-registry.git")]
    registry_url: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve, materialize, and compose targets for every known harness.
    Install {
        /// Project root containing `asp-targets.toml`.
        #[arg(long, default_value = ".")]
        project: PathBuf,

        /// Target names to install; all declared targets if omitted.
        #[arg(long = "target")]
        targets: Vec<String>,

        /// Re-materialize and recompose even if cached output exists.
        #[arg(long)]
        refresh: bool,
    },

    /// Resolve and lock one target without materializing artifacts.
    Build {
        /// Project root containing `asp-targets.toml`.
        #[arg(long, default_value = ".")]
        project: PathBuf,

        /// The target to build.
        #[arg(long)]
        target: String,

        /// Re-resolve against the registry instead of the existing lock.
        #[arg(long)]
        refresh: bool,
    },

    /// Resolve one target and print its lock file path.
    Lock {
        /// Project root containing `asp-targets.toml`.
        #[arg(long, default_value = ".")]
        project: PathBuf,

        /// The target to lock.
        #[arg(long)]
        target: String,
    },

    /// Resolve one target and report its non-fatal lint findings.
    Lint {
        /// Project root containing `asp-targets.toml`.
        #[arg(long, default_value = ".")]
        project: PathBuf,

        /// The target to lint.
        #[arg(long)]
        target: String,
    },

    /// Drive one non-interactive turn and print the unified event stream.
    Run {
        /// Project root containing `asp-targets.toml`.
        #[arg(long, default_value = ".")]
        project: PathBuf,

        /// The target to run.
        #[arg(long)]
        target: String,

        /// Which harness frontend to run against.
        #[arg(long, value_parser = commands::parse_harness_id)]
        frontend: HarnessId,

        /// Requested model id.
        #[arg(long)]
        model: Option<String>,

        /// The prompt to send.
        #[arg(long)]
        prompt: String,

        /// The coding platform's own session id for this conversation.
        #[arg(long)]
        cp_session_id: String,

        /// A continuation key from a prior turn, to resume.
        #[arg(long)]
        continuation_key: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug { EnvFilter::new("asp=debug") } else { EnvFilter::new("asp=info") };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = run(cli).await;
    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(EXIT_RUNTIME_ERROR);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Install { project, targets, refresh } => commands::cmd_install(&project, &cli.registry_url, targets, refresh),
        Commands::Build { project, target, refresh } => commands::cmd_build(&project, &cli.registry_url, &target, refresh),
        Commands::Lock { project, target } => commands::cmd_lock(&project, &cli.registry_url, &target),
        Commands::Lint { project, target } => commands::cmd_lint(&project, &cli.registry_url, &target),
        Commands::Run { project, target, frontend, model, prompt, cp_session_id, continuation_key } => {
            commands::cmd_run(&project, &cli.registry_url, &target, frontend, model, prompt, cp_session_id, continuation_key).await
        }
    }
}
