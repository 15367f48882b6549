use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use memoloom_core::domain::ClaimantId;
use memoloom_core::impls::FsStore;

mod commands;
mod executor;

use commands::{Env, RunFlags};

/// Memoized, lock-coordinated runner for multi-stage spike-sorting pipelines.
#[derive(Parser, Debug)]
#[command(name = "memoloom")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Directory of the shared store
    #[arg(long, global = true, env = "MEMOLOOM_STORE_DIR", default_value = "./.memoloom")]
    store_dir: PathBuf,

    /// Directory holding one `<subpath>/run` script per job kind
    #[arg(long, global = true, env = "MEMOLOOM_EXECUTOR_REPO", default_value = "./executors")]
    executor_repo: PathBuf,

    /// Detailed output about steps taken
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Expand the pipeline, publish its job list and results, and print both
    Build {
        /// Pipeline config (YAML)
        config: PathBuf,
    },

    /// Run the published jobs matching a selector
    Run(RunArgs),

    /// Print published results with per-unit accuracy
    Results {
        config: PathBuf,

        /// Dump all results as JSON
        #[arg(long)]
        json_format: bool,
    },

    /// Run every configured sorter's sorting jobs, one sorter after another
    RunAll {
        config: PathBuf,

        /// Processing settings (YAML); missing file means defaults
        settings: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    config: PathBuf,

    /// `<job-type>` or `sorting:<algorithm>`
    selector: String,

    /// Clear out all locks on the selected jobs and exit
    #[arg(long)]
    reset_locks: bool,

    /// Maximum number of jobs to run simultaneously
    #[arg(long, allow_negative_numbers = true)]
    num_parallel: Option<i64>,

    /// Run even if an output is already stored
    #[arg(long)]
    force_run: bool,

    /// Rerun jobs whose stored output marks a failure
    #[arg(long)]
    rerun_failing: bool,

    /// Use docker image
    #[arg(long)]
    docker: bool,

    /// Use singularity image
    #[arg(long)]
    singularity: bool,

    /// Image for use in docker or singularity mode
    #[arg(long)]
    image: Option<String>,

    /// Keep the published job order instead of shuffling
    #[arg(long)]
    use_deterministic_job_order: bool,

    /// Claim jobs without invoking the executor
    #[arg(long)]
    dry_run: bool,
}

impl From<RunArgs> for RunFlags {
    fn from(args: RunArgs) -> Self {
        RunFlags {
            force_run: args.force_run,
            rerun_failing: args.rerun_failing,
            reset_locks: args.reset_locks,
            num_parallel: args.num_parallel,
            deterministic: args.use_deterministic_job_order,
            dry_run: args.dry_run,
            docker: args.docker,
            singularity: args.singularity,
            image: args.image,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let env = Env {
        store: Arc::new(FsStore::new(&cli.store_dir)),
        executor_repo: cli.executor_repo,
        claimant: ClaimantId::generate(),
        verbose: cli.verbose,
    };
    tracing::debug!(store = %cli.store_dir.display(), claimant = %env.claimant, "starting");

    match cli.command {
        Commands::Build { config } => commands::build(&env, &config).await,
        Commands::Run(args) => {
            let config = args.config.clone();
            let selector = args.selector.clone();
            commands::run(&env, &config, &selector, args.into()).await
        }
        Commands::Results {
            config,
            json_format,
        } => commands::results(&env, &config, json_format).await,
        Commands::RunAll { config, settings } => commands::run_all(&env, &config, &settings).await,
    }
}
