use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use tfs_relay::build_context::BuildOutcome;

mod cmd;

#[derive(Parser)]
#[command(name = "tfs-relay")]
#[command(version, about = "Mirror a local build onto a Microsoft TFS build")]
pub struct Cli {
    /// Path to the config file (defaults to ./tfs-relay.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// TFS collection URL, e.g. https://tfs.corp/tfs/DefaultCollection
    #[arg(long, global = true)]
    pub server_url: Option<String>,

    #[arg(long, global = true)]
    pub username: Option<String>,

    #[arg(long, global = true)]
    pub password: Option<String>,

    /// Team project holding the build definition
    #[arg(long, global = true)]
    pub project: Option<String>,

    /// Build definition id
    #[arg(long, global = true)]
    pub definition: Option<i32>,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// Identity of the local build being mirrored.
#[derive(clap::Args, Clone, Debug)]
pub struct LocalBuildArgs {
    /// Local project name (defaults to the project directory name)
    #[arg(long)]
    pub name: Option<String>,

    /// Local build number
    #[arg(long, default_value = "1")]
    pub number: u32,

    /// Local build id used in the build variable (defaults to the build number)
    #[arg(long)]
    pub build_id: Option<String>,

    /// Branch specs the build is configured for; defaults to the checked-out branch
    #[arg(long = "branch")]
    pub branches: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a command as the local build, mirroring its output to TFS
    Run {
        #[command(flatten)]
        build: LocalBuildArgs,

        /// Command line to execute
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
    /// Queue and start a remote build, printing its build variable
    Start {
        #[command(flatten)]
        build: LocalBuildArgs,
    },
    /// Report the outcome of a build started earlier
    Finish {
        #[command(flatten)]
        build: LocalBuildArgs,

        /// Remote build id printed by `start`
        #[arg(long)]
        tfs_build_id: i32,

        /// success, unstable, failure, not_built or aborted
        #[arg(long)]
        result: BuildOutcome,
    },
    /// Validate the connection and list projects and build definitions
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    tfs_relay::logging::init(&cli.log_level);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Run { build, command } => {
            let code = cmd::cmd_run(&cli, &project_dir, build, command).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Start { build } => cmd::cmd_start(&cli, &project_dir, build).await?,
        Commands::Finish {
            build,
            tfs_build_id,
            result,
        } => cmd::cmd_finish(&cli, &project_dir, build, *tfs_build_id, *result).await?,
        Commands::Check => cmd::cmd_check(&cli, &project_dir).await?,
    }

    Ok(())
}
