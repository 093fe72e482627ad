//! stratacache CLI - inspect and maintain a stratacache disk cache
//!
//! All commands operate on the disk tier directly; the memory tier and the
//! background cleanup timer are disabled for one-shot invocations.

mod commands;
mod error;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use stratacache::logging::{default_log_dir, init_logging, DEFAULT_LOG_FILE};
use tracing::debug;

use commands::cache::CacheAction;
use commands::metadata::MetaAction;
use error::CliError;

#[derive(Parser)]
#[command(name = "stratacache")]
#[command(version = stratacache::VERSION)]
#[command(about = "Inspect and maintain a two-tier disk cache", long_about = None)]
struct Cli {
    /// Config file (default: {config dir}/stratacache/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cache directory, overriding the config file
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Cache(CacheAction),

    /// Read and edit per-entry metadata
    Meta {
        #[command(subcommand)]
        action: MetaAction,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        e.exit();
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let _logging = init_logging(&default_log_dir(), DEFAULT_LOG_FILE, "warn")
        .map_err(CliError::LoggingInit)?;

    let config = commands::resolve_config(cli.config.as_deref(), cli.dir)?;
    debug!(directory = %config.directory.display(), "Resolved cache directory");

    match cli.command {
        Commands::Cache(action) => commands::cache::run(action, config).await,
        Commands::Meta { action } => commands::metadata::run(action, config).await,
    }
}
