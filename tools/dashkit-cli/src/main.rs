//! Command-line driver for the DashKit offline cache router.
//!
//! Runs the router's lifecycle against a live static server and an on-disk
//! cache directory, so a deploy can be pre-cached and checked offline.
//!
//! ## Usage
//!
//! ```bash
//! # Write a starter config
//! dashkit init-config dashkit.json
//!
//! # Install and activate the configured version
//! dashkit --config dashkit.json update
//!
//! # Route one request, pretending the network is down
//! dashkit --config dashkit.json fetch /index.html --offline
//!
//! # List stored generations
//! dashkit --config dashkit.json caches
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use dashkit_common::{init_logging, LogConfig, LogFormat};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "dashkit")]
#[command(about = "Offline cache router for the trading dashboard")]
struct Cli {
    /// Router config (JSON)
    #[arg(short, long, global = true, default_value = "dashkit.json")]
    config: PathBuf,

    /// Directory holding cache generations
    #[arg(long, global = true, default_value = ".dashkit-cache")]
    cache_dir: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log format: pretty, compact, json
    #[arg(long, global = true, default_value = "compact")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install the configured version and sweep older generations
    Update,

    /// Route a single request through the router
    Fetch {
        /// Path on the configured origin, or an absolute URL
        target: String,
        /// Treat the network as unreachable
        #[arg(long)]
        offline: bool,
    },

    /// List stored cache generations
    Caches,

    /// Write the default dashboard config
    InitConfig {
        /// Output path
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(LogConfig::from_verbosity(cli.verbose).with_format(cli.log_format))?;

    match cli.command {
        Commands::Update => commands::update(&cli.config, &cli.cache_dir).await?,
        Commands::Fetch { target, offline } => {
            commands::fetch(&cli.config, &cli.cache_dir, &target, offline).await?
        }
        Commands::Caches => commands::caches(&cli.config, &cli.cache_dir).await?,
        Commands::InitConfig { path, force } => commands::init_config(&path, force)?,
    }

    Ok(())
}
