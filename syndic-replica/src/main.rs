//! syndic Replica
//!
//! Keeps a local copy of a Producer's resources using conditional requests,
//! and optionally mirrors item collections into local entities.
//!
//! # Configuration
//!
//! Environment variables:
//! - `SYNDIC_PRODUCER_URL`: Producer base URL
//! - `SYNDIC_PRODUCER_KEY`: Shared secret sent as `key`
//! - `SYNDIC_REPLICA_DATABASE_PATH`: Replica database
//!
//! # Config File Format
//!
//! ```yaml
//! producer:
//!   url: http://producer.example:8080
//!   key: shared-secret
//! resources:
//!   - category: articles
//!     local_content: true
//! sync:
//!   interval_secs: 600
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{ConfigCommand, DaemonCommand, ResourceCommand, StatusCommand, SyncCommand};
use syndic_replica::Config;

#[derive(Parser)]
#[command(name = "syndic-replica")]
#[command(version)]
#[command(about = "Replicates content from a syndic Producer", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync cycle now
    Sync(SyncCommand),

    /// Run scheduled syncs until interrupted
    Daemon(DaemonCommand),

    /// Show cached resources and scheduler state
    Status(StatusCommand),

    /// Manage retired and disabled resources
    Resource(ResourceCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "syndic_replica=info,syndic_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = Config::load(cli.config)?;

    match &cli.command {
        Commands::Sync(cmd) => cmd.run(&config).await,
        Commands::Daemon(cmd) => cmd.run(&config).await,
        Commands::Status(cmd) => cmd.run(&config).await,
        Commands::Resource(cmd) => cmd.run(&config).await,
        Commands::Config(cmd) => cmd.run(&config),
    }
}
