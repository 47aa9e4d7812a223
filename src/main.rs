//! syndic Producer
//!
//! Serves categorized content to Replicas over conditional HTTP.
//!
//! # Configuration
//!
//! Environment variables:
//! - `SYNDIC_PORT`: Port to listen on (default: 8080)
//! - `SYNDIC_DATABASE_PATH`: Content database (default: ~/.local/share/syndic/content.db)
//! - `SYNDIC_CONFIG`: Path to config file (default: ~/.config/syndic/config.yaml)
//!
//! # Config File Format
//!
//! ```yaml
//! secret_key: "shared-secret"
//! cache_ttl_secs: 300
//! max_age_secs: 300
//! ```

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use syndic::config::ServerConfig;
use syndic::content::{import_bundle, init_db, ContentBundle, ContentRepository};
use syndic::server::{router, AppState, Authoring, VersionedResourceStore};

#[derive(Parser)]
#[command(name = "syndic-producer")]
#[command(version)]
#[command(about = "Publishes content to syndic Replicas", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the delivery endpoint
    Serve,

    /// Import content types and items from a YAML bundle
    Import {
        /// Path to the bundle file
        file: PathBuf,
    },

    /// List content types
    Types,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "syndic=info,tower_http=info".into()),
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
    let config = ServerConfig::load(cli.config)?;

    let pool = init_db(&config.database_path).await?;
    let store = Arc::new(VersionedResourceStore::with_ttl(
        ContentRepository::new(pool),
        Duration::from_secs(config.cache_ttl_secs),
    ));

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(&config, store).await?,
        Commands::Import { file } => {
            let contents = std::fs::read_to_string(&file)?;
            let bundle = ContentBundle::from_yaml(&contents)?;
            let summary = import_bundle(&Authoring::new(store), &bundle).await?;
            println!(
                "Imported {} content type(s): {} item(s) created, {} updated, {} unchanged",
                summary.types, summary.created, summary.updated, summary.unchanged
            );
        }
        Commands::Types => {
            let types = store.repo().list_types().await?;
            if types.is_empty() {
                println!("No content types.");
            }
            for content_type in types {
                println!(
                    "{:<20} {:<30} {} field(s)",
                    content_type.slug,
                    content_type.name,
                    content_type.fields.len()
                );
            }
        }
    }

    Ok(())
}

async fn serve(
    config: &ServerConfig,
    store: Arc<VersionedResourceStore>,
) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Content database: {}", config.database_path.display());
    if config.secret_key.is_none() {
        tracing::warn!("No secret_key configured; resources are served without a key");
    }

    let state = AppState::new(store)
        .with_secret_key(config.secret_key.clone())
        .with_max_age(config.max_age_secs);
    let app = router(state).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;
    Ok(())
}
