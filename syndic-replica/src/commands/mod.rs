mod config_cmd;
mod daemon;
mod resource;
mod status;
mod sync_cmd;

pub use config_cmd::ConfigCommand;
pub use daemon::DaemonCommand;
pub use resource::ResourceCommand;
pub use status::StatusCommand;
pub use sync_cmd::SyncCommand;

use chrono::Utc;
use std::sync::Arc;

use syndic_core::ProducerClient;
use syndic_replica::db::init_db;
use syndic_replica::{
    Config, EngineSettings, LocalMirror, MediaMirror, ReplicaCacheStore, Scheduler, SyncEngine,
};

/// Opens the cache store without contacting the Producer.
pub async fn open_store(config: &Config) -> Result<ReplicaCacheStore, sqlx::Error> {
    let pool = init_db(&config.database_path.value).await?;
    Ok(ReplicaCacheStore::new(pool))
}

/// Builds the scheduler and engine for the configured Producer, arming an
/// immediate run if none is pending.
pub async fn open_scheduler(config: &Config) -> Result<Scheduler, Box<dyn std::error::Error>> {
    let url = config.producer_url.value.as_deref().ok_or(
        "Producer URL not configured. Set producer.url in the config file or SYNDIC_PRODUCER_URL",
    )?;
    if config.resources.is_empty() {
        tracing::warn!("No resources configured; only the global presentation is replicated");
    }

    let pool = init_db(&config.database_path.value).await?;
    let client = ProducerClient::new(
        url,
        config.producer_key.value.clone(),
        config.sync.request_timeout(),
    )?;

    let mirror = if config.resources.iter().any(|r| r.local_content) {
        let media = MediaMirror::new(
            pool.clone(),
            config.media_dir.value.clone(),
            config.sync.request_timeout(),
        )?;
        Some(LocalMirror::new(pool.clone(), media))
    } else {
        None
    };

    let engine = SyncEngine::new(
        client,
        ReplicaCacheStore::new(pool),
        mirror,
        EngineSettings::from_config(config),
    );
    let scheduler = Scheduler::new(Arc::new(engine), config.sync.interval());
    scheduler.ensure_armed(Utc::now()).await?;
    Ok(scheduler)
}
