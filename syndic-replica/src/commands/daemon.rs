use clap::Args;

use super::open_scheduler;
use syndic_replica::Config;

/// Run scheduled syncs until interrupted
#[derive(Debug, Args)]
pub struct DaemonCommand {}

impl DaemonCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let scheduler = open_scheduler(config).await?;
        scheduler
            .run_forever(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;
        Ok(())
    }
}
