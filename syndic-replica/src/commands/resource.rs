use clap::{Args, Subcommand};

use super::open_store;
use syndic_core::ResourceKey;
use syndic_replica::Config;

#[derive(Args)]
pub struct ResourceCommand {
    #[command(subcommand)]
    pub command: ResourceSubcommand,
}

#[derive(Subcommand)]
pub enum ResourceSubcommand {
    /// Clear the retired flag of a resource so it is fetched again
    Clear {
        /// Resource key, e.g. items:articles
        key: ResourceKey,
    },

    /// Remove retired resources and stop syncing their categories
    CleanupRetired,

    /// Resume syncing a category disabled by cleanup-retired
    Enable {
        category: String,
    },
}

impl ResourceCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let store = open_store(config).await?;
        match &self.command {
            ResourceSubcommand::Clear { key } => {
                if store.clear_retirement(key).await? {
                    println!("Cleared retirement of {}", key);
                } else {
                    println!("No cached entry for {}", key);
                }
            }
            ResourceSubcommand::CleanupRetired => {
                let removed = store.cleanup_retired().await?;
                if removed.is_empty() {
                    println!("No retired resources");
                }
                for key in &removed {
                    println!("Removed {}", key);
                }
            }
            ResourceSubcommand::Enable { category } => {
                if store.enable_category(category).await? {
                    println!("Enabled {}", category);
                } else {
                    println!("{} was not disabled", category);
                }
            }
        }
        Ok(())
    }
}
