use chrono::{DateTime, Utc};
use clap::Args;

use super::open_store;
use syndic_core::cache::truncate;
use syndic_replica::Config;

const ERROR_PREVIEW_LEN: usize = 80;

/// Show cached resources and scheduler state
#[derive(Debug, Args)]
pub struct StatusCommand {}

impl StatusCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let store = open_store(config).await?;
        let entries = store.list().await?;
        let state = store.scheduler_state().await?;
        let disabled = store.disabled_categories().await?;

        println!("Replica Status");
        println!("==============\n");

        println!("Last run:  {}", format_time(state.last_run));
        println!("Next run:  {}", format_time(state.next_scheduled));
        if let Some(summary) = &state.last_summary {
            println!("Summary:   {}", summary);
        }
        println!();

        if entries.is_empty() {
            println!("No cached resources. Run 'syndic-replica sync' first.");
        }
        for (key, entry) in &entries {
            let status = entry
                .last_http_status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string());
            let retired = if entry.retired { " [retired]" } else { "" };
            println!("{:<32} {:>4}  {}{}", key, status, format_time(entry.updated_at), retired);
            if let Some(error) = &entry.last_error {
                println!("    {}", truncate(error, ERROR_PREVIEW_LEN));
            }
        }

        if !disabled.is_empty() {
            println!();
            println!("Disabled categories:");
            for category in &disabled {
                println!("  {}", category);
            }
        }
        Ok(())
    }
}

fn format_time(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string())
}
