//! Manual sync trigger.

use clap::Args;

use super::open_scheduler;
use syndic_replica::{Config, CycleMode, CycleReport, KeyOutcome};

/// Run one sync cycle now
#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Ignore stored validators and fetch every resource in full
    #[arg(long)]
    force: bool,
}

impl SyncCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let scheduler = open_scheduler(config).await?;
        let mode = if self.force {
            CycleMode::ForceRefresh
        } else {
            CycleMode::Conditional
        };

        println!("Syncing with {}...", scheduler.engine().producer_url());
        println!();

        let report = scheduler.run_now(mode).await?;
        print_report(&report);
        Ok(())
    }
}

pub fn print_report(report: &CycleReport) {
    for (key, outcome) in &report.outcomes {
        let line = match outcome {
            KeyOutcome::Updated => "✓ updated".to_string(),
            KeyOutcome::NotModified => "✓ up to date".to_string(),
            KeyOutcome::Retired => "✗ retired (unknown to the Producer)".to_string(),
            KeyOutcome::SkippedRetired => "- skipped (retired)".to_string(),
            KeyOutcome::Failed { status, error } => format!("✗ failed ({}): {}", status, error),
            KeyOutcome::Deferred => "- deferred (cycle deadline)".to_string(),
        };
        println!("  {:<32} {}", key, line);
    }

    println!();
    println!("{}", report.summary());
    if report.mirror_failures > 0 {
        println!("{} local mirror failure(s); see log for details", report.mirror_failures);
    }
}
