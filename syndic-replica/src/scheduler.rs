//! Fixed-interval scheduling of sync cycles.
//!
//! The next invocation time is persisted, so a restarted Replica resumes the
//! schedule instead of waiting a full interval. Manual runs share the
//! engine's run lock with scheduled ones.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::cache_store::SchedulerState;
use crate::engine::{CycleMode, CycleReport, EngineError, SyncEngine};

/// Upper bound on how long the daemon sleeps between checks.
pub const MAX_POLL_PERIOD: Duration = Duration::from_secs(30);

pub struct Scheduler {
    engine: Arc<SyncEngine>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(engine: Arc<SyncEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn poll_period(&self) -> Duration {
        self.interval.min(MAX_POLL_PERIOD)
    }

    fn interval_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::seconds(self.interval.as_secs() as i64)
    }

    /// Arms an immediate run unless a future run is already armed.
    /// Returns the armed time.
    pub async fn ensure_armed(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, EngineError> {
        let state = self.engine.store().scheduler_state().await?;
        match state.next_scheduled {
            Some(next) if next > now => Ok(next),
            _ => {
                tracing::info!("Arming sync at {}", now);
                self.engine.store().set_next_scheduled(now).await?;
                Ok(now)
            }
        }
    }

    /// Runs a conditional cycle if the armed time has come, then re-arms
    /// one interval later. Returns `None` if nothing was due.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Option<CycleReport>, EngineError> {
        let state = self.engine.store().scheduler_state().await?;
        match state.next_scheduled {
            Some(next) if next <= now => {}
            _ => return Ok(None),
        }

        let report = match self.engine.run_cycle(CycleMode::Conditional).await {
            Ok(report) => report,
            Err(EngineError::AlreadyRunning) => {
                tracing::info!("Scheduled sync skipped: a manual sync is running");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let store = self.engine.store();
        store.record_run(now, &report.summary()).await?;
        store.set_next_scheduled(self.interval_after(now)).await?;
        Ok(Some(report))
    }

    /// Manual trigger. Does not move the armed schedule.
    pub async fn run_now(&self, mode: CycleMode) -> Result<CycleReport, EngineError> {
        let report = self.engine.run_cycle(mode).await?;
        self.engine
            .store()
            .record_run(report.finished_at, &report.summary())
            .await?;
        Ok(report)
    }

    pub async fn status(&self) -> Result<SchedulerState, EngineError> {
        Ok(self.engine.store().scheduler_state().await?)
    }

    /// Daemon loop: polls `tick` until `shutdown` resolves.
    pub async fn run_forever<F>(&self, shutdown: F) -> Result<(), EngineError>
    where
        F: Future<Output = ()>,
    {
        let armed = self.ensure_armed(Utc::now()).await?;
        tracing::info!(
            "Scheduler running every {}s; next sync at {}",
            self.interval.as_secs(),
            armed
        );

        tokio::pin!(shutdown);
        loop {
            match self.tick(Utc::now()).await {
                Ok(Some(report)) => {
                    tracing::info!("Scheduled sync complete: {}", report.summary())
                }
                Ok(None) => {}
                Err(e) => tracing::error!("Scheduled sync failed: {}", e),
            }

            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Scheduler stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.poll_period()) => {}
            }
        }
    }
}
