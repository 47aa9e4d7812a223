//! Sync engine: one conditional fetch cycle over every configured resource.
//!
//! Each resource is fetched with the validators of its cache entry and the
//! outcome is recorded on that entry alone; a failing resource never stops
//! the others. A resource the Producer reports as unknown is retired and
//! skipped by every later cycle until an operator clears it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use syndic_core::{
    CacheEntry, FetchError, FetchOutcome, ItemCollection, ProducerClient, ResourceKey,
    ResourceQuery, Validators,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::cache_store::{CacheStoreError, ReplicaCacheStore};
use crate::config::{Config, ResourceConfig, DEFAULT_CYCLE_DEADLINE_SECS, DEFAULT_PER_PAGE};
use crate::mirror::LocalMirror;

/// How validators are used for a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleMode {
    /// Send stored validators; unchanged resources answer 304.
    Conditional,
    /// Omit validators so every resource is fetched in full.
    ForceRefresh,
}

/// What happened to one resource during a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum KeyOutcome {
    /// A new payload was stored.
    Updated,
    NotModified,
    /// The Producer does not know the resource; it is now retired.
    Retired,
    /// Retired earlier; not fetched.
    SkippedRetired,
    /// Recoverable failure; the previous payload is kept.
    Failed { status: u16, error: String },
    /// Not reached before the cycle deadline.
    Deferred,
}

/// Summary of one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub mode: CycleMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<(String, KeyOutcome)>,
    /// Items or media the local mirror could not apply.
    pub mirror_failures: usize,
}

impl CycleReport {
    fn count(&self, pred: impl Fn(&KeyOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }

    pub fn updated(&self) -> usize {
        self.count(|o| matches!(o, KeyOutcome::Updated))
    }

    pub fn not_modified(&self) -> usize {
        self.count(|o| matches!(o, KeyOutcome::NotModified))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, KeyOutcome::Failed { .. }))
    }

    /// Newly retired plus previously retired resources.
    pub fn retired(&self) -> usize {
        self.count(|o| matches!(o, KeyOutcome::Retired | KeyOutcome::SkippedRetired))
    }

    pub fn deferred(&self) -> usize {
        self.count(|o| matches!(o, KeyOutcome::Deferred))
    }

    pub fn outcome(&self, key: &ResourceKey) -> Option<&KeyOutcome> {
        let key = key.to_string();
        self.outcomes
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, outcome)| outcome)
    }

    /// One-line summary for logs and scheduler state.
    pub fn summary(&self) -> String {
        format!(
            "{} updated, {} not modified, {} failed, {} retired, {} deferred",
            self.updated(),
            self.not_modified(),
            self.failed(),
            self.retired(),
            self.deferred()
        )
    }
}

/// Errors that prevent a cycle from running.
#[derive(Debug)]
pub enum EngineError {
    /// Another cycle holds the run lock.
    AlreadyRunning,
    Store(CacheStoreError),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::AlreadyRunning => write!(f, "A sync cycle is already running"),
            EngineError::Store(e) => write!(f, "Cache store error: {}", e),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Store(e) => Some(e),
            EngineError::AlreadyRunning => None,
        }
    }
}

impl From<CacheStoreError> for EngineError {
    fn from(e: CacheStoreError) -> Self {
        EngineError::Store(e)
    }
}

/// Which resources a cycle covers and how.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub resources: Vec<ResourceConfig>,
    pub include_global_presentation: bool,
    pub per_page: u32,
    pub cycle_deadline: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            resources: Vec::new(),
            include_global_presentation: true,
            per_page: DEFAULT_PER_PAGE,
            cycle_deadline: Duration::from_secs(DEFAULT_CYCLE_DEADLINE_SECS),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            resources: config.resources.clone(),
            include_global_presentation: config.include_global_presentation,
            per_page: config.sync.per_page,
            cycle_deadline: config.sync.cycle_deadline(),
        }
    }

    /// Every configured resource key, in fetch order.
    pub fn keys(&self) -> Vec<ResourceKey> {
        let mut keys = Vec::new();
        for resource in &self.resources {
            keys.push(ResourceKey::Items(resource.category.clone()));
            keys.push(ResourceKey::Presentation(resource.category.clone()));
        }
        if self.include_global_presentation {
            keys.push(ResourceKey::GlobalPresentation);
        }
        keys
    }

    fn local_content(&self, category: &str) -> bool {
        self.resources
            .iter()
            .any(|r| r.category == category && r.local_content)
    }
}

/// Lease time past the cycle deadline, covering the request in flight when
/// the deadline passes.
const LEASE_GRACE: Duration = Duration::from_secs(60);

/// State of one running cycle.
struct Cycle {
    mode: CycleMode,
    started: Instant,
    /// Resources not yet processed in this run.
    pending: VecDeque<ResourceKey>,
    report: CycleReport,
}

impl Cycle {
    fn defer_remaining(&mut self, key: ResourceKey) {
        self.report.outcomes.push((key.to_string(), KeyOutcome::Deferred));
        while let Some(key) = self.pending.pop_front() {
            self.report.outcomes.push((key.to_string(), KeyOutcome::Deferred));
        }
    }
}

pub struct SyncEngine {
    client: ProducerClient,
    store: ReplicaCacheStore,
    mirror: Option<LocalMirror>,
    settings: EngineSettings,
    run_lock: Mutex<()>,
    /// Owner id written to the run lease.
    holder: String,
}

impl SyncEngine {
    pub fn new(
        client: ProducerClient,
        store: ReplicaCacheStore,
        mirror: Option<LocalMirror>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            client,
            store,
            mirror,
            settings,
            run_lock: Mutex::new(()),
            holder: Uuid::new_v4().to_string(),
        }
    }

    pub fn store(&self) -> &ReplicaCacheStore {
        &self.store
    }

    pub fn mirror(&self) -> Option<&LocalMirror> {
        self.mirror.as_ref()
    }

    pub fn producer_url(&self) -> &str {
        self.client.server_url()
    }

    /// Resources a cycle would cover: configured keys minus disabled
    /// categories.
    pub async fn enabled_keys(&self) -> Result<Vec<ResourceKey>, EngineError> {
        let disabled = self.store.disabled_categories().await?;
        Ok(self
            .settings
            .keys()
            .into_iter()
            .filter(|key| match key.category() {
                Some(category) => !disabled.contains(category),
                None => true,
            })
            .collect())
    }

    /// Runs one cycle over every enabled resource.
    ///
    /// Fails only if another cycle is running, in this process or in any
    /// other process sharing the database, or if the cache store cannot be
    /// read at all. Per-resource failures are recorded in the report.
    pub async fn run_cycle(&self, mode: CycleMode) -> Result<CycleReport, EngineError> {
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| EngineError::AlreadyRunning)?;

        let now = Utc::now();
        if !self
            .store
            .acquire_lease(&self.holder, now, self.lease_until(now))
            .await?
        {
            tracing::info!("Another replica process is running a sync cycle");
            return Err(EngineError::AlreadyRunning);
        }

        let result = self.run_keys(mode).await;
        if let Err(e) = self.store.release_lease(&self.holder).await {
            tracing::warn!("Failed to release sync lease: {}", e);
        }
        result
    }

    async fn run_keys(&self, mode: CycleMode) -> Result<CycleReport, EngineError> {
        let keys = self.enabled_keys().await?;
        let started_at = Utc::now();
        tracing::info!("Starting {:?} sync cycle over {} resource(s)", mode, keys.len());

        let mut cycle = Cycle {
            mode,
            started: Instant::now(),
            pending: keys.into(),
            report: CycleReport {
                mode,
                started_at,
                finished_at: started_at,
                outcomes: Vec::new(),
                mirror_failures: 0,
            },
        };

        while let Some(key) = cycle.pending.pop_front() {
            if cycle.started.elapsed() >= self.settings.cycle_deadline {
                tracing::warn!(
                    "Cycle deadline reached; deferring {} resource(s)",
                    cycle.pending.len() + 1
                );
                cycle.defer_remaining(key);
                break;
            }
            if !self.renew_lease().await {
                tracing::warn!(
                    "Sync lease taken over; deferring {} resource(s)",
                    cycle.pending.len() + 1
                );
                cycle.defer_remaining(key);
                break;
            }

            let outcome = self.sync_key(&key, &mut cycle).await;
            cycle.report.outcomes.push((key.to_string(), outcome));
        }

        cycle.report.finished_at = Utc::now();
        tracing::info!("Sync cycle finished: {}", cycle.report.summary());
        Ok(cycle.report)
    }

    fn lease_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let ttl = self.settings.cycle_deadline.saturating_add(LEASE_GRACE);
        now + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(1))
    }

    /// Extends the lease before each resource. A store error keeps the
    /// cycle going; only a lease held by someone else stops it.
    async fn renew_lease(&self) -> bool {
        let now = Utc::now();
        match self
            .store
            .acquire_lease(&self.holder, now, self.lease_until(now))
            .await
        {
            Ok(held) => held,
            Err(e) => {
                tracing::warn!("Failed to renew sync lease: {}", e);
                true
            }
        }
    }

    async fn sync_key(&self, key: &ResourceKey, cycle: &mut Cycle) -> KeyOutcome {
        let mut entry = match self.store.get(key).await {
            Ok(entry) => entry.unwrap_or_default(),
            Err(CacheStoreError::Corrupt(message)) => {
                tracing::warn!("Replacing unreadable cache entry: {}", message);
                CacheEntry::default()
            }
            Err(e) => return store_failure(key, e),
        };
        if entry.retired {
            tracing::debug!("Skipping retired {}", key);
            return KeyOutcome::SkippedRetired;
        }

        let validators = match cycle.mode {
            CycleMode::Conditional => entry.validators(),
            CycleMode::ForceRefresh => Validators::default(),
        };
        let query = self.query_for(key);

        let outcome = match self.client.fetch(key, &query, &validators).await {
            Ok(FetchOutcome::NotModified) => {
                tracing::debug!("{} not modified", key);
                entry.record_not_modified(Utc::now());
                KeyOutcome::NotModified
            }
            Ok(FetchOutcome::Modified { body, validators }) => {
                self.apply_body(key, &mut entry, &body, validators, cycle)
                    .await
            }
            Err(e) => record_fetch_error(key, &mut entry, e, Utc::now()),
        };

        if let Err(e) = self.store.put(key, &entry).await {
            return store_failure(key, e);
        }
        outcome
    }

    /// Parses a 200 body and stores it, mirroring items if enabled.
    async fn apply_body(
        &self,
        key: &ResourceKey,
        entry: &mut CacheEntry,
        body: &str,
        validators: Validators,
        cycle: &mut Cycle,
    ) -> KeyOutcome {
        let mut payload: serde_json::Value = match serde_json::from_str(body) {
            Ok(payload) => payload,
            Err(e) => return record_parse_error(key, entry, &e.to_string(), Utc::now()),
        };

        let collection = match key {
            ResourceKey::Items(_) => {
                let mut collection =
                    match serde_json::from_value::<ItemCollection>(payload.clone()) {
                        Ok(collection) => collection,
                        Err(e) => return record_parse_error(key, entry, &e.to_string(), Utc::now()),
                    };
                match self.fetch_remaining_pages(key, &mut collection).await {
                    Ok(0) => {}
                    Ok(pages) => {
                        tracing::debug!("Merged {} more page(s) of {}", pages, key);
                        match serde_json::to_value(&collection) {
                            Ok(merged) => payload = merged,
                            Err(e) => {
                                return record_parse_error(key, entry, &e.to_string(), Utc::now())
                            }
                        }
                    }
                    Err(e) => return record_fetch_error(key, entry, e, Utc::now()),
                }
                Some(collection)
            }
            _ => None,
        };

        entry.record_success(payload, validators, Utc::now());
        tracing::info!("Updated {}", key);

        if let (Some(collection), Some(category), Some(mirror)) =
            (collection, key.category(), self.mirror.as_ref())
        {
            if self.settings.local_content(category) {
                let report = mirror.apply_collection(category, &collection).await;
                let failures = report.failures.len() + report.media_failures;
                if failures > 0 {
                    tracing::warn!(
                        "{} mirror failure(s) for {}; refetching next cycle",
                        failures,
                        key
                    );
                    entry.forget_validators();
                }
                cycle.report.mirror_failures += failures;
            }
        }

        KeyOutcome::Updated
    }

    /// Fetches the pages after the first until `collection` holds every
    /// item the Producer reported. Returns the number of pages added.
    async fn fetch_remaining_pages(
        &self,
        key: &ResourceKey,
        collection: &mut ItemCollection,
    ) -> Result<u32, FetchError> {
        let per_page = u64::from(collection.per_page.max(1));
        let last_page = collection.total.div_ceil(per_page);
        let mut page = collection.page.max(1);
        let mut added = 0;

        while (collection.items.len() as u64) < collection.total && u64::from(page) < last_page {
            page += 1;
            let query = self.query_for(key).with_page(page);
            let body = match self.client.fetch(key, &query, &Validators::default()).await? {
                FetchOutcome::Modified { body, .. } => body,
                FetchOutcome::NotModified => {
                    return Err(FetchError::Parse(format!("Unexpected 304 for page {}", page)))
                }
            };
            let next: ItemCollection =
                serde_json::from_str(&body).map_err(|e| FetchError::Parse(e.to_string()))?;
            if next.items.is_empty() {
                break;
            }
            collection.items.extend(next.items);
            added += 1;
        }

        Ok(added)
    }

    fn query_for(&self, key: &ResourceKey) -> ResourceQuery {
        match key {
            ResourceKey::Items(_) => ResourceQuery::default().with_per_page(self.settings.per_page),
            _ => ResourceQuery::default(),
        }
    }
}

fn record_fetch_error(
    key: &ResourceKey,
    entry: &mut CacheEntry,
    error: FetchError,
    now: DateTime<Utc>,
) -> KeyOutcome {
    match error {
        FetchError::UnknownResource(message) => {
            tracing::warn!("Producer does not know {}; retiring it", key);
            entry.retire(&message, now);
            KeyOutcome::Retired
        }
        FetchError::Transport(message) => {
            tracing::warn!("Failed to fetch {}: {}", key, message);
            entry.record_transport_error(&message, now);
            KeyOutcome::Failed {
                status: 0,
                error: message,
            }
        }
        e => {
            let body = match &e {
                FetchError::Authorization(body) | FetchError::Parse(body) => body.clone(),
                FetchError::Server { body, .. } => body.clone(),
                other => other.to_string(),
            };
            tracing::warn!("Failed to fetch {}: {}", key, e);
            entry.record_failure(e.status(), &body, now);
            KeyOutcome::Failed {
                status: e.status(),
                error: e.to_string(),
            }
        }
    }
}

fn record_parse_error(
    key: &ResourceKey,
    entry: &mut CacheEntry,
    message: &str,
    now: DateTime<Utc>,
) -> KeyOutcome {
    tracing::warn!("Failed to parse response for {}: {}", key, message);
    entry.record_parse_error(message, now);
    KeyOutcome::Failed {
        status: 200,
        error: format!("Parse error: {}", message),
    }
}

/// The cache row could not be read or written; nothing is recorded for
/// this resource and the cycle moves on.
fn store_failure(key: &ResourceKey, error: CacheStoreError) -> KeyOutcome {
    tracing::error!("Cache store error for {}: {}", key, error);
    KeyOutcome::Failed {
        status: 0,
        error: format!("Cache store error: {}", error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_keys_order() {
        let settings = EngineSettings {
            resources: vec![
                ResourceConfig::new("articles").with_local_content(),
                ResourceConfig::new("events"),
            ],
            ..Default::default()
        };
        let keys: Vec<String> = settings.keys().iter().map(ToString::to_string).collect();
        assert_eq!(
            keys,
            vec![
                "items:articles",
                "presentation:articles",
                "items:events",
                "presentation:events",
                "global-presentation",
            ]
        );
        assert!(settings.local_content("articles"));
        assert!(!settings.local_content("events"));
    }

    #[test]
    fn test_report_counts() {
        let now = Utc::now();
        let report = CycleReport {
            mode: CycleMode::Conditional,
            started_at: now,
            finished_at: now,
            outcomes: vec![
                ("items:a".into(), KeyOutcome::Updated),
                ("presentation:a".into(), KeyOutcome::NotModified),
                ("items:b".into(), KeyOutcome::Retired),
                ("presentation:b".into(), KeyOutcome::SkippedRetired),
                (
                    "global-presentation".into(),
                    KeyOutcome::Failed {
                        status: 503,
                        error: "down".into(),
                    },
                ),
            ],
            mirror_failures: 0,
        };
        assert_eq!(
            report.summary(),
            "1 updated, 1 not modified, 1 failed, 2 retired, 0 deferred"
        );
        assert_eq!(
            report.outcome(&ResourceKey::items("b").unwrap()),
            Some(&KeyOutcome::Retired)
        );
    }
}
