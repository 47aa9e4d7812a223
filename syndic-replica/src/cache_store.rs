//! Persistent cache of Producer resources.
//!
//! Stores one [`CacheEntry`] per [`ResourceKey`], the scheduler's
//! bookkeeping and the set of categories disabled by the cleanup action.
//! Entries are never evicted.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{FromRow, SqlitePool};
use std::collections::BTreeSet;
use syndic_core::{CacheEntry, ResourceKey};

/// Errors from the Replica cache store.
#[derive(Debug)]
pub enum CacheStoreError {
    Database(sqlx::Error),
    /// A stored row could not be decoded.
    Corrupt(String),
}

impl std::fmt::Display for CacheStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheStoreError::Database(e) => write!(f, "Database error: {}", e),
            CacheStoreError::Corrupt(msg) => write!(f, "Corrupt cache entry: {}", msg),
        }
    }
}

impl std::error::Error for CacheStoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheStoreError::Database(e) => Some(e),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for CacheStoreError {
    fn from(e: sqlx::Error) -> Self {
        CacheStoreError::Database(e)
    }
}

/// Persisted scheduler bookkeeping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerState {
    pub last_run: Option<DateTime<Utc>>,
    pub next_scheduled: Option<DateTime<Utc>>,
    pub last_summary: Option<String>,
}

#[derive(FromRow)]
struct CacheEntryRow {
    resource_key: String,
    validator_etag: Option<String>,
    validator_last_modified: Option<String>,
    payload: Option<String>,
    last_http_status: Option<i64>,
    last_error: Option<String>,
    updated_at: Option<String>,
    retired: bool,
}

impl CacheEntryRow {
    fn into_entry(self) -> Result<(ResourceKey, CacheEntry), CacheStoreError> {
        let key: ResourceKey = self
            .resource_key
            .parse()
            .map_err(|e| CacheStoreError::Corrupt(format!("{}: {}", self.resource_key, e)))?;
        let payload = match self.payload {
            Some(raw) => Some(serde_json::from_str(&raw).map_err(|e| {
                CacheStoreError::Corrupt(format!("{}: {}", self.resource_key, e))
            })?),
            None => None,
        };

        Ok((
            key,
            CacheEntry {
                validator_etag: self.validator_etag,
                validator_last_modified: self.validator_last_modified,
                payload,
                last_http_status: self.last_http_status.map(|s| s as u16),
                last_error: self.last_error,
                updated_at: self.updated_at.as_deref().and_then(parse_ts),
                retired: self.retired,
            },
        ))
    }
}

fn format_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Clone)]
pub struct ReplicaCacheStore {
    pool: SqlitePool,
}

impl ReplicaCacheStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn get(&self, key: &ResourceKey) -> Result<Option<CacheEntry>, CacheStoreError> {
        let row: Option<CacheEntryRow> =
            sqlx::query_as("SELECT * FROM cache_entries WHERE resource_key = ?")
                .bind(key.to_string())
                .fetch_optional(&self.pool)
                .await?;

        row.map(|r| r.into_entry().map(|(_, entry)| entry))
            .transpose()
    }

    /// Inserts or replaces the entry of a resource.
    pub async fn put(&self, key: &ResourceKey, entry: &CacheEntry) -> Result<(), CacheStoreError> {
        let payload = entry.payload.as_ref().map(|p| p.to_string());

        sqlx::query(
            r#"
            INSERT INTO cache_entries
                (resource_key, validator_etag, validator_last_modified, payload,
                 last_http_status, last_error, updated_at, retired)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(resource_key) DO UPDATE SET
                validator_etag = excluded.validator_etag,
                validator_last_modified = excluded.validator_last_modified,
                payload = excluded.payload,
                last_http_status = excluded.last_http_status,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at,
                retired = excluded.retired
            "#,
        )
        .bind(key.to_string())
        .bind(&entry.validator_etag)
        .bind(&entry.validator_last_modified)
        .bind(payload)
        .bind(entry.last_http_status.map(i64::from))
        .bind(&entry.last_error)
        .bind(entry.updated_at.map(format_ts))
        .bind(entry.retired)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// All entries, ordered by key.
    pub async fn list(&self) -> Result<Vec<(ResourceKey, CacheEntry)>, CacheStoreError> {
        let rows: Vec<CacheEntryRow> =
            sqlx::query_as("SELECT * FROM cache_entries ORDER BY resource_key")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(CacheEntryRow::into_entry).collect()
    }

    /// Removes an entry. Returns false if none existed.
    pub async fn remove(&self, key: &ResourceKey) -> Result<bool, CacheStoreError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE resource_key = ?")
            .bind(key.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Makes a retired resource eligible for fetching again.
    /// Returns false if the resource has no entry.
    pub async fn clear_retirement(&self, key: &ResourceKey) -> Result<bool, CacheStoreError> {
        match self.get(key).await? {
            Some(mut entry) => {
                entry.clear_retirement();
                self.put(key, &entry).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ------------------------------------------------------------------
    // Disabled categories
    // ------------------------------------------------------------------

    pub async fn disable_category(&self, category: &str) -> Result<(), CacheStoreError> {
        sqlx::query(
            "INSERT INTO disabled_categories (category, disabled_at) VALUES (?, ?) ON CONFLICT(category) DO NOTHING",
        )
        .bind(category)
        .bind(format_ts(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns false if the category was not disabled.
    pub async fn enable_category(&self, category: &str) -> Result<bool, CacheStoreError> {
        let result = sqlx::query("DELETE FROM disabled_categories WHERE category = ?")
            .bind(category)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn disabled_categories(&self) -> Result<BTreeSet<String>, CacheStoreError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT category FROM disabled_categories")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(c,)| c).collect())
    }

    /// Removes every retired entry and disables the categories they belong
    /// to. Returns the removed keys.
    pub async fn cleanup_retired(&self) -> Result<Vec<ResourceKey>, CacheStoreError> {
        let retired: Vec<ResourceKey> = self
            .list()
            .await?
            .into_iter()
            .filter(|(_, entry)| entry.retired)
            .map(|(key, _)| key)
            .collect();

        for key in &retired {
            if let Some(category) = key.category() {
                self.disable_category(category).await?;
            }
            self.remove(key).await?;
        }

        Ok(retired)
    }

    // ------------------------------------------------------------------
    // Scheduler state
    // ------------------------------------------------------------------

    pub async fn scheduler_state(&self) -> Result<SchedulerState, CacheStoreError> {
        let row: Option<(Option<String>, Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT last_run, next_scheduled, last_summary FROM scheduler_state WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some((last_run, next_scheduled, last_summary)) => SchedulerState {
                last_run: last_run.as_deref().and_then(parse_ts),
                next_scheduled: next_scheduled.as_deref().and_then(parse_ts),
                last_summary,
            },
            None => SchedulerState::default(),
        })
    }

    pub async fn set_next_scheduled(&self, at: DateTime<Utc>) -> Result<(), CacheStoreError> {
        sqlx::query(
            r#"
            INSERT INTO scheduler_state (id, next_scheduled) VALUES (1, ?)
            ON CONFLICT(id) DO UPDATE SET next_scheduled = excluded.next_scheduled
            "#,
        )
        .bind(format_ts(at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn record_run(&self, at: DateTime<Utc>, summary: &str) -> Result<(), CacheStoreError> {
        sqlx::query(
            r#"
            INSERT INTO scheduler_state (id, last_run, last_summary) VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET last_run = excluded.last_run, last_summary = excluded.last_summary
            "#,
        )
        .bind(format_ts(at))
        .bind(summary)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Run lease
    // ------------------------------------------------------------------

    /// Takes or renews the cycle lease for `holder` until `until`.
    ///
    /// Returns false while another holder's lease is live at `now`. The
    /// check and the write are a single statement, so two processes can
    /// never both succeed.
    pub async fn acquire_lease(
        &self,
        holder: &str,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<bool, CacheStoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO run_lease (id, holder, locked_until) VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET holder = excluded.holder, locked_until = excluded.locked_until
            WHERE run_lease.holder = excluded.holder OR run_lease.locked_until < ?
            "#,
        )
        .bind(holder)
        .bind(format_ts(until))
        .bind(format_ts(now))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Drops the lease if `holder` still owns it.
    pub async fn release_lease(&self, holder: &str) -> Result<(), CacheStoreError> {
        sqlx::query("DELETE FROM run_lease WHERE holder = ?")
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use chrono::TimeZone;
    use serde_json::json;
    use syndic_core::Validators;
    use tempfile::TempDir;

    struct TestContext {
        store: ReplicaCacheStore,
        _temp_dir: TempDir,
    }

    async fn setup() -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(&temp_dir.path().join("replica.db")).await.unwrap();
        TestContext {
            store: ReplicaCacheStore::new(pool),
            _temp_dir: temp_dir,
        }
    }

    fn articles() -> ResourceKey {
        ResourceKey::items("articles").unwrap()
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let ctx = setup().await;
        assert_eq!(ctx.store.get(&articles()).await.unwrap(), None);

        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut entry = CacheEntry::new();
        entry.record_success(
            json!({"items": []}),
            Validators {
                etag: Some("\"abc\"".into()),
                last_modified: Some("Wed, 01 May 2024 12:00:00 GMT".into()),
            },
            now,
        );
        ctx.store.put(&articles(), &entry).await.unwrap();

        let loaded = ctx.store.get(&articles()).await.unwrap().unwrap();
        assert_eq!(loaded, entry);

        // Overwrite in place
        entry.record_failure(503, "maintenance", now);
        ctx.store.put(&articles(), &entry).await.unwrap();
        let loaded = ctx.store.get(&articles()).await.unwrap().unwrap();
        assert_eq!(loaded.last_http_status, Some(503));
        assert_eq!(loaded.payload, Some(json!({"items": []})));
        assert_eq!(ctx.store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_retirement() {
        let ctx = setup().await;
        let key = ResourceKey::presentation("events").unwrap();
        assert!(!ctx.store.clear_retirement(&key).await.unwrap());

        let mut entry = CacheEntry::new();
        entry.retire("Unknown resource: events", Utc::now());
        ctx.store.put(&key, &entry).await.unwrap();

        assert!(ctx.store.clear_retirement(&key).await.unwrap());
        let loaded = ctx.store.get(&key).await.unwrap().unwrap();
        assert!(!loaded.retired);
        assert_eq!(loaded.last_error, None);
    }

    #[tokio::test]
    async fn test_cleanup_retired_disables_category() {
        let ctx = setup().await;
        let events = ResourceKey::items("events").unwrap();

        let mut retired = CacheEntry::new();
        retired.retire("Unknown resource: events", Utc::now());
        ctx.store.put(&events, &retired).await.unwrap();
        ctx.store.put(&articles(), &CacheEntry::new()).await.unwrap();

        let removed = ctx.store.cleanup_retired().await.unwrap();
        assert_eq!(removed, vec![events.clone()]);
        assert_eq!(ctx.store.get(&events).await.unwrap(), None);
        assert!(ctx.store.get(&articles()).await.unwrap().is_some());

        let disabled = ctx.store.disabled_categories().await.unwrap();
        assert!(disabled.contains("events"));

        assert!(ctx.store.enable_category("events").await.unwrap());
        assert!(!ctx.store.enable_category("events").await.unwrap());
        assert!(ctx.store.disabled_categories().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scheduler_state() {
        let ctx = setup().await;
        assert_eq!(
            ctx.store.scheduler_state().await.unwrap(),
            SchedulerState::default()
        );

        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        ctx.store.set_next_scheduled(at).await.unwrap();
        ctx.store.record_run(at, "3 updated").await.unwrap();

        let state = ctx.store.scheduler_state().await.unwrap();
        assert_eq!(state.next_scheduled, Some(at));
        assert_eq!(state.last_run, Some(at));
        assert_eq!(state.last_summary.as_deref(), Some("3 updated"));
    }

    #[tokio::test]
    async fn test_run_lease() {
        let ctx = setup().await;
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let until = now + chrono::Duration::minutes(5);

        assert!(ctx.store.acquire_lease("a", now, until).await.unwrap());
        // Held by another process
        assert!(!ctx.store.acquire_lease("b", now, until).await.unwrap());
        // Renewal by the holder
        assert!(ctx
            .store
            .acquire_lease("a", now, until + chrono::Duration::minutes(1))
            .await
            .unwrap());

        // An expired lease can be taken over
        let later = until + chrono::Duration::minutes(2);
        assert!(ctx
            .store
            .acquire_lease("b", later, later + chrono::Duration::minutes(5))
            .await
            .unwrap());
        assert!(!ctx.store.acquire_lease("a", later, later).await.unwrap());

        // Releasing someone else's lease does nothing
        ctx.store.release_lease("a").await.unwrap();
        assert!(!ctx.store.acquire_lease("a", later, later).await.unwrap());
        ctx.store.release_lease("b").await.unwrap();
        assert!(ctx.store.acquire_lease("a", later, later).await.unwrap());
    }
}
