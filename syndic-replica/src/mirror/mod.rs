//! Durable local copies of replicated items.
//!
//! Each remote item of a category with local content enabled becomes a
//! local entity, reached through a replica record
//! `(resource, remote id) -> local id`. Media referenced by the item is
//! downloaded once per URL and referenced by local media id, with companion
//! `<key>__url` and `<key>__mime` metadata.

mod media;

pub use media::{MediaMirror, MediaObject};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::{FromRow, SqlitePool};
use std::collections::{BTreeMap, BTreeSet};
use syndic_core::{FieldDescriptor, FieldType, ItemCollection, RemoteItem};
use tokio::sync::Mutex;

/// Metadata key holding the featured media reference.
pub const FEATURED_MEDIA_KEY: &str = "featured_media";

/// Errors from the local mirror.
#[derive(Debug)]
pub enum MirrorError {
    Database(sqlx::Error),
    Io(std::io::Error),
    Download(String),
}

impl std::fmt::Display for MirrorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MirrorError::Database(e) => write!(f, "Database error: {}", e),
            MirrorError::Io(e) => write!(f, "I/O error: {}", e),
            MirrorError::Download(msg) => write!(f, "Download failed: {}", msg),
        }
    }
}

impl std::error::Error for MirrorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MirrorError::Database(e) => Some(e),
            MirrorError::Io(e) => Some(e),
            MirrorError::Download(_) => None,
        }
    }
}

impl From<sqlx::Error> for MirrorError {
    fn from(e: sqlx::Error) -> Self {
        MirrorError::Database(e)
    }
}

impl From<std::io::Error> for MirrorError {
    fn from(e: std::io::Error) -> Self {
        MirrorError::Io(e)
    }
}

/// A local copy of a remote item.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalEntity {
    pub id: i64,
    pub resource: String,
    pub title: String,
    pub slug: String,
    pub status: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub synced_at: DateTime<Utc>,
    pub meta: BTreeMap<String, Value>,
}

#[derive(FromRow)]
struct LocalEntityRow {
    id: i64,
    resource: String,
    title: String,
    slug: String,
    status: String,
    content: String,
    created_at: String,
    modified_at: String,
    synced_at: String,
}

fn format_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Result of upserting one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created(i64),
    Updated(i64),
}

impl UpsertOutcome {
    pub fn local_id(&self) -> i64 {
        match self {
            UpsertOutcome::Created(id) | UpsertOutcome::Updated(id) => *id,
        }
    }
}

/// Result of applying a collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    pub created: usize,
    pub updated: usize,
    /// Media references that could not be mirrored; the rest of each item
    /// was still applied.
    pub media_failures: usize,
    /// Items that could not be applied, by remote id.
    pub failures: Vec<(i64, String)>,
}

/// Metadata computed for one item before it is written.
#[derive(Default)]
struct MetaPlan {
    values: BTreeMap<String, Value>,
    /// Keys whose stored values must survive because their media could
    /// not be mirrored this time.
    keep: BTreeSet<String>,
    media_failures: usize,
}

impl MetaPlan {
    fn keep_media_field(&mut self, key: &str) {
        self.values.remove(key);
        self.keep.insert(key.to_string());
        self.keep.insert(url_key(key));
        self.keep.insert(mime_key(key));
        self.media_failures += 1;
    }
}

fn url_key(key: &str) -> String {
    format!("{}__url", key)
}

fn mime_key(key: &str) -> String {
    format!("{}__mime", key)
}

fn is_remote_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

pub struct LocalMirror {
    pool: SqlitePool,
    media: MediaMirror,
    /// Serializes upserts so a remote item maps to exactly one entity.
    lock: Mutex<()>,
}

impl LocalMirror {
    pub fn new(pool: SqlitePool, media: MediaMirror) -> Self {
        Self {
            pool,
            media,
            lock: Mutex::new(()),
        }
    }

    pub fn media(&self) -> &MediaMirror {
        &self.media
    }

    /// Upserts every item of a collection. Per-item failures are collected.
    pub async fn apply_collection(&self, resource: &str, collection: &ItemCollection) -> ApplyReport {
        let mut report = ApplyReport::default();

        for item in &collection.items {
            match self.upsert_with_report(resource, item, &collection.fields).await {
                Ok((UpsertOutcome::Created(_), media_failures)) => {
                    report.created += 1;
                    report.media_failures += media_failures;
                }
                Ok((UpsertOutcome::Updated(_), media_failures)) => {
                    report.updated += 1;
                    report.media_failures += media_failures;
                }
                Err(e) => {
                    tracing::warn!("Failed to mirror {} item {}: {}", resource, item.id, e);
                    report.failures.push((item.id, e.to_string()));
                }
            }
        }

        tracing::debug!(
            "Mirrored {}: {} created, {} updated, {} failed",
            resource,
            report.created,
            report.updated,
            report.failures.len()
        );
        report
    }

    /// Creates or updates the local entity of a remote item.
    pub async fn upsert(
        &self,
        resource: &str,
        item: &RemoteItem,
        fields: &[FieldDescriptor],
    ) -> Result<UpsertOutcome, MirrorError> {
        self.upsert_with_report(resource, item, fields)
            .await
            .map(|(outcome, _)| outcome)
    }

    async fn upsert_with_report(
        &self,
        resource: &str,
        item: &RemoteItem,
        fields: &[FieldDescriptor],
    ) -> Result<(UpsertOutcome, usize), MirrorError> {
        let _guard = self.lock.lock().await;
        let now = Utc::now();

        let outcome = match self.find_local_id(resource, item.id).await? {
            Some(local_id) => {
                sqlx::query(
                    r#"
                    UPDATE local_entities
                    SET title = ?, slug = ?, status = ?, content = ?, modified_at = ?, synced_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&item.title)
                .bind(&item.slug)
                .bind(&item.status)
                .bind(&item.content)
                .bind(format_ts(item.modified_at))
                .bind(format_ts(now))
                .bind(local_id)
                .execute(&self.pool)
                .await?;
                UpsertOutcome::Updated(local_id)
            }
            None => {
                let mut tx = self.pool.begin().await?;
                let result = sqlx::query(
                    r#"
                    INSERT INTO local_entities
                        (resource, title, slug, status, content, created_at, modified_at, synced_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(resource)
                .bind(&item.title)
                .bind(&item.slug)
                .bind(&item.status)
                .bind(&item.content)
                .bind(format_ts(item.created_at))
                .bind(format_ts(item.modified_at))
                .bind(format_ts(now))
                .execute(&mut *tx)
                .await?;
                let local_id = result.last_insert_rowid();

                sqlx::query(
                    "INSERT INTO replica_records (resource, remote_id, local_id) VALUES (?, ?, ?)",
                )
                .bind(resource)
                .bind(item.id)
                .bind(local_id)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                UpsertOutcome::Created(local_id)
            }
        };

        let plan = self.plan_meta(item, fields, outcome.local_id()).await;
        let media_failures = plan.media_failures;
        self.write_meta(outcome.local_id(), plan).await?;

        Ok((outcome, media_failures))
    }

    /// Copies metadata verbatim and replaces media URLs with local media.
    async fn plan_meta(&self, item: &RemoteItem, fields: &[FieldDescriptor], owner: i64) -> MetaPlan {
        let mut plan = MetaPlan {
            values: item.meta.clone(),
            ..Default::default()
        };

        for field in fields.iter().filter(|f| f.field_type == FieldType::Media) {
            let value = match item.meta.get(&field.key) {
                Some(value) => value.clone(),
                None => continue,
            };
            self.mirror_field(&mut plan, &field.key, &value, owner).await;
        }

        if let Some(url) = &item.featured_media {
            self.mirror_field(
                &mut plan,
                FEATURED_MEDIA_KEY,
                &Value::String(url.clone()),
                owner,
            )
            .await;
        }

        plan
    }

    async fn mirror_field(&self, plan: &mut MetaPlan, key: &str, value: &Value, owner: i64) {
        match value {
            Value::String(url) if is_remote_url(url) => {
                match self.media.mirror_media(url, Some(owner)).await {
                    Ok(object) => {
                        plan.values.insert(key.to_string(), Value::from(object.id));
                        plan.values.insert(url_key(key), Value::String(object.file_url()));
                        plan.values.insert(mime_key(key), Value::String(object.mime_type));
                    }
                    Err(e) => {
                        tracing::warn!("Failed to mirror media {} for {}: {}", url, key, e);
                        plan.keep_media_field(key);
                    }
                }
            }
            Value::Array(urls)
                if !urls.is_empty() && urls.iter().all(|v| v.as_str().is_some_and(is_remote_url)) =>
            {
                let mut ids = Vec::new();
                let mut file_urls = Vec::new();
                let mut mimes = Vec::new();
                for url in urls.iter().filter_map(Value::as_str) {
                    match self.media.mirror_media(url, Some(owner)).await {
                        Ok(object) => {
                            ids.push(Value::from(object.id));
                            file_urls.push(Value::String(object.file_url()));
                            mimes.push(Value::String(object.mime_type));
                        }
                        Err(e) => {
                            tracing::warn!("Failed to mirror media {} for {}: {}", url, key, e);
                            plan.keep_media_field(key);
                            return;
                        }
                    }
                }
                plan.values.insert(key.to_string(), Value::Array(ids));
                plan.values.insert(url_key(key), Value::Array(file_urls));
                plan.values.insert(mime_key(key), Value::Array(mimes));
            }
            // Anything that is not an http(s) URL stays as sent
            _ => {}
        }
    }

    async fn write_meta(&self, entity_id: i64, plan: MetaPlan) -> Result<(), MirrorError> {
        let mut tx = self.pool.begin().await?;

        let existing: Vec<(String,)> =
            sqlx::query_as("SELECT meta_key FROM entity_meta WHERE entity_id = ?")
                .bind(entity_id)
                .fetch_all(&mut *tx)
                .await?;
        for (key,) in existing {
            if !plan.values.contains_key(&key) && !plan.keep.contains(&key) {
                sqlx::query("DELETE FROM entity_meta WHERE entity_id = ? AND meta_key = ?")
                    .bind(entity_id)
                    .bind(&key)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        for (key, value) in &plan.values {
            sqlx::query(
                r#"
                INSERT INTO entity_meta (entity_id, meta_key, meta_value) VALUES (?, ?, ?)
                ON CONFLICT(entity_id, meta_key) DO UPDATE SET meta_value = excluded.meta_value
                "#,
            )
            .bind(entity_id)
            .bind(key)
            .bind(value.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_local_id(&self, resource: &str, remote_id: i64) -> Result<Option<i64>, MirrorError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT local_id FROM replica_records WHERE resource = ? AND remote_id = ?",
        )
        .bind(resource)
        .bind(remote_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id,)| id))
    }

    /// Local entity mirrored from a remote item, if any.
    pub async fn find_by_remote(
        &self,
        resource: &str,
        remote_id: i64,
    ) -> Result<Option<LocalEntity>, MirrorError> {
        match self.find_local_id(resource, remote_id).await? {
            Some(id) => self.get_entity(id).await,
            None => Ok(None),
        }
    }

    pub async fn get_entity(&self, id: i64) -> Result<Option<LocalEntity>, MirrorError> {
        let row: Option<LocalEntityRow> = sqlx::query_as("SELECT * FROM local_entities WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let meta_rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT meta_key, meta_value FROM entity_meta WHERE entity_id = ? ORDER BY meta_key",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        let meta = meta_rows
            .into_iter()
            .map(|(key, raw)| {
                let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
                (key, value)
            })
            .collect();

        Ok(Some(LocalEntity {
            id: row.id,
            resource: row.resource,
            title: row.title,
            slug: row.slug,
            status: row.status,
            content: row.content,
            created_at: parse_ts(&row.created_at),
            modified_at: parse_ts(&row.modified_at),
            synced_at: parse_ts(&row.synced_at),
            meta,
        }))
    }

    /// Number of local entities mirrored for a resource.
    pub async fn count(&self, resource: &str) -> Result<i64, MirrorError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM replica_records WHERE resource = ?")
                .bind(resource)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}
