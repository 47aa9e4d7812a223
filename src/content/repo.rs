use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use syndic_core::ResourceQuery;

use super::models::{format_ts, parse_ts, ContentType, Item, ItemDraft, PUBLISHED};

/// SQLite-backed storage of content types, items and presentation documents.
#[derive(Debug, Clone)]
pub struct ContentRepository {
    pool: SqlitePool,
}

// Row types for database queries
#[derive(sqlx::FromRow)]
struct ContentTypeRow {
    slug: String,
    name: String,
    fields: String,
    presentation: Option<String>,
    presentation_modified_at: Option<String>,
    created_at: String,
    updated_at: String,
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    id: i64,
    content_type: String,
    title: String,
    slug: String,
    status: String,
    content: String,
    featured_media: Option<String>,
    meta: String,
    created_at: String,
    modified_at: String,
}

#[derive(sqlx::FromRow)]
struct StatsRow {
    max_modified: Option<String>,
    count: i64,
}

impl From<ContentTypeRow> for ContentType {
    fn from(row: ContentTypeRow) -> Self {
        ContentType {
            slug: row.slug,
            name: row.name,
            fields: serde_json::from_str(&row.fields).unwrap_or_default(),
            presentation: row
                .presentation
                .and_then(|p| serde_json::from_str(&p).ok()),
            presentation_modified_at: row.presentation_modified_at.as_deref().map(parse_ts),
            created_at: parse_ts(&row.created_at),
            updated_at: parse_ts(&row.updated_at),
        }
    }
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        Item {
            id: row.id,
            content_type: row.content_type,
            title: row.title,
            slug: row.slug,
            status: row.status,
            content: row.content,
            featured_media: row.featured_media,
            meta: serde_json::from_str(&row.meta).unwrap_or_default(),
            created_at: parse_ts(&row.created_at),
            modified_at: parse_ts(&row.modified_at),
        }
    }
}

/// Returns a timestamp strictly after `previous`, so every write is visible
/// to fingerprints even when two writes share a clock tick.
fn next_modified(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match previous {
        Some(prev) if now <= prev => prev + Duration::microseconds(1),
        _ => now,
    }
}

/// `LIKE` pattern for a filter token.
fn like_pattern(filter: &Option<String>) -> Option<String> {
    filter.as_ref().map(|f| format!("%{}%", f))
}

const VISIBLE_ITEMS: &str = r#"
    FROM items
    WHERE content_type = ?
      AND status = ?
      AND (? IS NULL OR modified_at >= ?)
      AND (? IS NULL OR title LIKE ? OR slug LIKE ?)
"#;

impl ContentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ------------------------------------------------------------------
    // Content types
    // ------------------------------------------------------------------

    /// Creates a content type, or updates name and fields if it exists.
    pub async fn upsert_type(&self, content_type: &ContentType) -> Result<ContentType, sqlx::Error> {
        let fields =
            serde_json::to_string(&content_type.fields).unwrap_or_else(|_| "[]".to_string());
        let existing = self.get_type(&content_type.slug).await?;
        if let Some(existing) = existing
            .as_ref()
            .filter(|t| t.name == content_type.name && t.fields == content_type.fields)
        {
            return Ok(existing.clone());
        }
        let updated_at = next_modified(existing.as_ref().map(|t| t.updated_at));

        sqlx::query(
            r#"
            INSERT INTO content_types (slug, name, fields, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(slug) DO UPDATE SET name = excluded.name, fields = excluded.fields, updated_at = excluded.updated_at
            "#,
        )
        .bind(&content_type.slug)
        .bind(&content_type.name)
        .bind(&fields)
        .bind(format_ts(content_type.created_at))
        .bind(format_ts(updated_at))
        .execute(&self.pool)
        .await?;

        self.get_type(&content_type.slug)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn get_type(&self, slug: &str) -> Result<Option<ContentType>, sqlx::Error> {
        let row: Option<ContentTypeRow> =
            sqlx::query_as("SELECT * FROM content_types WHERE slug = ?")
                .bind(slug)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(ContentType::from))
    }

    pub async fn list_types(&self) -> Result<Vec<ContentType>, sqlx::Error> {
        let rows: Vec<ContentTypeRow> =
            sqlx::query_as("SELECT * FROM content_types ORDER BY slug")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(ContentType::from).collect())
    }

    /// Deletes a content type and all its items. Returns false if it did not exist.
    pub async fn delete_type(&self, slug: &str) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        // Explicit delete; does not rely on the connection's foreign_keys pragma
        sqlx::query("DELETE FROM items WHERE content_type = ?")
            .bind(slug)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM content_types WHERE slug = ?")
            .bind(slug)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    // ------------------------------------------------------------------
    // Items
    // ------------------------------------------------------------------

    pub async fn insert_item(&self, content_type: &str, draft: &ItemDraft) -> Result<Item, sqlx::Error> {
        let now = Utc::now();
        let created_at = draft.created_at.unwrap_or(now);
        let meta = serde_json::to_string(&draft.meta).unwrap_or_else(|_| "{}".to_string());

        let result = sqlx::query(
            r#"
            INSERT INTO items (content_type, title, slug, status, content, featured_media, meta, created_at, modified_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(content_type)
        .bind(&draft.title)
        .bind(&draft.slug)
        .bind(draft.status_or_default())
        .bind(&draft.content)
        .bind(&draft.featured_media)
        .bind(&meta)
        .bind(format_ts(created_at))
        .bind(format_ts(now))
        .execute(&self.pool)
        .await?;

        self.get_item(result.last_insert_rowid())
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    /// Replaces an item's fields. Creation time is never changed, and an
    /// identical draft leaves the item untouched.
    pub async fn update_item(&self, id: i64, draft: &ItemDraft) -> Result<Option<Item>, sqlx::Error> {
        let existing = match self.get_item(id).await? {
            Some(item) => item,
            None => return Ok(None),
        };
        if draft.matches(&existing) {
            return Ok(Some(existing));
        }
        let modified_at = next_modified(Some(existing.modified_at));
        let meta = serde_json::to_string(&draft.meta).unwrap_or_else(|_| "{}".to_string());

        sqlx::query(
            r#"
            UPDATE items
            SET title = ?, slug = ?, status = ?, content = ?, featured_media = ?, meta = ?, modified_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&draft.title)
        .bind(&draft.slug)
        .bind(draft.status_or_default())
        .bind(&draft.content)
        .bind(&draft.featured_media)
        .bind(&meta)
        .bind(format_ts(modified_at))
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get_item(id).await
    }

    /// Deletes an item. Returns its content type, or `None` if it did not exist.
    pub async fn delete_item(&self, id: i64) -> Result<Option<String>, sqlx::Error> {
        let existing = self.get_item(id).await?;
        if existing.is_some() {
            sqlx::query("DELETE FROM items WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        Ok(existing.map(|item| item.content_type))
    }

    pub async fn get_item(&self, id: i64) -> Result<Option<Item>, sqlx::Error> {
        let row: Option<ItemRow> = sqlx::query_as("SELECT * FROM items WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Item::from))
    }

    pub async fn find_item_by_slug(
        &self,
        content_type: &str,
        slug: &str,
    ) -> Result<Option<Item>, sqlx::Error> {
        let row: Option<ItemRow> =
            sqlx::query_as("SELECT * FROM items WHERE content_type = ? AND slug = ? ORDER BY id LIMIT 1")
                .bind(content_type)
                .bind(slug)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Item::from))
    }

    /// Lists the published items selected by a query, plus the total number
    /// of items matching it across all pages.
    pub async fn list_items(
        &self,
        content_type: &str,
        query: &ResourceQuery,
    ) -> Result<(Vec<Item>, u64), sqlx::Error> {
        let since = query.modified_since.map(format_ts);
        let pattern = like_pattern(&query.filter);

        let sql = format!(
            "SELECT * {} ORDER BY modified_at DESC, id DESC LIMIT ? OFFSET ?",
            VISIBLE_ITEMS
        );
        let rows: Vec<ItemRow> = sqlx::query_as(&sql)
            .bind(content_type)
            .bind(PUBLISHED)
            .bind(&since)
            .bind(&since)
            .bind(&pattern)
            .bind(&pattern)
            .bind(&pattern)
            .bind(query.per_page as i64)
            .bind(query.offset() as i64)
            .fetch_all(&self.pool)
            .await?;

        let (_, total) = self.item_stats(content_type, query).await?;
        Ok((rows.into_iter().map(Item::from).collect(), total))
    }

    /// Newest modification time and count of the items matching a query.
    pub async fn item_stats(
        &self,
        content_type: &str,
        query: &ResourceQuery,
    ) -> Result<(Option<DateTime<Utc>>, u64), sqlx::Error> {
        let since = query.modified_since.map(format_ts);
        let pattern = like_pattern(&query.filter);

        let sql = format!(
            "SELECT MAX(modified_at) AS max_modified, COUNT(*) AS count {}",
            VISIBLE_ITEMS
        );
        let row: StatsRow = sqlx::query_as(&sql)
            .bind(content_type)
            .bind(PUBLISHED)
            .bind(&since)
            .bind(&since)
            .bind(&pattern)
            .bind(&pattern)
            .bind(&pattern)
            .fetch_one(&self.pool)
            .await?;

        Ok((
            row.max_modified.as_deref().map(parse_ts),
            row.count.max(0) as u64,
        ))
    }

    // ------------------------------------------------------------------
    // Presentation documents
    // ------------------------------------------------------------------

    /// Replaces a content type's presentation document.
    /// Returns false if the content type does not exist.
    pub async fn set_presentation(
        &self,
        content_type: &str,
        document: &serde_json::Value,
    ) -> Result<bool, sqlx::Error> {
        let existing = match self.get_type(content_type).await? {
            Some(t) => t,
            None => return Ok(false),
        };
        if existing.presentation.as_ref() == Some(document) {
            return Ok(true);
        }
        let modified_at = next_modified(existing.presentation_modified_at);

        sqlx::query(
            "UPDATE content_types SET presentation = ?, presentation_modified_at = ? WHERE slug = ?",
        )
        .bind(document.to_string())
        .bind(format_ts(modified_at))
        .bind(content_type)
        .execute(&self.pool)
        .await?;
        Ok(true)
    }

    pub async fn set_global_presentation(&self, document: &serde_json::Value) -> Result<(), sqlx::Error> {
        let previous = self.get_global_presentation().await?;
        if let Some((stored, _)) = &previous {
            if stored == document {
                return Ok(());
            }
        }
        let modified_at = next_modified(previous.map(|(_, m)| m));

        sqlx::query(
            r#"
            INSERT INTO global_presentation (id, document, modified_at) VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET document = excluded.document, modified_at = excluded.modified_at
            "#,
        )
        .bind(document.to_string())
        .bind(format_ts(modified_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_global_presentation(
        &self,
    ) -> Result<Option<(serde_json::Value, DateTime<Utc>)>, sqlx::Error> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT document, modified_at FROM global_presentation WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(document, modified_at)| {
            (
                serde_json::from_str(&document).unwrap_or(serde_json::Value::Null),
                parse_ts(&modified_at),
            )
        }))
    }
}
