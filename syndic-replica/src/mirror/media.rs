//! Media download with URL-level deduplication.

use chrono::{SecondsFormat, Utc};
use reqwest::header::CONTENT_TYPE;
use sqlx::{FromRow, SqlitePool};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use super::MirrorError;

const DEFAULT_MIME: &str = "application/octet-stream";

/// A downloaded media file.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct MediaObject {
    pub id: i64,
    pub source_url: String,
    pub file_path: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub owner_id: Option<i64>,
}

impl MediaObject {
    /// URL of the local copy.
    pub fn file_url(&self) -> String {
        format!("file://{}", self.file_path)
    }
}

pub struct MediaMirror {
    pool: SqlitePool,
    media_dir: PathBuf,
    http: reqwest::Client,
}

impl MediaMirror {
    pub fn new(
        pool: SqlitePool,
        media_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Result<Self, MirrorError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MirrorError::Download(e.to_string()))?;

        Ok(Self {
            pool,
            media_dir: media_dir.into(),
            http,
        })
    }

    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    /// Returns the local copy of a media URL, downloading it only if it has
    /// never been mirrored. A hit moves ownership to `owner`.
    pub async fn mirror_media(
        &self,
        source_url: &str,
        owner: Option<i64>,
    ) -> Result<MediaObject, MirrorError> {
        if let Some(mut existing) = self.find_by_url(source_url).await? {
            if owner.is_some() && existing.owner_id != owner {
                sqlx::query("UPDATE media_objects SET owner_id = ? WHERE id = ?")
                    .bind(owner)
                    .bind(existing.id)
                    .execute(&self.pool)
                    .await?;
                existing.owner_id = owner;
            }
            tracing::debug!("Media dedup hit for {}", source_url);
            return Ok(existing);
        }

        let (bytes, mime_type) = self.download(source_url).await?;

        tokio::fs::create_dir_all(&self.media_dir).await?;
        let path = self
            .media_dir
            .join(format!("{}{}", Uuid::new_v4(), extension_of(source_url)));
        tokio::fs::write(&path, &bytes).await?;
        let path = tokio::fs::canonicalize(&path).await.unwrap_or(path);
        let file_path = path.display().to_string();

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO media_objects (source_url, file_path, mime_type, size_bytes, owner_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(source_url)
        .bind(&file_path)
        .bind(&mime_type)
        .bind(bytes.len() as i64)
        .bind(owner)
        .bind(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
        .execute(&mut *tx)
        .await?;
        let id = result.last_insert_rowid();

        sqlx::query("INSERT INTO media_dedup (source_url, media_id) VALUES (?, ?)")
            .bind(source_url)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!("Mirrored {} ({} bytes)", source_url, bytes.len());

        Ok(MediaObject {
            id,
            source_url: source_url.to_string(),
            file_path,
            mime_type,
            size_bytes: bytes.len() as i64,
            owner_id: owner,
        })
    }

    pub async fn find_by_url(&self, source_url: &str) -> Result<Option<MediaObject>, MirrorError> {
        let object: Option<MediaObject> = sqlx::query_as(
            r#"
            SELECT m.id, m.source_url, m.file_path, m.mime_type, m.size_bytes, m.owner_id
            FROM media_dedup d JOIN media_objects m ON m.id = d.media_id
            WHERE d.source_url = ?
            "#,
        )
        .bind(source_url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(object)
    }

    pub async fn get(&self, id: i64) -> Result<Option<MediaObject>, MirrorError> {
        let object: Option<MediaObject> = sqlx::query_as(
            "SELECT id, source_url, file_path, mime_type, size_bytes, owner_id FROM media_objects WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(object)
    }

    pub async fn count(&self) -> Result<i64, MirrorError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM media_objects")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn download(&self, source_url: &str) -> Result<(Vec<u8>, String), MirrorError> {
        let response = self
            .http
            .get(source_url)
            .send()
            .await
            .map_err(|e| MirrorError::Download(format!("{}: {}", source_url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MirrorError::Download(format!(
                "{}: status {}",
                source_url,
                status.as_u16()
            )));
        }

        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_MIME.to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| MirrorError::Download(format!("{}: {}", source_url, e)))?;

        Ok((bytes.to_vec(), mime_type))
    }
}

/// File extension (with dot) of the last path segment of a URL, if it
/// looks like one.
fn extension_of(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path.rsplit('/').next().unwrap_or("");
    match segment.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && !ext.is_empty()
                && ext.len() <= 8
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            format!(".{}", ext.to_ascii_lowercase())
        }
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("http://x/media/photo.JPG"), ".jpg");
        assert_eq!(extension_of("http://x/media/photo.png?size=2"), ".png");
        assert_eq!(extension_of("http://x/media/photo"), "");
        assert_eq!(extension_of("http://x/media/.hidden"), "");
        assert_eq!(extension_of("http://x/a.b/c"), "");
    }

    #[test]
    fn test_file_url() {
        let object = MediaObject {
            id: 1,
            source_url: "http://x/a.png".into(),
            file_path: "/var/media/a.png".into(),
            mime_type: "image/png".into(),
            size_bytes: 3,
            owner_id: None,
        };
        assert_eq!(object.file_url(), "file:///var/media/a.png");
    }
}
