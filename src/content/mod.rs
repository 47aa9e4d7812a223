//! Producer-side content storage.
//!
//! Content types, their items and presentation documents live in SQLite.
//! Writes go through [`crate::server::Authoring`] so cached resource
//! representations are invalidated.

mod import;
mod models;
mod repo;

pub use import::{import_bundle, ContentBundle, ImportSummary};
pub use models::{slugify, ContentType, Item, ItemDraft, PUBLISHED};
pub use repo::ContentRepository;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Initialize the database connection pool and run migrations
pub async fn init_db(path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite:{}?mode=rwc", path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .foreign_keys(true)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    // Run migrations
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}
