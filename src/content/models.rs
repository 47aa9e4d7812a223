use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use syndic_core::{FieldDescriptor, RemoteItem};

/// Item status visible to Replicas.
pub const PUBLISHED: &str = "publish";

/// A content category and its presentation rules.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentType {
    pub slug: String,
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
    pub presentation: Option<serde_json::Value>,
    pub presentation_modified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContentType {
    pub fn new(slug: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            slug: slug.into(),
            name: name.into(),
            fields: Vec::new(),
            presentation: None,
            presentation_modified_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_fields(mut self, fields: Vec<FieldDescriptor>) -> Self {
        self.fields = fields;
        self
    }
}

/// A stored content item.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: i64,
    pub content_type: String,
    pub title: String,
    pub slug: String,
    pub status: String,
    pub content: String,
    pub featured_media: Option<String>,
    pub meta: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Item {
    /// Wire representation published to Replicas.
    pub fn to_remote(&self) -> RemoteItem {
        RemoteItem {
            id: self.id,
            title: self.title.clone(),
            slug: self.slug.clone(),
            status: self.status.clone(),
            content: self.content.clone(),
            featured_media: self.featured_media.clone(),
            created_at: self.created_at,
            modified_at: self.modified_at,
            meta: self.meta.clone(),
        }
    }
}

/// Fields of an item being created or replaced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemDraft {
    pub title: String,
    pub slug: String,
    pub status: Option<String>,
    pub content: String,
    pub featured_media: Option<String>,
    pub meta: BTreeMap<String, serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl ItemDraft {
    pub fn new(title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            slug: slugify(&title),
            title,
            ..Default::default()
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_featured_media(mut self, url: impl Into<String>) -> Self {
        self.featured_media = Some(url.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    pub fn status_or_default(&self) -> &str {
        self.status.as_deref().unwrap_or(PUBLISHED)
    }

    /// True if applying this draft to `item` would change nothing visible.
    pub fn matches(&self, item: &Item) -> bool {
        self.title == item.title
            && self.slug == item.slug
            && self.status_or_default() == item.status
            && self.content == item.content
            && self.featured_media == item.featured_media
            && self.meta == item.meta
    }
}

/// Lowercase, dash-separated slug of a title.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// Stored timestamp format. Fixed-width so string order matches time order.
pub fn format_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  Rust 2024 "), "rust-2024");
        assert_eq!(slugify("---"), "");
    }

    #[test]
    fn test_timestamp_format_sorts() {
        let a = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let b = a + chrono::Duration::microseconds(1);
        assert!(format_ts(a) < format_ts(b));
        assert_eq!(parse_ts(&format_ts(b)), b);
    }

    #[test]
    fn test_draft_defaults() {
        let draft = ItemDraft::new("First Post");
        assert_eq!(draft.slug, "first-post");
        assert_eq!(draft.status_or_default(), PUBLISHED);
    }
}
