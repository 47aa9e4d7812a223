//! Wire types exchanged between the Producer and Replicas.
//!
//! All bodies are JSON. Presentation documents are opaque
//! [`serde_json::Value`]s and are not modelled here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Error code signalling that the Producer does not know a resource.
///
/// This is the only code a Replica treats as permanent.
pub const BAD_RESOURCE: &str = "bad_resource";
/// Error code for a missing or incorrect access key.
pub const FORBIDDEN: &str = "forbidden";
/// Error code for a request without the `resource` parameter.
pub const MISSING_RESOURCE: &str = "missing_resource";
/// Error code for a Producer-side failure.
pub const INTERNAL_ERROR: &str = "internal_error";

/// Machine-readable error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_bad_resource(&self) -> bool {
        self.code == BAD_RESOURCE
    }
}

/// Type of a per-category metadata field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Boolean,
    Date,
    /// Value is a media URL (or a list of URLs when `multiple`).
    Media,
    Json,
}

/// Describes one metadata field of a content category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub key: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub multiple: bool,
}

impl FieldDescriptor {
    pub fn new(key: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            key: key.into(),
            field_type,
            multiple: false,
        }
    }

    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }
}

/// One content item as published by the Producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub featured_media: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub meta: BTreeMap<String, serde_json::Value>,
}

fn default_status() -> String {
    "publish".to_string()
}

/// A page of items of one content category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemCollection {
    pub resource: String,
    pub items: Vec<RemoteItem>,
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
}

impl ItemCollection {
    pub fn empty(resource: impl Into<String>, page: u32, per_page: u32) -> Self {
        Self {
            resource: resource.into(),
            items: Vec::new(),
            fields: Vec::new(),
            page,
            per_page,
            total: 0,
        }
    }

    /// Looks up the descriptor of a metadata field.
    pub fn field(&self, key: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.key == key)
    }
}

/// Diagnostics summary served by `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSummary {
    pub status: String,
    pub version: String,
    pub resources: Vec<String>,
    pub cached_result_sets: usize,
    pub global_presentation: bool,
}
