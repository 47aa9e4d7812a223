//! Resource identifiers shared by the Producer and Replicas.
//!
//! Every replicated resource is addressed by a [`ResourceKey`]:
//!
//! ```text
//! items:<category>          item collection of a content category
//! presentation:<category>   presentation rules of a content category
//! global-presentation       the single global presentation document
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur parsing resource identifiers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceKeyError {
    #[error("Invalid category name: '{0}'")]
    InvalidCategory(String),

    #[error("Invalid resource key: '{0}'. Expected items:<category>, presentation:<category> or global-presentation")]
    InvalidKey(String),
}

/// Kind of a replicated resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Items,
    Presentation,
    GlobalPresentation,
}

impl ResourceKind {
    /// Path of the Producer endpoint serving this kind.
    pub fn endpoint_path(&self) -> &'static str {
        match self {
            ResourceKind::Items => "/resources/items",
            ResourceKind::Presentation => "/resources/presentation",
            ResourceKind::GlobalPresentation => "/resources/global-presentation",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Items => write!(f, "items"),
            ResourceKind::Presentation => write!(f, "presentation"),
            ResourceKind::GlobalPresentation => write!(f, "global-presentation"),
        }
    }
}

/// Validates a content category name.
///
/// Category names are non-empty and contain only ASCII letters, digits,
/// `-` and `_`.
pub fn validate_category(category: &str) -> Result<(), ResourceKeyError> {
    let valid = !category.is_empty()
        && category
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ResourceKeyError::InvalidCategory(category.to_string()))
    }
}

/// Stable name of one replicated resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKey {
    Items(String),
    Presentation(String),
    GlobalPresentation,
}

impl ResourceKey {
    pub fn items(category: impl Into<String>) -> Result<Self, ResourceKeyError> {
        let category = category.into();
        validate_category(&category)?;
        Ok(ResourceKey::Items(category))
    }

    pub fn presentation(category: impl Into<String>) -> Result<Self, ResourceKeyError> {
        let category = category.into();
        validate_category(&category)?;
        Ok(ResourceKey::Presentation(category))
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceKey::Items(_) => ResourceKind::Items,
            ResourceKey::Presentation(_) => ResourceKind::Presentation,
            ResourceKey::GlobalPresentation => ResourceKind::GlobalPresentation,
        }
    }

    /// The content category, or `None` for the global presentation document.
    pub fn category(&self) -> Option<&str> {
        match self {
            ResourceKey::Items(c) | ResourceKey::Presentation(c) => Some(c),
            ResourceKey::GlobalPresentation => None,
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKey::Items(c) => write!(f, "items:{}", c),
            ResourceKey::Presentation(c) => write!(f, "presentation:{}", c),
            ResourceKey::GlobalPresentation => write!(f, "global-presentation"),
        }
    }
}

impl FromStr for ResourceKey {
    type Err = ResourceKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "global-presentation" {
            return Ok(ResourceKey::GlobalPresentation);
        }
        match s.split_once(':') {
            Some(("items", category)) => ResourceKey::items(category),
            Some(("presentation", category)) => ResourceKey::presentation(category),
            _ => Err(ResourceKeyError::InvalidKey(s.to_string())),
        }
    }
}

impl Serialize for ResourceKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ResourceKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
