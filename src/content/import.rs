//! YAML content bundles.
//!
//! A bundle describes content types, their presentation and their items:
//!
//! ```yaml
//! global_presentation:
//!   theme: dark
//! content_types:
//!   - slug: articles
//!     name: Articles
//!     fields:
//!       - key: subtitle
//!         field_type: text
//!     presentation:
//!       layout: list
//!     items:
//!       - title: First Post
//!         content: Hello
//! ```
//!
//! Importing is idempotent: items are matched by slug within their type.

use serde::Deserialize;
use syndic_core::FieldDescriptor;

use super::models::{ContentType, ItemDraft};
use crate::server::Authoring;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContentBundle {
    pub global_presentation: Option<serde_json::Value>,
    pub content_types: Vec<BundleType>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BundleType {
    pub slug: String,
    pub name: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
    pub presentation: Option<serde_json::Value>,
    #[serde(default)]
    pub items: Vec<ItemDraft>,
}

impl ContentBundle {
    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(contents)
    }
}

/// Counts of what an import changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub types: usize,
    pub created: usize,
    pub updated: usize,
    /// Items already identical to their bundle entry.
    pub unchanged: usize,
}

/// Applies a bundle through the authoring service.
pub async fn import_bundle(
    authoring: &Authoring,
    bundle: &ContentBundle,
) -> Result<ImportSummary, sqlx::Error> {
    let mut summary = ImportSummary::default();

    for bundle_type in &bundle.content_types {
        let name = bundle_type
            .name
            .clone()
            .unwrap_or_else(|| bundle_type.slug.clone());
        let content_type =
            ContentType::new(&bundle_type.slug, name).with_fields(bundle_type.fields.clone());
        authoring.upsert_type(&content_type).await?;
        summary.types += 1;

        if let Some(presentation) = &bundle_type.presentation {
            authoring
                .set_presentation(&bundle_type.slug, presentation)
                .await?;
        }

        for draft in &bundle_type.items {
            let mut draft = draft.clone();
            if draft.slug.is_empty() {
                draft.slug = super::models::slugify(&draft.title);
            }

            let existing = authoring
                .repo()
                .find_item_by_slug(&bundle_type.slug, &draft.slug)
                .await?;
            match existing {
                Some(item) if draft.matches(&item) => summary.unchanged += 1,
                Some(item) => {
                    authoring.update_item(item.id, &draft).await?;
                    summary.updated += 1;
                }
                None => {
                    authoring.create_item(&bundle_type.slug, &draft).await?;
                    summary.created += 1;
                }
            }
        }
    }

    if let Some(document) = &bundle.global_presentation {
        authoring.set_global_presentation(document).await?;
    }

    tracing::info!(
        "Imported {} content type(s): {} item(s) created, {} updated, {} unchanged",
        summary.types,
        summary.created,
        summary.updated,
        summary.unchanged
    );

    Ok(summary)
}
