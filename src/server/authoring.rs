//! Authoring operations on Producer content.
//!
//! Every mutation goes through here so that the resource store is
//! invalidated for exactly the resources the write touches.

use std::sync::Arc;
use syndic_core::ResourceKey;

use super::store::VersionedResourceStore;
use crate::content::{ContentRepository, ContentType, Item, ItemDraft};

#[derive(Clone)]
pub struct Authoring {
    store: Arc<VersionedResourceStore>,
}

impl Authoring {
    pub fn new(store: Arc<VersionedResourceStore>) -> Self {
        Self { store }
    }

    pub fn repo(&self) -> &ContentRepository {
        self.store.repo()
    }

    pub fn store(&self) -> &VersionedResourceStore {
        &self.store
    }

    /// Creates or updates a content type. Changes to its field schema are
    /// visible in its items resource, so both resources are invalidated.
    pub async fn upsert_type(&self, content_type: &ContentType) -> Result<ContentType, sqlx::Error> {
        let before = self.repo().get_type(&content_type.slug).await?;
        let saved = self.repo().upsert_type(content_type).await?;
        if before.as_ref() != Some(&saved) {
            self.store.invalidate_category(&saved.slug).await;
        }
        Ok(saved)
    }

    /// Deletes a content type and all of its items.
    pub async fn delete_type(&self, slug: &str) -> Result<bool, sqlx::Error> {
        let deleted = self.repo().delete_type(slug).await?;
        if deleted {
            self.store.invalidate_category(slug).await;
        }
        Ok(deleted)
    }

    pub async fn create_item(&self, category: &str, draft: &ItemDraft) -> Result<Item, sqlx::Error> {
        let item = self.repo().insert_item(category, draft).await?;
        self.store
            .invalidate(&ResourceKey::Items(category.to_string()))
            .await;
        Ok(item)
    }

    pub async fn update_item(&self, id: i64, draft: &ItemDraft) -> Result<Option<Item>, sqlx::Error> {
        let before = self.repo().get_item(id).await?;
        let item = self.repo().update_item(id, draft).await?;
        if let Some(item) = item.as_ref().filter(|item| before.as_ref() != Some(*item)) {
            self.store
                .invalidate(&ResourceKey::Items(item.content_type.clone()))
                .await;
        }
        Ok(item)
    }

    pub async fn delete_item(&self, id: i64) -> Result<bool, sqlx::Error> {
        match self.repo().delete_item(id).await? {
            Some(category) => {
                self.store.invalidate(&ResourceKey::Items(category)).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Replaces the presentation document of a category.
    /// Returns false if the category does not exist.
    pub async fn set_presentation(
        &self,
        category: &str,
        document: &serde_json::Value,
    ) -> Result<bool, sqlx::Error> {
        let before = self.repo().get_type(category).await?;
        let updated = self.repo().set_presentation(category, document).await?;
        let changed = before.is_some_and(|t| t.presentation.as_ref() != Some(document));
        if updated && changed {
            self.store
                .invalidate(&ResourceKey::Presentation(category.to_string()))
                .await;
        }
        Ok(updated)
    }

    pub async fn set_global_presentation(&self, document: &serde_json::Value) -> Result<(), sqlx::Error> {
        let before = self.repo().get_global_presentation().await?;
        if before.is_some_and(|(stored, _)| &stored == document) {
            return Ok(());
        }
        self.repo().set_global_presentation(document).await?;
        self.store.invalidate(&ResourceKey::GlobalPresentation).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::init_db;
    use serde_json::json;
    use syndic_core::ResourceQuery;
    use tempfile::TempDir;

    struct TestContext {
        authoring: Authoring,
        store: Arc<VersionedResourceStore>,
        _temp_dir: TempDir,
    }

    async fn setup() -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(&temp_dir.path().join("content.db")).await.unwrap();
        let store = Arc::new(VersionedResourceStore::new(ContentRepository::new(pool)));
        let authoring = Authoring::new(store.clone());
        authoring
            .upsert_type(&ContentType::new("articles", "Articles"))
            .await
            .unwrap();
        TestContext {
            authoring,
            store,
            _temp_dir: temp_dir,
        }
    }

    async fn fingerprint(store: &VersionedResourceStore, key: &ResourceKey) -> String {
        store
            .resolve(key, &ResourceQuery::default())
            .await
            .unwrap()
            .fingerprint
    }

    #[tokio::test]
    async fn test_item_writes_invalidate_items_only() {
        let ctx = setup().await;
        let items = ResourceKey::items("articles").unwrap();
        let presentation = ResourceKey::presentation("articles").unwrap();

        let items_before = fingerprint(&ctx.store, &items).await;
        let presentation_before = fingerprint(&ctx.store, &presentation).await;

        let item = ctx
            .authoring
            .create_item("articles", &ItemDraft::new("Hello"))
            .await
            .unwrap();
        let after_create = fingerprint(&ctx.store, &items).await;
        assert_ne!(items_before, after_create);

        ctx.authoring
            .update_item(item.id, &ItemDraft::new("Hello again"))
            .await
            .unwrap();
        let after_update = fingerprint(&ctx.store, &items).await;
        assert_ne!(after_create, after_update);

        assert!(ctx.authoring.delete_item(item.id).await.unwrap());
        assert!(!ctx.authoring.delete_item(item.id).await.unwrap());
        assert_ne!(after_update, fingerprint(&ctx.store, &items).await);

        assert_eq!(presentation_before, fingerprint(&ctx.store, &presentation).await);
    }

    #[tokio::test]
    async fn test_presentation_writes() {
        let ctx = setup().await;
        let presentation = ResourceKey::presentation("articles").unwrap();
        let before = fingerprint(&ctx.store, &presentation).await;

        assert!(ctx
            .authoring
            .set_presentation("articles", &json!({"layout": "grid"}))
            .await
            .unwrap());
        let resolved = ctx
            .store
            .resolve(&presentation, &ResourceQuery::default())
            .await
            .unwrap();
        assert_ne!(before, resolved.fingerprint);
        assert_eq!(resolved.document, json!({"layout": "grid"}));

        assert!(!ctx
            .authoring
            .set_presentation("missing", &json!({}))
            .await
            .unwrap());

        ctx.authoring
            .set_global_presentation(&json!({"theme": "dark"}))
            .await
            .unwrap();
        let global = ctx
            .store
            .resolve(&ResourceKey::GlobalPresentation, &ResourceQuery::default())
            .await
            .unwrap();
        assert_eq!(global.document, json!({"theme": "dark"}));
    }

    #[tokio::test]
    async fn test_identical_writes_keep_fingerprints() {
        let ctx = setup().await;
        let items = ResourceKey::items("articles").unwrap();
        let presentation = ResourceKey::presentation("articles").unwrap();

        let draft = ItemDraft::new("Hello").with_content("World");
        let item = ctx.authoring.create_item("articles", &draft).await.unwrap();
        ctx.authoring
            .set_presentation("articles", &json!({"layout": "grid"}))
            .await
            .unwrap();
        let items_before = fingerprint(&ctx.store, &items).await;
        let presentation_before = fingerprint(&ctx.store, &presentation).await;

        ctx.authoring
            .upsert_type(&ContentType::new("articles", "Articles"))
            .await
            .unwrap();
        ctx.authoring.update_item(item.id, &draft).await.unwrap();
        ctx.authoring
            .set_presentation("articles", &json!({"layout": "grid"}))
            .await
            .unwrap();

        assert_eq!(items_before, fingerprint(&ctx.store, &items).await);
        assert_eq!(presentation_before, fingerprint(&ctx.store, &presentation).await);
    }

    #[tokio::test]
    async fn test_delete_type_makes_resource_unknown() {
        let ctx = setup().await;
        let items = ResourceKey::items("articles").unwrap();
        fingerprint(&ctx.store, &items).await;

        assert!(ctx.authoring.delete_type("articles").await.unwrap());
        assert!(ctx
            .store
            .resolve(&items, &ResourceQuery::default())
            .await
            .is_err());
    }
}
