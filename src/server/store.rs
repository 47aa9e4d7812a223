//! Versioned resource store.
//!
//! Resolves a resource key and query into a JSON document plus the
//! fingerprint and modification time that drive HTTP validators. Results
//! are cached per key and canonical query with a TTL as a backstop between
//! explicit invalidations.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use syndic_core::validator::{document_fingerprint, items_fingerprint};
use syndic_core::{ItemCollection, ResourceKey, ResourceQuery};
use tokio::sync::RwLock;

use crate::content::ContentRepository;

/// Default lifetime of a cached result set.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Current representation of a resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedResource {
    pub document: serde_json::Value,
    pub fingerprint: String,
    pub last_modified: DateTime<Utc>,
}

/// Errors that can occur resolving a resource.
#[derive(Debug)]
pub enum StoreError {
    /// The content category does not exist.
    UnknownResource(String),
    /// Error reading content storage.
    Database(sqlx::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::UnknownResource(name) => write!(f, "Unknown resource: {}", name),
            StoreError::Database(e) => write!(f, "Database error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Database(e) => Some(e),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e)
    }
}

struct CachedResult {
    resource: ResolvedResource,
    cached_at: Instant,
}

/// Cached result sets of one resource key.
///
/// `generation` is bumped by every invalidation; a resolve only stores its
/// result if the generation it started under is still current.
#[derive(Default)]
struct KeyCache {
    generation: u64,
    results: HashMap<String, CachedResult>,
}

pub struct VersionedResourceStore {
    repo: ContentRepository,
    ttl: Duration,
    cache: RwLock<HashMap<ResourceKey, KeyCache>>,
}

impl VersionedResourceStore {
    pub fn new(repo: ContentRepository) -> Self {
        Self::with_ttl(repo, DEFAULT_CACHE_TTL)
    }

    pub fn with_ttl(repo: ContentRepository, ttl: Duration) -> Self {
        Self {
            repo,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the underlying content repository.
    pub fn repo(&self) -> &ContentRepository {
        &self.repo
    }

    /// Resolves the current representation of a resource.
    ///
    /// Unknown categories yield [`StoreError::UnknownResource`]; any query on
    /// a known category succeeds, possibly with an empty item set.
    pub async fn resolve(
        &self,
        key: &ResourceKey,
        query: &ResourceQuery,
    ) -> Result<ResolvedResource, StoreError> {
        let canonical = query.canonical();

        let generation = {
            let cache = self.cache.read().await;
            match cache.get(key) {
                Some(entry) => {
                    if let Some(hit) = entry.results.get(&canonical) {
                        if hit.cached_at.elapsed() < self.ttl {
                            return Ok(hit.resource.clone());
                        }
                    }
                    entry.generation
                }
                None => 0,
            }
        };

        let resource = self.compute(key, query).await?;

        let mut cache = self.cache.write().await;
        let entry = cache.entry(key.clone()).or_default();
        if entry.generation == generation {
            entry.results.insert(
                canonical,
                CachedResult {
                    resource: resource.clone(),
                    cached_at: Instant::now(),
                },
            );
        } else {
            tracing::debug!("Skipping cache fill for {}: invalidated during resolve", key);
        }

        Ok(resource)
    }

    /// Drops every cached result set of a resource. Idempotent.
    pub async fn invalidate(&self, key: &ResourceKey) {
        let mut cache = self.cache.write().await;
        let entry = cache.entry(key.clone()).or_default();
        entry.generation += 1;
        entry.results.clear();
        tracing::debug!("Invalidated {} (generation {})", key, entry.generation);
    }

    /// Invalidates both the items and presentation resources of a category.
    pub async fn invalidate_category(&self, category: &str) {
        self.invalidate(&ResourceKey::Items(category.to_string()))
            .await;
        self.invalidate(&ResourceKey::Presentation(category.to_string()))
            .await;
    }

    /// Number of cached result sets across all resources.
    pub async fn cached_result_sets(&self) -> usize {
        self.cache
            .read()
            .await
            .values()
            .map(|entry| entry.results.len())
            .sum()
    }

    async fn compute(
        &self,
        key: &ResourceKey,
        query: &ResourceQuery,
    ) -> Result<ResolvedResource, StoreError> {
        match key {
            ResourceKey::Items(category) => {
                let content_type = self
                    .repo
                    .get_type(category)
                    .await?
                    .ok_or_else(|| StoreError::UnknownResource(category.clone()))?;

                let (items, total) = self.repo.list_items(category, query).await?;
                let (max_modified, count) = self.repo.item_stats(category, query).await?;

                // Field schema changes are visible content too
                let last_modified = max_modified
                    .map(|m| m.max(content_type.updated_at))
                    .unwrap_or(content_type.updated_at);

                let collection = ItemCollection {
                    resource: category.clone(),
                    items: items.iter().map(|item| item.to_remote()).collect(),
                    fields: content_type.fields,
                    page: query.page,
                    per_page: query.per_page,
                    total,
                };
                let document = serde_json::to_value(&collection)
                    .unwrap_or_else(|_| serde_json::Value::Null);

                Ok(ResolvedResource {
                    document,
                    fingerprint: items_fingerprint(query, Some(last_modified), count),
                    last_modified,
                })
            }
            ResourceKey::Presentation(category) => {
                let content_type = self
                    .repo
                    .get_type(category)
                    .await?
                    .ok_or_else(|| StoreError::UnknownResource(category.clone()))?;

                let document = content_type
                    .presentation
                    .unwrap_or_else(|| serde_json::json!({}));
                let last_modified = content_type
                    .presentation_modified_at
                    .unwrap_or(content_type.created_at);

                Ok(ResolvedResource {
                    fingerprint: document_fingerprint(&document, last_modified),
                    document,
                    last_modified,
                })
            }
            ResourceKey::GlobalPresentation => {
                let (document, last_modified) = self
                    .repo
                    .get_global_presentation()
                    .await?
                    .unwrap_or_else(|| (serde_json::json!({}), DateTime::<Utc>::UNIX_EPOCH));

                Ok(ResolvedResource {
                    fingerprint: document_fingerprint(&document, last_modified),
                    document,
                    last_modified,
                })
            }
        }
    }
}
