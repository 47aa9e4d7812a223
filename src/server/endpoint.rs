//! Conditional delivery endpoint.
//!
//! Read-only HTTP surface over the [`VersionedResourceStore`]:
//!
//! - `GET /resources/items?resource=&page=&per_page=&modified_since=&filter=&key=`
//! - `GET /resources/presentation?resource=&key=`
//! - `GET /resources/global-presentation?key=`
//! - `GET /health`
//!
//! Every resource response carries `ETag`, `Last-Modified` and
//! `Cache-Control`; matching conditional requests get a bodiless 304.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use syndic_core::protocol::{BAD_RESOURCE, FORBIDDEN, INTERNAL_ERROR, MISSING_RESOURCE};
use syndic_core::validator::{compute_etag, format_http_date, is_not_modified};
use syndic_core::{ErrorBody, HealthSummary, ResourceKey, ResourceQuery};

use super::store::{ResolvedResource, StoreError, VersionedResourceStore};

/// Default `max-age` advertised to downstream caches.
pub const DEFAULT_MAX_AGE_SECS: u64 = 300;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<VersionedResourceStore>,
    /// Shared secret required as the `key` parameter, if configured.
    pub secret_key: Option<String>,
    pub max_age_secs: u64,
}

impl AppState {
    pub fn new(store: Arc<VersionedResourceStore>) -> Self {
        Self {
            store,
            secret_key: None,
            max_age_secs: DEFAULT_MAX_AGE_SECS,
        }
    }

    pub fn with_secret_key(mut self, key: Option<String>) -> Self {
        self.secret_key = key.filter(|k| !k.is_empty());
        self
    }

    pub fn with_max_age(mut self, secs: u64) -> Self {
        self.max_age_secs = secs;
        self
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/resources/items", get(items))
        .route("/resources/presentation", get(presentation))
        .route("/resources/global-presentation", get(global_presentation))
        .with_state(state)
}

fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody::new(code, message))).into_response()
}

/// Rejects the request unless it carries the configured secret.
fn authorize(state: &AppState, params: &HashMap<String, String>) -> Result<(), Response> {
    match &state.secret_key {
        None => Ok(()),
        Some(secret) if params.get("key") == Some(secret) => Ok(()),
        Some(_) => Err(error_response(
            StatusCode::FORBIDDEN,
            FORBIDDEN,
            "Invalid or missing key",
        )),
    }
}

fn required_category(params: &HashMap<String, String>) -> Result<&str, Response> {
    match params.get("resource").map(|r| r.trim()) {
        Some(category) if !category.is_empty() => Ok(category),
        _ => Err(error_response(
            StatusCode::BAD_REQUEST,
            MISSING_RESOURCE,
            "The resource parameter is required",
        )),
    }
}

/// Resolves a resource and answers with 200 or 304.
async fn deliver(
    state: &AppState,
    headers: &HeaderMap,
    key: ResourceKey,
    query: ResourceQuery,
) -> Response {
    let resolved = match state.store.resolve(&key, &query).await {
        Ok(resolved) => resolved,
        Err(StoreError::UnknownResource(name)) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                BAD_RESOURCE,
                format!("Unknown resource: {}", name),
            );
        }
        Err(e) => {
            tracing::error!("Failed to resolve {}: {}", key, e);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                INTERNAL_ERROR,
                "Failed to read content",
            );
        }
    };

    let etag = compute_etag(&key, &query, &resolved.fingerprint);
    let if_none_match = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok());
    let if_modified_since = headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok());

    if is_not_modified(if_none_match, if_modified_since, &etag, resolved.last_modified) {
        tracing::debug!("{} not modified", key);
        let mut response = StatusCode::NOT_MODIFIED.into_response();
        apply_validators(&mut response, state, &etag, &resolved);
        return response;
    }

    let mut response = (StatusCode::OK, Json(resolved.document.clone())).into_response();
    apply_validators(&mut response, state, &etag, &resolved);
    response
}

fn apply_validators(
    response: &mut Response,
    state: &AppState,
    etag: &str,
    resolved: &ResolvedResource,
) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(etag) {
        headers.insert(header::ETAG, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format_http_date(resolved.last_modified)) {
        headers.insert(header::LAST_MODIFIED, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("public, max-age={}", state.max_age_secs)) {
        headers.insert(header::CACHE_CONTROL, value);
    }
}

async fn items(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = authorize(&state, &params) {
        return response;
    }
    let category = match required_category(&params) {
        Ok(category) => category,
        Err(response) => return response,
    };
    // A malformed category can never name a content type
    let key = match ResourceKey::items(category) {
        Ok(key) => key,
        Err(_) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                BAD_RESOURCE,
                format!("Unknown resource: {}", category),
            )
        }
    };

    deliver(&state, &headers, key, ResourceQuery::from_params(&params)).await
}

async fn presentation(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = authorize(&state, &params) {
        return response;
    }
    let category = match required_category(&params) {
        Ok(category) => category,
        Err(response) => return response,
    };
    let key = match ResourceKey::presentation(category) {
        Ok(key) => key,
        Err(_) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                BAD_RESOURCE,
                format!("Unknown resource: {}", category),
            )
        }
    };

    deliver(&state, &headers, key, ResourceQuery::default()).await
}

async fn global_presentation(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = authorize(&state, &params) {
        return response;
    }
    deliver(
        &state,
        &headers,
        ResourceKey::GlobalPresentation,
        ResourceQuery::default(),
    )
    .await
}

/// Diagnostics only; no authentication and no validators.
async fn health(State(state): State<AppState>) -> Response {
    let repo = state.store.repo();
    let resources = match repo.list_types().await {
        Ok(types) => types.into_iter().map(|t| t.slug).collect(),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                INTERNAL_ERROR,
                "Failed to read content",
            );
        }
    };
    let global_presentation = matches!(repo.get_global_presentation().await, Ok(Some(_)));

    Json(HealthSummary {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        resources,
        cached_result_sets: state.store.cached_result_sets().await,
        global_presentation,
    })
    .into_response()
}
