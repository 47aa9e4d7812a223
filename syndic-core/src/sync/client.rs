//! HTTP client for the Producer's conditional delivery endpoints.

use std::time::Duration;

use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::StatusCode;

use super::error::FetchError;
use crate::cache::Validators;
use crate::protocol::{ErrorBody, HealthSummary};
use crate::query::ResourceQuery;
use crate::resource::ResourceKey;

/// Per-request timeout bounding the stall on one resource.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Result of a conditional fetch that received a usable response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// 200 with a body and fresh validators.
    Modified { body: String, validators: Validators },
    /// 304; the cached payload is current.
    NotModified,
}

/// Client for one Producer.
#[derive(Debug, Clone)]
pub struct ProducerClient {
    server_url: String,
    key: Option<String>,
    http: reqwest::Client,
}

impl ProducerClient {
    /// Creates a client with the given per-request timeout.
    pub fn new(
        server_url: impl Into<String>,
        key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(Self {
            server_url: server_url.into(),
            key,
            http,
        })
    }

    /// Returns the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Fetches one resource, conditionally if validators are given.
    ///
    /// Empty validators produce an unconditional request (full refresh).
    pub async fn fetch(
        &self,
        key: &ResourceKey,
        query: &ResourceQuery,
        validators: &Validators,
    ) -> Result<FetchOutcome, FetchError> {
        let url = self.build_url(key.kind().endpoint_path());

        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(category) = key.category() {
            params.push(("resource", category.to_string()));
        }
        if matches!(key, ResourceKey::Items(_)) {
            params.extend(query.to_pairs());
        }
        if let Some(secret) = &self.key {
            params.push(("key", secret.clone()));
        }

        let mut request = self.http.get(&url).query(&params);
        if let Some(etag) = &validators.etag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = &validators.last_modified {
            request = request.header(IF_MODIFIED_SINCE, last_modified);
        }

        tracing::debug!("GET {} for {}", url, key);

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(FetchOutcome::NotModified);
        }

        let validators = Validators {
            etag: header_string(&response, ETAG),
            last_modified: header_string(&response, LAST_MODIFIED),
        };

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        classify(status, body, validators)
    }

    /// Fetches the Producer's diagnostics summary.
    pub async fn health(&self) -> Result<HealthSummary, FetchError> {
        let response = self
            .http
            .get(self.build_url("/health"))
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Server {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| FetchError::Parse(e.to_string()))
    }

    /// Builds a full URL for a path, defaulting to http when no scheme is given.
    fn build_url(&self, path: &str) -> String {
        normalize_base(&self.server_url) + path
    }
}

fn normalize_base(server_url: &str) -> String {
    let base = if server_url.starts_with("http://") || server_url.starts_with("https://") {
        server_url.to_string()
    } else {
        format!("http://{}", server_url)
    };
    base.trim_end_matches('/').to_string()
}

fn header_string(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Maps a non-304 response to an outcome or error kind.
fn classify(
    status: StatusCode,
    body: String,
    validators: Validators,
) -> Result<FetchOutcome, FetchError> {
    match status {
        StatusCode::OK => Ok(FetchOutcome::Modified { body, validators }),
        StatusCode::FORBIDDEN => Err(FetchError::Authorization(body)),
        StatusCode::BAD_REQUEST => match serde_json::from_str::<ErrorBody>(&body) {
            Ok(error) if error.is_bad_resource() => Err(FetchError::UnknownResource(error.message)),
            _ => Err(FetchError::Server {
                status: status.as_u16(),
                body,
            }),
        },
        _ => Err(FetchError::Server {
            status: status.as_u16(),
            body,
        }),
    }
}

/// Checks whether a Producer is reachable (its `/health` answers 2xx).
pub async fn check_server(server_url: &str) -> bool {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(3))
        .build()
    {
        Ok(c) => c,
        Err(_) => return false,
    };

    client
        .get(format!("{}/health", normalize_base(server_url)))
        .send()
        .await
        .map(|r| r.status().is_success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url_with_scheme() {
        let client = ProducerClient::new("http://localhost:8080/", None, DEFAULT_REQUEST_TIMEOUT)
            .unwrap();
        assert_eq!(
            client.build_url("/resources/items"),
            "http://localhost:8080/resources/items"
        );
    }

    #[test]
    fn test_build_url_bare_host() {
        let client =
            ProducerClient::new("localhost:8080", None, DEFAULT_REQUEST_TIMEOUT).unwrap();
        assert_eq!(client.build_url("/health"), "http://localhost:8080/health");
    }

    #[test]
    fn test_classify_bad_resource() {
        let body = r#"{"code":"bad_resource","message":"Unknown resource: events"}"#;
        let result = classify(StatusCode::BAD_REQUEST, body.to_string(), Validators::default());
        assert_eq!(
            result,
            Err(FetchError::UnknownResource("Unknown resource: events".into()))
        );
    }

    #[test]
    fn test_classify_other_400_is_not_terminal() {
        let body = r#"{"code":"missing_resource","message":"resource required"}"#;
        let err = classify(StatusCode::BAD_REQUEST, body.to_string(), Validators::default())
            .unwrap_err();
        assert!(!err.is_terminal());

        let err = classify(StatusCode::BAD_REQUEST, "not json".into(), Validators::default())
            .unwrap_err();
        assert_eq!(err.status(), 400);
        assert!(!err.is_terminal());
    }

    #[test]
    fn test_classify_forbidden_and_server() {
        assert!(matches!(
            classify(StatusCode::FORBIDDEN, "nope".into(), Validators::default()),
            Err(FetchError::Authorization(_))
        ));
        assert!(matches!(
            classify(
                StatusCode::SERVICE_UNAVAILABLE,
                "maintenance".into(),
                Validators::default()
            ),
            Err(FetchError::Server { status: 503, .. })
        ));
    }
}
