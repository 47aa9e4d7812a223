//! Replica-side cache entry and its state transitions.
//!
//! One [`CacheEntry`] exists per replicated resource. The payload is only
//! ever replaced by a successful, parsed 200 response; every other outcome
//! keeps the previous payload available.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum stored length of a recorded error body, in characters.
pub const MAX_ERROR_LEN: usize = 1000;

/// Status recorded for a transport-level failure (no HTTP response).
pub const TRANSPORT_FAILURE_STATUS: u16 = 0;

/// Validators sent with a conditional request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl Validators {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// Cached state of one resource on a Replica.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub validator_etag: Option<String>,
    pub validator_last_modified: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub last_http_status: Option<u16>,
    pub last_error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retired: bool,
}

impl CacheEntry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validators(&self) -> Validators {
        Validators {
            etag: self.validator_etag.clone(),
            last_modified: self.validator_last_modified.clone(),
        }
    }

    /// Network, DNS or timeout failure. Recoverable.
    pub fn record_transport_error(&mut self, message: &str, now: DateTime<Utc>) {
        self.last_http_status = Some(TRANSPORT_FAILURE_STATUS);
        self.last_error = Some(truncate(message, MAX_ERROR_LEN));
        self.updated_at = Some(now);
    }

    /// 304 Not Modified.
    ///
    /// Only `updated_at` changes, unless an earlier failure is still
    /// recorded, in which case the failure is cleared.
    pub fn record_not_modified(&mut self, now: DateTime<Utc>) {
        if self.last_error.is_some() {
            self.last_error = None;
            self.last_http_status = Some(304);
        }
        self.updated_at = Some(now);
    }

    /// The Producer reported the resource as unknown. Terminal.
    pub fn retire(&mut self, message: &str, now: DateTime<Utc>) {
        self.retired = true;
        self.last_http_status = Some(400);
        self.last_error = Some(truncate(message, MAX_ERROR_LEN));
        self.updated_at = Some(now);
    }

    /// Any other non-200 response. Recoverable; never retires.
    pub fn record_failure(&mut self, status: u16, body: &str, now: DateTime<Utc>) {
        self.last_http_status = Some(status);
        self.last_error = Some(truncate(body, MAX_ERROR_LEN));
        self.updated_at = Some(now);
    }

    /// A 200 whose body could not be parsed.
    ///
    /// Validators are kept too, so the next cycle fetches the body again
    /// instead of receiving a 304 for content that was never applied.
    pub fn record_parse_error(&mut self, message: &str, now: DateTime<Utc>) {
        self.last_http_status = Some(200);
        self.last_error = Some(truncate(message, MAX_ERROR_LEN));
        self.updated_at = Some(now);
    }

    /// A parsed 200 response.
    pub fn record_success(
        &mut self,
        payload: serde_json::Value,
        validators: Validators,
        now: DateTime<Utc>,
    ) {
        self.payload = Some(payload);
        self.validator_etag = validators.etag;
        self.validator_last_modified = validators.last_modified;
        self.last_http_status = Some(200);
        self.last_error = None;
        self.retired = false;
        self.updated_at = Some(now);
    }

    /// Operator action: make a retired resource eligible for fetching again.
    pub fn clear_retirement(&mut self) {
        self.retired = false;
        self.last_error = None;
    }

    /// Drops stored validators so the next fetch is unconditional.
    pub fn forget_validators(&mut self) {
        self.validator_etag = None;
        self.validator_last_modified = None;
    }
}

/// Truncates a string to at most `max` characters, appending `...` when cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", cut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn fetched_entry(now: DateTime<Utc>) -> CacheEntry {
        let mut entry = CacheEntry::new();
        entry.record_success(
            json!({"items": [1, 2]}),
            Validators {
                etag: Some("\"e1\"".to_string()),
                last_modified: Some("Sun, 06 Nov 1994 08:49:37 GMT".to_string()),
            },
            now,
        );
        entry
    }

    #[test]
    fn test_success_replaces_payload_and_validators() {
        let now = Utc::now();
        let entry = fetched_entry(now);
        assert_eq!(entry.payload, Some(json!({"items": [1, 2]})));
        assert_eq!(entry.validator_etag.as_deref(), Some("\"e1\""));
        assert_eq!(entry.last_http_status, Some(200));
        assert_eq!(entry.updated_at, Some(now));
        assert!(!entry.validators().is_empty());
    }

    #[test]
    fn test_not_modified_only_touches_updated_at() {
        let now = Utc::now();
        let entry = fetched_entry(now);
        let mut after = entry.clone();
        let later = now + Duration::minutes(10);
        after.record_not_modified(later);

        assert_eq!(after.updated_at, Some(later));
        after.updated_at = entry.updated_at;
        assert_eq!(after, entry);
    }

    #[test]
    fn test_not_modified_clears_stale_error() {
        let now = Utc::now();
        let mut entry = fetched_entry(now);
        entry.record_transport_error("connection refused", now);
        entry.record_not_modified(now);
        assert_eq!(entry.last_error, None);
        assert_eq!(entry.last_http_status, Some(304));
    }

    #[test]
    fn test_failures_keep_payload() {
        let now = Utc::now();
        let mut entry = fetched_entry(now);

        entry.record_transport_error("dns failure", now);
        assert_eq!(entry.last_http_status, Some(TRANSPORT_FAILURE_STATUS));
        assert_eq!(entry.payload, Some(json!({"items": [1, 2]})));

        entry.record_failure(503, "maintenance", now);
        assert_eq!(entry.last_http_status, Some(503));
        assert_eq!(entry.last_error.as_deref(), Some("maintenance"));
        assert!(!entry.retired);
        assert_eq!(entry.payload, Some(json!({"items": [1, 2]})));

        entry.record_parse_error("expected value at line 1", now);
        assert_eq!(entry.last_http_status, Some(200));
        assert_eq!(entry.validator_etag.as_deref(), Some("\"e1\""));
        assert_eq!(entry.payload, Some(json!({"items": [1, 2]})));
    }

    #[test]
    fn test_retire_and_clear() {
        let now = Utc::now();
        let mut entry = fetched_entry(now);
        entry.retire("unknown resource", now);
        assert!(entry.retired);
        assert_eq!(entry.last_http_status, Some(400));
        assert!(entry.payload.is_some());

        entry.clear_retirement();
        assert!(!entry.retired);
        assert_eq!(entry.last_error, None);
    }

    #[test]
    fn test_error_body_truncated() {
        let now = Utc::now();
        let mut entry = CacheEntry::new();
        entry.record_failure(500, &"x".repeat(5000), now);
        assert_eq!(
            entry.last_error.as_ref().map(|e| e.chars().count()),
            Some(MAX_ERROR_LEN)
        );
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 8), "abcde...");
    }
}
