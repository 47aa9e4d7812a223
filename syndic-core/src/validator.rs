//! Fingerprints, validators and conditional-request evaluation.

use chrono::{DateTime, NaiveDateTime, Utc};
use sha2::{Digest, Sha256};

use crate::query::ResourceQuery;
use crate::resource::ResourceKey;

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

fn sha256_hex(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        // Separator so ("ab", "c") and ("a", "bc") hash differently
        hasher.update([0u8]);
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Fingerprint of an item collection.
///
/// Changes if and only if the query, the newest modification time or the
/// number of visible items changes.
pub fn items_fingerprint(
    query: &ResourceQuery,
    max_modified: Option<DateTime<Utc>>,
    count: u64,
) -> String {
    let max_modified = max_modified
        .map(|m| m.timestamp_micros().to_string())
        .unwrap_or_default();
    sha256_hex(&[&query.canonical(), &max_modified, &count.to_string()])
}

/// Fingerprint of an opaque JSON document.
pub fn document_fingerprint(document: &serde_json::Value, modified: DateTime<Utc>) -> String {
    sha256_hex(&[
        &modified.timestamp_micros().to_string(),
        &document.to_string(),
    ])
}

/// Entity tag for a resolved resource, already quoted.
pub fn compute_etag(key: &ResourceKey, query: &ResourceQuery, fingerprint: &str) -> String {
    format!(
        "\"{}\"",
        sha256_hex(&[&key.to_string(), &query.canonical(), fingerprint])
    )
}

/// Formats a timestamp as an HTTP-date (`Sun, 06 Nov 1994 08:49:37 GMT`).
pub fn format_http_date(dt: DateTime<Utc>) -> String {
    dt.format(HTTP_DATE_FORMAT).to_string()
}

/// Parses an HTTP-date. Returns `None` for anything unparseable.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, HTTP_DATE_FORMAT) {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Returns true if an `If-None-Match` header value matches `etag`.
///
/// Accepts `*`, comma-separated lists and weak validators.
pub fn if_none_match_matches(header: &str, etag: &str) -> bool {
    let etag = etag.trim_start_matches("W/");
    header.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.trim_start_matches("W/") == etag
    })
}

/// Decides whether a conditional request can be answered with 304.
///
/// `If-None-Match` takes precedence: when present, `If-Modified-Since` is
/// ignored. Timestamps are compared at second precision, the resolution of
/// HTTP-dates.
pub fn is_not_modified(
    if_none_match: Option<&str>,
    if_modified_since: Option<&str>,
    etag: &str,
    last_modified: DateTime<Utc>,
) -> bool {
    if let Some(header) = if_none_match {
        return if_none_match_matches(header, etag);
    }
    match if_modified_since.and_then(parse_http_date) {
        Some(since) => since.timestamp() >= last_modified.timestamp(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_items_fingerprint_sensitivity() {
        let query = ResourceQuery::default();
        let base = items_fingerprint(&query, Some(ts(0)), 2);

        assert_eq!(base, items_fingerprint(&query, Some(ts(0)), 2));
        assert_ne!(base, items_fingerprint(&query, Some(ts(1)), 2));
        assert_ne!(base, items_fingerprint(&query, Some(ts(0)), 1));
        assert_ne!(
            base,
            items_fingerprint(&query.clone().with_page(2), Some(ts(0)), 2)
        );
        assert_ne!(base, items_fingerprint(&query, None, 2));
    }

    #[test]
    fn test_etag_is_quoted_and_keyed() {
        let query = ResourceQuery::default();
        let articles = ResourceKey::items("articles").unwrap();
        let events = ResourceKey::items("events").unwrap();

        let etag = compute_etag(&articles, &query, "f1");
        assert!(etag.starts_with('"') && etag.ends_with('"'));
        assert_ne!(etag, compute_etag(&events, &query, "f1"));
        assert_ne!(etag, compute_etag(&articles, &query, "f2"));
    }

    #[test]
    fn test_http_date_roundtrip() {
        let dt = Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap();
        let formatted = format_http_date(dt);
        assert_eq!(formatted, "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(parse_http_date(&formatted), Some(dt));
        assert_eq!(parse_http_date("not a date"), None);
    }

    #[test]
    fn test_if_none_match_forms() {
        assert!(if_none_match_matches("\"abc\"", "\"abc\""));
        assert!(if_none_match_matches("W/\"abc\"", "\"abc\""));
        assert!(if_none_match_matches("\"x\", \"abc\"", "\"abc\""));
        assert!(if_none_match_matches("*", "\"abc\""));
        assert!(!if_none_match_matches("\"abd\"", "\"abc\""));
    }

    #[test]
    fn test_not_modified_precedence() {
        let modified = ts(0);
        let later = format_http_date(modified + Duration::hours(1));

        // Matching ETag wins
        assert!(is_not_modified(Some("\"a\""), None, "\"a\"", modified));
        // Non-matching ETag ignores a satisfied If-Modified-Since
        assert!(!is_not_modified(
            Some("\"b\""),
            Some(&later),
            "\"a\"",
            modified
        ));
        // Only If-Modified-Since
        assert!(is_not_modified(None, Some(&later), "\"a\"", modified));
        assert!(is_not_modified(
            None,
            Some(&format_http_date(modified)),
            "\"a\"",
            modified
        ));
        let earlier = format_http_date(modified - Duration::seconds(1));
        assert!(!is_not_modified(None, Some(&earlier), "\"a\"", modified));
        // Nothing conditional
        assert!(!is_not_modified(None, None, "\"a\"", modified));
    }

    #[test]
    fn test_sub_second_last_modified_still_not_modified() {
        let modified = ts(0) + Duration::milliseconds(750);
        let header = format_http_date(modified);
        assert!(is_not_modified(None, Some(&header), "\"a\"", modified));
    }
}
