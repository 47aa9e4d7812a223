//! Request parameters for item collections.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PER_PAGE: u32 = 20;
pub const MAX_PER_PAGE: u32 = 500;

/// Query parameters that select a view of a resource.
///
/// Parsing is lenient: malformed values fall back to their defaults and
/// out-of-range values are clamped, so a known resource never fails because
/// of its parameters. The access key is never part of the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceQuery {
    pub page: u32,
    pub per_page: u32,
    pub modified_since: Option<DateTime<Utc>>,
    pub filter: Option<String>,
}

impl Default for ResourceQuery {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            per_page: DEFAULT_PER_PAGE,
            modified_since: None,
            filter: None,
        }
    }
}

impl ResourceQuery {
    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page.clamp(1, MAX_PER_PAGE);
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page.max(1);
        self
    }

    pub fn with_modified_since(mut self, since: DateTime<Utc>) -> Self {
        self.modified_since = Some(since);
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        let filter = filter.into();
        self.filter = if filter.trim().is_empty() {
            None
        } else {
            Some(filter.trim().to_string())
        };
        self
    }

    /// Builds a query from raw request parameters.
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let mut query = Self::default();

        if let Some(page) = params.get("page").and_then(|p| p.parse::<u32>().ok()) {
            query = query.with_page(page);
        }
        if let Some(per_page) = params.get("per_page").and_then(|p| p.parse::<u32>().ok()) {
            query = query.with_per_page(per_page);
        }
        if let Some(since) = params.get("modified_since").and_then(|s| parse_since(s)) {
            query = query.with_modified_since(since);
        }
        if let Some(filter) = params.get("filter") {
            query = query.with_filter(filter.as_str());
        }

        query
    }

    /// Offset of the first item of the selected page.
    pub fn offset(&self) -> u64 {
        (self.page.saturating_sub(1) as u64) * self.per_page as u64
    }

    /// Parameters as request pairs, in canonical order.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("page", self.page.to_string()),
            ("per_page", self.per_page.to_string()),
        ];
        if let Some(since) = &self.modified_since {
            pairs.push(("modified_since", since.to_rfc3339()));
        }
        if let Some(filter) = &self.filter {
            pairs.push(("filter", filter.clone()));
        }
        pairs
    }

    /// Canonical string form, used for cache keys and validator hashing.
    pub fn canonical(&self) -> String {
        format!(
            "page={}&per_page={}&modified_since={}&filter={}",
            self.page,
            self.per_page,
            self.modified_since
                .map(|s| s.timestamp().to_string())
                .unwrap_or_default(),
            self.filter.as_deref().unwrap_or("")
        )
    }
}

/// Parses a `modified_since` value: RFC 3339 or a plain `YYYY-MM-DD` date.
fn parse_since(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_for_empty_params() {
        let query = ResourceQuery::from_params(&HashMap::new());
        assert_eq!(query, ResourceQuery::default());
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let query = ResourceQuery::from_params(&params(&[
            ("page", "abc"),
            ("per_page", "-4"),
            ("modified_since", "yesterday"),
            ("filter", "   "),
        ]));
        assert_eq!(query, ResourceQuery::default());
    }

    #[test]
    fn test_clamping() {
        let query = ResourceQuery::from_params(&params(&[("page", "0"), ("per_page", "100000")]));
        assert_eq!(query.page, 1);
        assert_eq!(query.per_page, MAX_PER_PAGE);
    }

    #[test]
    fn test_modified_since_formats() {
        let query = ResourceQuery::from_params(&params(&[("modified_since", "2024-03-01")]));
        assert_eq!(
            query.modified_since,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
        );

        let query = ResourceQuery::from_params(&params(&[(
            "modified_since",
            "2024-03-01T12:30:00+02:00",
        )]));
        assert_eq!(
            query.modified_since,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_canonical_distinguishes_params() {
        let a = ResourceQuery::default();
        let b = ResourceQuery::default().with_page(2);
        let c = ResourceQuery::default().with_filter("rust");
        assert_ne!(a.canonical(), b.canonical());
        assert_ne!(a.canonical(), c.canonical());
        assert_eq!(a.canonical(), ResourceQuery::default().canonical());
    }

    #[test]
    fn test_pairs_roundtrip_through_params() {
        let query = ResourceQuery::default()
            .with_page(3)
            .with_per_page(50)
            .with_filter("launch")
            .with_modified_since(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
        let map: HashMap<String, String> = query
            .to_pairs()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(ResourceQuery::from_params(&map), query);
    }

    #[test]
    fn test_offset() {
        assert_eq!(ResourceQuery::default().offset(), 0);
        assert_eq!(ResourceQuery::default().with_page(3).with_per_page(10).offset(), 20);
    }
}
