// crates/apprentice-server/src/search/filters.rs
// Shared filter semantics: time windows, context/extension restriction,
// metadata dot-path equality. Applied in memory over over-fetched rows.

use crate::db::{AssetRow, EventRow};
use crate::metadata::get_path;
use crate::utils::parse_rfc3339;
use chrono::{DateTime, Duration, Utc};

/// Filters accepted by every search path.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub since: Option<String>,
    pub until: Option<String>,
    pub recent_minutes: Option<i64>,
    pub context_ids: Vec<String>,
    pub extensions: Vec<String>,
    /// Dot-path equality over metadata. Numeric-looking comparisons cast
    /// both sides to numbers.
    pub metadata: Vec<(String, String)>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.since.is_none()
            && self.until.is_none()
            && self.recent_minutes.is_none()
            && self.context_ids.is_empty()
            && self.extensions.is_empty()
            && self.metadata.is_empty()
    }

    /// Channel fetch size: over-fetch when anything will be filtered.
    pub fn fetch_limit(&self, limit: usize) -> usize {
        if self.is_empty() {
            limit
        } else {
            (limit * 10).max(200)
        }
    }

    /// Effective [since, until] window; recentMinutes tightens `since`.
    fn time_window(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        let mut since = self.since.as_deref().and_then(parse_rfc3339);
        if let Some(minutes) = self.recent_minutes {
            let recent = Utc::now() - Duration::minutes(minutes);
            since = Some(match since {
                Some(s) if s > recent => s,
                _ => recent,
            });
        }
        let until = self.until.as_deref().and_then(parse_rfc3339);
        (since, until)
    }

    fn in_window(&self, timestamp: &str) -> bool {
        let (since, until) = self.time_window();
        let Some(ts) = parse_rfc3339(timestamp) else {
            return since.is_none() && until.is_none();
        };
        if let Some(since) = since {
            if ts < since {
                return false;
            }
        }
        if let Some(until) = until {
            if ts > until {
                return false;
            }
        }
        true
    }

    fn metadata_matches(&self, metadata: &serde_json::Value) -> bool {
        self.metadata.iter().all(|(path, expected)| {
            let Some(actual) = get_path(metadata, path) else {
                return false;
            };
            value_equals(actual, expected)
        })
    }

    pub fn matches_event(&self, event: &EventRow) -> bool {
        // contextIds and extensions only constrain asset corpora
        self.in_window(&event.timestamp) && self.metadata_matches(&event.metadata)
    }

    pub fn matches_asset(&self, asset: &AssetRow) -> bool {
        if !self.context_ids.is_empty() && !self.context_ids.contains(&asset.context_id) {
            return false;
        }
        if !self.extensions.is_empty() && !self.extensions.contains(&asset.extension) {
            return false;
        }
        self.in_window(&asset.indexed_at) && self.metadata_matches(&asset.metadata)
    }
}

/// Equality between a metadata value and a filter string. When both sides
/// parse as numbers the comparison is numeric.
fn value_equals(actual: &serde_json::Value, expected: &str) -> bool {
    match actual {
        serde_json::Value::String(s) => {
            if let (Ok(a), Ok(b)) = (s.parse::<f64>(), expected.parse::<f64>()) {
                return a == b;
            }
            s == expected
        }
        serde_json::Value::Number(n) => match expected.parse::<f64>() {
            Ok(b) => n.as_f64().is_some_and(|a| a == b),
            Err(_) => false,
        },
        serde_json::Value::Bool(b) => expected.parse::<bool>().map(|e| e == *b).unwrap_or(false),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(ts: &str, metadata: serde_json::Value) -> EventRow {
        EventRow {
            id: "e".into(),
            timestamp: ts.into(),
            message: "m".into(),
            metadata,
        }
    }

    fn asset(context: &str, ext: &str) -> AssetRow {
        AssetRow {
            id: "a".into(),
            context_id: context.into(),
            key: "k".into(),
            extension: ext.into(),
            content_hash: String::new(),
            indexed_at: "2024-06-01T10:00:00Z".into(),
            metadata: json!({}),
            head_version_ref: None,
        }
    }

    #[test]
    fn test_empty_filters_accept_everything() {
        let filters = SearchFilters::default();
        assert!(filters.is_empty());
        assert_eq!(filters.fetch_limit(10), 10);
        assert!(filters.matches_event(&event("2024-06-01T10:00:00Z", json!({}))));
        assert!(filters.matches_asset(&asset("c", "sh")));
    }

    #[test]
    fn test_fetch_limit_overfetches_with_filters() {
        let filters = SearchFilters {
            context_ids: vec!["c".into()],
            ..Default::default()
        };
        assert_eq!(filters.fetch_limit(10), 200);
        assert_eq!(filters.fetch_limit(50), 500);
    }

    #[test]
    fn test_time_window() {
        let filters = SearchFilters {
            since: Some("2024-06-01T00:00:00Z".into()),
            until: Some("2024-06-02T00:00:00Z".into()),
            ..Default::default()
        };
        assert!(filters.matches_event(&event("2024-06-01T12:00:00Z", json!({}))));
        assert!(!filters.matches_event(&event("2024-05-31T12:00:00Z", json!({}))));
        assert!(!filters.matches_event(&event("2024-06-03T12:00:00Z", json!({}))));
    }

    #[test]
    fn test_metadata_dot_path_equality() {
        let filters = SearchFilters {
            metadata: vec![("chat.session_id".into(), "S".into())],
            ..Default::default()
        };
        assert!(filters.matches_event(&event(
            "2024-06-01T10:00:00Z",
            json!({"chat": {"session_id": "S"}})
        )));
        assert!(!filters.matches_event(&event(
            "2024-06-01T10:00:00Z",
            json!({"chat": {"session_id": "T"}})
        )));
        assert!(!filters.matches_event(&event("2024-06-01T10:00:00Z", json!({}))));
    }

    #[test]
    fn test_metadata_numeric_comparison() {
        let filters = SearchFilters {
            metadata: vec![("shell.exit_code".into(), "0".into())],
            ..Default::default()
        };
        // number vs string-number compare numerically
        assert!(filters.matches_event(&event(
            "2024-06-01T10:00:00Z",
            json!({"shell": {"exit_code": 0}})
        )));
        assert!(filters.matches_event(&event(
            "2024-06-01T10:00:00Z",
            json!({"shell": {"exit_code": "0.0"}})
        )));
        assert!(!filters.matches_event(&event(
            "2024-06-01T10:00:00Z",
            json!({"shell": {"exit_code": 1}})
        )));
    }

    #[test]
    fn test_asset_context_and_extension_filters() {
        let filters = SearchFilters {
            context_ids: vec!["scripts".into()],
            extensions: vec!["sh".into()],
            ..Default::default()
        };
        assert!(filters.matches_asset(&asset("scripts", "sh")));
        assert!(!filters.matches_asset(&asset("notes", "sh")));
        assert!(!filters.matches_asset(&asset("scripts", "md")));
        // events ignore context/extension restrictions
        assert!(filters.matches_event(&event("2024-06-01T10:00:00Z", json!({}))));
    }
}
