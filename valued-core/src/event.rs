//! Validated event payloads
//!
//! An [`Event`] is what leaves the client: a canonical map that passed
//! validation and carries an `occured_at` timestamp. The field name matches
//! the ingestion API, spelling included.

use chrono::{SecondsFormat, Utc};
use serde::{Serialize, Serializer};

use crate::error::ValidationError;
use crate::normalize::Normalize;
use crate::validate::{self, Category};
use crate::value::{KeyPath, Map, Value};

/// Timestamp key set on every event
pub const OCCURED_AT: &str = "occured_at";

/// Category key
pub const CATEGORY: &str = "category";

/// A validated, timestamped event ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    data: Map,
    category: Category,
}

impl Event {
    /// Validates `data` and stamps it with the current time unless it already
    /// has an `occured_at`.
    pub fn new(data: Map) -> Result<Self, ValidationError> {
        validate::check(&data)?;

        // check() guarantees a known category
        let category = data
            .get(CATEGORY)
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ValidationError::new(vec![validate::Violation::MissingCategory]))?;

        let data = if data.has_path(OCCURED_AT) {
            data
        } else {
            data.with(OCCURED_AT, Value::from(now_iso8601()))
        };

        Ok(Self { data, category })
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn occured_at(&self) -> Option<&str> {
        self.data.get(OCCURED_AT).and_then(Value::as_str)
    }

    pub fn get<P: KeyPath + ?Sized>(&self, path: &P) -> Option<&Value> {
        self.data.get_path(path)
    }

    pub fn as_map(&self) -> &Map {
        &self.data
    }

    pub fn into_map(self) -> Map {
        self.data
    }

    /// JSON request body
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.data)
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.data.serialize(serializer)
    }
}

impl Normalize for Event {
    fn normalize(&self) -> Value {
        Value::Map(self.data.clone())
    }
}

/// Current time as ISO-8601 (UTC, seconds precision)
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_map;
    use chrono::DateTime;
    use serde_json::json;

    #[test]
    fn test_event_is_stamped() {
        let event = Event::new(normalize_map(&json!({"category": "action", "user.id": 1}))).unwrap();
        let stamp = event.occured_at().expect("occured_at should be set");
        assert!(DateTime::parse_from_rfc3339(stamp).is_ok());
        assert_eq!(event.category(), Category::Action);
    }

    #[test]
    fn test_existing_timestamp_is_kept() {
        let event = Event::new(normalize_map(&json!({
            "category": "action",
            "user.id": 1,
            "occured_at": "2024-01-01T00:00:00Z"
        })))
        .unwrap();
        assert_eq!(event.occured_at(), Some("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn test_invalid_event_is_rejected() {
        let err = Event::new(normalize_map(&json!({"category": "sync"}))).unwrap_err();
        assert!(err.contains(&validate::Violation::MissingIdentity));
    }

    #[test]
    fn test_event_serializes_as_payload() {
        let event = Event::new(normalize_map(&json!({
            "category": "pageview",
            "user.id": 42,
            "attributes.source.url": "https://example.com",
            "occured_at": "2024-01-01T00:00:00Z"
        })))
        .unwrap();
        let body: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(
            body,
            json!({
                "category": "pageview",
                "user": {"id": 42},
                "attributes": {"source": {"url": "https://example.com"}},
                "occured_at": "2024-01-01T00:00:00Z"
            })
        );
    }
}
