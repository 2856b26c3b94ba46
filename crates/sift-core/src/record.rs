//! Extracted record payload.

use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One structured item extracted from a results page.
///
/// `id` is the natural key assigned by the target site. Uniqueness is only
/// enforced inside a task, and only when the task requested dedupe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Target-assigned identifier
    pub id: String,
    /// Listing title
    pub title: String,
    /// Price as displayed
    pub price: Option<String>,
    /// Optional secondary fields, filled by extraction or the enrichment pass
    #[serde(default)]
    pub details: BTreeMap<String, String>,
    /// Image references
    #[serde(default)]
    pub images: Vec<String>,
    /// Item condition
    pub condition: Option<String>,
    /// Shipping note
    pub shipping: Option<String>,
    /// Canonical locator of the record's detail page
    pub url: String,
    /// Set when the record is appended to a task
    pub captured_at: Option<Timestamp>,
}

impl Record {
    /// Create a record with only its key, title and locator set.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            price: None,
            details: BTreeMap::new(),
            images: Vec::new(),
            condition: None,
            shipping: None,
            url: url.into(),
            captured_at: None,
        }
    }

    /// Whether any of `fields` is absent or blank in `details`.
    #[must_use]
    pub fn is_missing_any(&self, fields: &[String]) -> bool {
        fields.iter().any(|f| {
            self.details
                .get(f)
                .map_or(true, |value| value.trim().is_empty())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_secondary_fields() {
        let mut record = Record::new("123", "Camera", "https://example.com/item/123");
        let wanted = vec!["seller".to_string()];
        assert!(record.is_missing_any(&wanted));

        record.details.insert("seller".to_string(), "  ".to_string());
        assert!(record.is_missing_any(&wanted));

        record.details.insert("seller".to_string(), "acme".to_string());
        assert!(!record.is_missing_any(&wanted));
        assert!(!record.is_missing_any(&[]));
    }
}
