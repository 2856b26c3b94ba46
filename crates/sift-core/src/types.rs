//! Shared types used across Sift.
//!
//! This module defines common newtypes that provide type safety
//! and clear domain modeling.

use crate::error::SiftError;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Maximum length of a normalized target label.
const MAX_LABEL_LEN: usize = 60;

/// Newtype for task identifiers.
///
/// Task IDs are UUID v4 strings, assigned once at submission and never changed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Create a `TaskId` from a string received over the wire.
    ///
    /// # Errors
    /// Returns error if the ID is not a valid UUID v4.
    pub fn new(id: impl Into<String>) -> Result<Self, SiftError> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Create a new random `TaskId`.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(id: &str) -> Result<(), SiftError> {
        static UUID_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = UUID_REGEX.get_or_init(|| {
            Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$")
                .expect("valid regex")
        });

        if regex.is_match(id) {
            Ok(())
        } else {
            Err(SiftError::Validation(format!(
                "invalid task ID: must be a valid UUID v4, got '{id}'"
            )))
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a task scrapes: a free-text search query or a direct results locator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Target {
    /// Search query, expanded through the site's search template
    Query(String),
    /// Absolute URL of a results listing
    Locator(String),
}

impl Target {
    /// Classify a raw target string.
    ///
    /// Anything starting with `http://` or `https://` is a locator.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            Self::Locator(trimmed.to_string())
        } else {
            Self::Query(trimmed.to_string())
        }
    }

    /// The raw target text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Query(s) | Self::Locator(s) => s,
        }
    }

    /// Normalized label used for export names and display.
    ///
    /// Lowercase, runs of non-alphanumerics collapsed to `_`, trimmed,
    /// at most 60 characters. Locators drop their scheme first.
    #[must_use]
    pub fn label(&self) -> String {
        let source = match self {
            Self::Query(q) => q.as_str(),
            Self::Locator(url) => url
                .trim_start_matches("https://")
                .trim_start_matches("http://"),
        };

        let mut label = String::with_capacity(source.len());
        let mut prev_sep = true;
        for c in source.chars() {
            if c.is_alphanumeric() {
                label.extend(c.to_lowercase());
                prev_sep = false;
            } else if !prev_sep {
                label.push('_');
                prev_sep = true;
            }
        }

        let mut label: String = label.chars().take(MAX_LABEL_LEN).collect();
        while label.ends_with('_') {
            label.pop();
        }
        if label.is_empty() {
            "untitled".to_string()
        } else {
            label
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wrapper for UTC timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Current time.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Inner `DateTime`.
    #[must_use]
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Milliseconds elapsed from `earlier` to `self`, clamped at zero.
    #[must_use]
    pub fn millis_since(&self, earlier: &Timestamp) -> u64 {
        u64::try_from((self.0 - earlier.0).num_milliseconds()).unwrap_or(0)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
