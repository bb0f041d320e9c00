//! Normalized provider output
//!
//! A `Candidate` is one fetched entry after normalization: the field map
//! that becomes (or updates) a domain record, plus the timeline metadata
//! (timestamp, url, tags) that is projected onto its item.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// One normalized entry waiting to be persisted
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Candidate {
    /// Record fields; keys outside the record type's schema are ignored on save
    pub fields: Map<String, Value>,
    /// Upstream timestamp, if the source provides one
    pub timestamp: Option<DateTime<Utc>>,
    /// Canonical URL, overriding the one derived from the record
    pub url: Option<String>,
    /// Tags in upstream order
    pub tags: Vec<String>,
    /// Checkpoint sub-key this entry was fetched under
    pub filter: Option<String>,
}

impl Candidate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a record field
    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Set a timestamp-valued record field
    pub fn time_field(self, name: &str, value: DateTime<Utc>) -> Self {
        self.field(name, value.to_rfc3339())
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.url = (!url.is_empty()).then_some(url);
        self
    }

    /// Add tags, skipping empty strings and duplicates
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for tag in tags {
            let tag = tag.into();
            if !tag.is_empty() && !self.tags.contains(&tag) {
                self.tags.push(tag);
            }
        }
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// String value of a field, if present
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// The full candidate as JSON, for logging failed records
    pub fn payload(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self.fields))
    }
}
