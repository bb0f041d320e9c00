//! Data models for Lifestream
//!
//! Defines the record types collected from providers, the typed domain
//! records themselves, the timeline `Item` that shadows each followed
//! record, and sync `Checkpoint`s.
//!
//! Domain records are stored as JSON bodies. Every record struct uses
//! `#[serde(default)]` so a partial field map (as produced by a provider)
//! deserializes with the remaining fields left empty.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Source name stamped on items saved outside a provider run
pub const INTERACTIVE_SOURCE: &str = "INTERACTIVE";

/// The kinds of records Lifestream knows how to store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    Bookmark,
    Photo,
    Photoset,
    Track,
    Commit,
    Message,
    Video,
    WebSearch,
    WebSearchResult,
}

impl RecordType {
    pub const ALL: [RecordType; 9] = [
        RecordType::Bookmark,
        RecordType::Photo,
        RecordType::Photoset,
        RecordType::Track,
        RecordType::Commit,
        RecordType::Message,
        RecordType::Video,
        RecordType::WebSearch,
        RecordType::WebSearchResult,
    ];

    /// Stable tag used in storage and on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Bookmark => "bookmark",
            RecordType::Photo => "photo",
            RecordType::Photoset => "photoset",
            RecordType::Track => "track",
            RecordType::Commit => "commit",
            RecordType::Message => "message",
            RecordType::Video => "video",
            RecordType::WebSearch => "websearch",
            RecordType::WebSearchResult => "websearchresult",
        }
    }

    /// Name of the field that uniquely identifies a record of this type, if any
    pub fn intrinsic_key(&self) -> Option<&'static str> {
        match self {
            RecordType::Photo => Some("photo_id"),
            RecordType::Photoset => Some("photoset_id"),
            RecordType::WebSearchResult => Some("url"),
            _ => None,
        }
    }

    /// Search results hang off their parent search and are not shown on their own
    pub fn followed_by_default(&self) -> bool {
        !matches!(self, RecordType::WebSearchResult)
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Returned when parsing an unknown record type tag
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown record type '{0}'")]
pub struct UnknownRecordType(pub String);

impl FromStr for RecordType {
    type Err = UnknownRecordType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownRecordType(s.to_string()))
    }
}

/// Non-owning reference from a timeline item to its domain record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordRef {
    pub record_type: RecordType,
    pub record_id: String,
}

impl RecordRef {
    pub fn new(record_type: RecordType, record_id: impl Into<String>) -> Self {
        Self {
            record_type,
            record_id: record_id.into(),
        }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.record_type, self.record_id)
    }
}

// ==================== Domain records ====================

/// A saved bookmark
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bookmark {
    pub url: String,
    pub description: String,
    pub extended: String,
    pub thumbnail_url: Option<String>,
}

/// A photo hosted on Flickr
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Photo {
    pub photo_id: String,
    pub farm_id: i64,
    pub server_id: i64,
    pub secret: String,
    pub taken_by: String,
    pub cc_license: String,
    pub title: String,
    pub description: String,
    pub comment_count: i64,
    pub date_uploaded: Option<DateTime<Utc>>,
    pub date_updated: Option<DateTime<Utc>>,
    /// Filled in once, when the photo is first stored
    pub exif: BTreeMap<String, String>,
}

impl Photo {
    pub fn url(&self) -> String {
        format!(
            "http://www.flickr.com/photos/{}/{}/",
            self.taken_by, self.photo_id
        )
    }
}

/// A named set of photos
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Photoset {
    pub photoset_id: String,
    pub farm_id: i64,
    pub server_id: i64,
    pub secret: String,
    pub title: String,
    pub description: String,
    pub url: String,
    /// Member photo ids that were found in the store
    pub photo_ids: Vec<String>,
}

/// A scrobbled track
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Track {
    pub artist_name: String,
    pub track_name: String,
    pub url: String,
    pub track_mbid: Option<String>,
    pub artist_mbid: Option<String>,
}

/// A commit in a tracked repository
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeCommit {
    pub repository: String,
    pub revision: String,
    pub message: String,
    /// Changeset URL template with a `{revision}` placeholder
    pub changeset_template: Option<String>,
}

impl CodeCommit {
    /// Hashes are shortened to 7 characters; numeric revisions are kept whole
    pub fn short_revision(&self) -> &str {
        if self.revision.chars().all(|c| c.is_ascii_digit()) {
            &self.revision
        } else {
            match self.revision.char_indices().nth(7) {
                Some((idx, _)) => &self.revision[..idx],
                None => &self.revision,
            }
        }
    }

    pub fn url(&self) -> Option<String> {
        self.changeset_template
            .as_ref()
            .map(|tpl| tpl.replace("{revision}", &self.revision))
    }
}

/// A short status message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Message {
    pub message: String,
    /// Links referenced by the message, in order of appearance
    pub links: Vec<String>,
}

/// A favorited video
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Video {
    pub source: String,
    pub title: String,
    pub url: String,
}

/// A query made with a search engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSearch {
    pub engine: String,
    pub query: String,
    pub guid: String,
}

impl WebSearch {
    pub fn url(&self) -> Option<String> {
        let base = search_endpoint(&self.engine)?;
        reqwest::Url::parse_with_params(base, &[("q", self.query.as_str())])
            .ok()
            .map(String::from)
    }
}

/// A page visited from a search
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSearchResult {
    pub guid: String,
    /// Id of the parent `WebSearch` record
    pub search_id: Option<String>,
    pub title: String,
    pub url: String,
}

fn search_endpoint(engine: &str) -> Option<&'static str> {
    match engine.to_ascii_lowercase().as_str() {
        "google" => Some("https://www.google.com/search"),
        "bing" => Some("https://www.bing.com/search"),
        "duckduckgo" => Some("https://duckduckgo.com/"),
        _ => None,
    }
}

/// A typed domain record of any kind
#[derive(Debug, Clone, PartialEq)]
pub enum DomainRecord {
    Bookmark(Bookmark),
    Photo(Photo),
    Photoset(Photoset),
    Track(Track),
    Commit(CodeCommit),
    Message(Message),
    Video(Video),
    WebSearch(WebSearch),
    WebSearchResult(WebSearchResult),
}

impl DomainRecord {
    /// An empty record of the given type
    pub fn empty(record_type: RecordType) -> Self {
        match record_type {
            RecordType::Bookmark => DomainRecord::Bookmark(Bookmark::default()),
            RecordType::Photo => DomainRecord::Photo(Photo::default()),
            RecordType::Photoset => DomainRecord::Photoset(Photoset::default()),
            RecordType::Track => DomainRecord::Track(Track::default()),
            RecordType::Commit => DomainRecord::Commit(CodeCommit::default()),
            RecordType::Message => DomainRecord::Message(Message::default()),
            RecordType::Video => DomainRecord::Video(Video::default()),
            RecordType::WebSearch => DomainRecord::WebSearch(WebSearch::default()),
            RecordType::WebSearchResult => {
                DomainRecord::WebSearchResult(WebSearchResult::default())
            }
        }
    }

    pub fn record_type(&self) -> RecordType {
        match self {
            DomainRecord::Bookmark(_) => RecordType::Bookmark,
            DomainRecord::Photo(_) => RecordType::Photo,
            DomainRecord::Photoset(_) => RecordType::Photoset,
            DomainRecord::Track(_) => RecordType::Track,
            DomainRecord::Commit(_) => RecordType::Commit,
            DomainRecord::Message(_) => RecordType::Message,
            DomainRecord::Video(_) => RecordType::Video,
            DomainRecord::WebSearch(_) => RecordType::WebSearch,
            DomainRecord::WebSearchResult(_) => RecordType::WebSearchResult,
        }
    }

    /// Build a record from a field map; missing fields take their defaults
    pub fn from_fields(
        record_type: RecordType,
        fields: Map<String, Value>,
    ) -> serde_json::Result<Self> {
        let value = Value::Object(fields);
        Ok(match record_type {
            RecordType::Bookmark => DomainRecord::Bookmark(serde_json::from_value(value)?),
            RecordType::Photo => DomainRecord::Photo(serde_json::from_value(value)?),
            RecordType::Photoset => DomainRecord::Photoset(serde_json::from_value(value)?),
            RecordType::Track => DomainRecord::Track(serde_json::from_value(value)?),
            RecordType::Commit => DomainRecord::Commit(serde_json::from_value(value)?),
            RecordType::Message => DomainRecord::Message(serde_json::from_value(value)?),
            RecordType::Video => DomainRecord::Video(serde_json::from_value(value)?),
            RecordType::WebSearch => DomainRecord::WebSearch(serde_json::from_value(value)?),
            RecordType::WebSearchResult => {
                DomainRecord::WebSearchResult(serde_json::from_value(value)?)
            }
        })
    }

    /// The record as a field map
    pub fn to_fields(&self) -> serde_json::Result<Map<String, Value>> {
        let value = match self {
            DomainRecord::Bookmark(r) => serde_json::to_value(r)?,
            DomainRecord::Photo(r) => serde_json::to_value(r)?,
            DomainRecord::Photoset(r) => serde_json::to_value(r)?,
            DomainRecord::Track(r) => serde_json::to_value(r)?,
            DomainRecord::Commit(r) => serde_json::to_value(r)?,
            DomainRecord::Message(r) => serde_json::to_value(r)?,
            DomainRecord::Video(r) => serde_json::to_value(r)?,
            DomainRecord::WebSearch(r) => serde_json::to_value(r)?,
            DomainRecord::WebSearchResult(r) => serde_json::to_value(r)?,
        };
        match value {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }

    /// Names of the fields stored for a record type
    pub fn field_names(record_type: RecordType) -> Vec<String> {
        DomainRecord::empty(record_type)
            .to_fields()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Value of the intrinsic key, when the type has one and it is set
    pub fn intrinsic_key(&self) -> Option<&str> {
        let key = match self {
            DomainRecord::Photo(p) => &p.photo_id,
            DomainRecord::Photoset(s) => &s.photoset_id,
            DomainRecord::WebSearchResult(r) => &r.url,
            _ => return None,
        };
        (!key.is_empty()).then_some(key.as_str())
    }

    /// Canonical URL derived from the record's own fields
    pub fn canonical_url(&self) -> Option<String> {
        let url = match self {
            DomainRecord::Bookmark(b) => Some(b.url.clone()),
            DomainRecord::Photo(p) => Some(p.url()),
            DomainRecord::Photoset(s) => Some(s.url.clone()),
            DomainRecord::Track(t) => Some(t.url.clone()),
            DomainRecord::Commit(c) => c.url(),
            DomainRecord::Message(_) => None,
            DomainRecord::Video(v) => Some(v.url.clone()),
            DomainRecord::WebSearch(s) => s.url(),
            DomainRecord::WebSearchResult(r) => Some(r.url.clone()),
        };
        url.filter(|u| !u.is_empty())
    }

    /// Timestamp carried by the record itself
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            DomainRecord::Photo(p) => p.date_uploaded,
            _ => None,
        }
    }

    /// Human readable one-line rendering used for timeline summaries
    pub fn summary(&self) -> String {
        match self {
            DomainRecord::Bookmark(b) => b.url.clone(),
            DomainRecord::Photo(p) => p.title.clone(),
            DomainRecord::Photoset(s) => s.title.clone(),
            DomainRecord::Track(t) => format!("{} - {}", t.artist_name, t.track_name),
            DomainRecord::Commit(c) => {
                format!("[{}] {}", c.short_revision(), truncate_words(&c.message, 10))
            }
            DomainRecord::Message(m) => truncate_words(&m.message, 30),
            DomainRecord::Video(v) => v.title.clone(),
            DomainRecord::WebSearch(s) => s.query.clone(),
            DomainRecord::WebSearchResult(r) => r.title.clone(),
        }
    }
}

impl fmt::Display for DomainRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Keep the first `max` words, appending " ..." when anything was cut
pub fn truncate_words(text: &str, max: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max {
        words.join(" ")
    } else {
        format!("{} ...", words[..max].join(" "))
    }
}

// ==================== Timeline ====================

/// A timeline entry shadowing exactly one followed domain record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Row id, increasing in insertion order
    pub id: i64,
    pub record: RecordRef,
    pub timestamp: DateTime<Utc>,
    pub tags: Vec<String>,
    pub url: Option<String>,
    /// Provider that last saved the record, or `INTERACTIVE`
    pub source: String,
    /// Provider-defined dedup key, empty for interactive saves
    pub source_id: String,
    pub summary: String,
}

impl Item {
    pub fn record_type(&self) -> RecordType {
        self.record.record_type
    }

    pub fn is_interactive(&self) -> bool {
        self.source == INTERACTIVE_SOURCE
    }
}

// ==================== Checkpoints ====================

/// The sentinel "never synced" timestamp
pub fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::default()
}

/// Last successfully synced timestamp for a provider and record type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub provider: String,
    pub record_type: RecordType,
    /// Optional sub-key, e.g. a repository name
    pub filter: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Checkpoint {
    /// Create a checkpoint; timestamps before the epoch are clamped to it
    pub fn new(
        provider: impl Into<String>,
        record_type: RecordType,
        filter: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            provider: provider.into(),
            record_type,
            filter,
            timestamp: timestamp.max(epoch()),
        }
    }

    pub fn epoch(
        provider: impl Into<String>,
        record_type: RecordType,
        filter: Option<String>,
    ) -> Self {
        Self::new(provider, record_type, filter, epoch())
    }

    pub fn is_epoch(&self) -> bool {
        self.timestamp <= epoch()
    }

    /// Whether an upstream entry at `timestamp` still needs processing
    pub fn admits(&self, timestamp: DateTime<Utc>) -> bool {
        self.is_epoch() || timestamp > self.timestamp
    }
}
