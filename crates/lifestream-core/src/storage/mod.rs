//! Storage layer
//!
//! All persistent state lives in one SQLite database.
//!
//! ## Tables
//!
//! - `records` - Typed domain records (JSON bodies)
//! - `items` - Timeline items, one per followed record
//! - `tags` / `item_tags` - Normalized, ordered item tags
//! - `checkpoints` - Last synced timestamp per provider and type
//! - `items_fts` - Full-text search over summaries (auto-synced via triggers)
//!
//! The table-level stores borrow a `Connection`, so they work the same on
//! the store's connection and inside a per-record `Transaction`.

pub mod checkpoints;
pub mod error;
pub mod records;
pub mod schema;
pub mod timeline;

use chrono::{DateTime, Utc};

pub use checkpoints::Checkpoints;
pub use error::{StorageError, StorageResult};
pub use records::Records;
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};
pub use timeline::{FeedQuery, ItemProjection, Timeline};

/// Timestamps are stored as UTC milliseconds
pub(crate) fn to_millis(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}
