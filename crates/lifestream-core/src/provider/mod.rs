//! Provider contract
//!
//! A provider pulls records of one or more types from an external source.
//! Each update run drives it through the same lifecycle:
//!
//! ```text
//! enabled()? ──no──▶ DISABLED
//!     │
//!     ▼
//! fetch(type) ──▶ normalize(payload, checkpoint) ──▶ [candidates]
//!                                                        │
//!       per candidate, one transaction:                  ▼
//!       upsert ──▶ post_persist hook ──▶ timeline projection
//! ```
//!
//! Types are registered with a priority and processed lowest first, so a
//! hook for one type can rely on records of an earlier type being stored.
//! `normalize` is responsible for dropping entries the checkpoint already
//! covers; the orchestrator does not filter on its behalf.

pub mod delicious;
pub mod flickr;
pub mod gitscm;
pub mod gsearch;
pub mod http;
pub mod lastfm;
mod registry;
pub mod svn;
pub mod twitter;
pub mod xml;
pub mod youtube;

use std::collections::HashSet;

use rusqlite::Connection;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::candidate::Candidate;
use crate::error::{SyncError, SyncResult};
use crate::models::{Checkpoint, DomainRecord, Item, RecordRef, RecordType};
use crate::storage::{Checkpoints, ItemProjection, Records, Timeline};
use crate::sync::Shutdown;

pub use registry::ProviderRegistry;
pub use xml::XmlElement;

/// A record type handled by a provider, with its processing priority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub record_type: RecordType,
    /// Lower runs first
    pub priority: u32,
}

impl Registration {
    pub fn new(record_type: RecordType, priority: u32) -> Self {
        Self {
            record_type,
            priority,
        }
    }
}

/// Opaque data returned by `fetch`, handed back to `normalize`
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    /// Nothing new upstream
    Empty,
    Text(String),
    Json(Value),
    Xml(XmlElement),
    /// Several documents of the same kind, e.g. one per page or date
    Documents(Vec<RawPayload>),
    /// Payloads fetched under separate checkpoint filters
    Batches(Vec<Batch>),
}

/// A payload fetched under its own filtered checkpoint
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub filter: String,
    pub checkpoint: Checkpoint,
    pub payload: RawPayload,
}

/// Read access available while fetching
pub struct FetchContext<'a> {
    conn: &'a Connection,
    checkpoint: &'a Checkpoint,
    shutdown: &'a Shutdown,
}

impl<'a> FetchContext<'a> {
    pub fn new(conn: &'a Connection, checkpoint: &'a Checkpoint, shutdown: &'a Shutdown) -> Self {
        Self {
            conn,
            checkpoint,
            shutdown,
        }
    }

    /// Checkpoint of the type being fetched, captured at run start
    pub fn checkpoint(&self) -> &Checkpoint {
        self.checkpoint
    }

    /// Checkpoint of the same provider and type under a filter key
    pub fn checkpoint_for(&self, filter: &str) -> SyncResult<Checkpoint> {
        Ok(Checkpoints::new(self.conn).get(
            &self.checkpoint.provider,
            self.checkpoint.record_type,
            Some(filter),
        )?)
    }

    pub fn check_shutdown(&self) -> SyncResult<()> {
        self.shutdown.check()
    }
}

/// Store access for post-persist hooks, bound to the record's transaction
pub struct HookContext<'a> {
    conn: &'a Connection,
    provider: &'a str,
    following: &'a HashSet<RecordType>,
    shutdown: &'a Shutdown,
}

impl<'a> HookContext<'a> {
    pub fn new(
        conn: &'a Connection,
        provider: &'a str,
        following: &'a HashSet<RecordType>,
        shutdown: &'a Shutdown,
    ) -> Self {
        Self {
            conn,
            provider,
            following,
            shutdown,
        }
    }

    pub fn provider(&self) -> &str {
        self.provider
    }

    pub fn get_record(&self, reference: &RecordRef) -> SyncResult<Option<DomainRecord>> {
        Ok(Records::new(self.conn).get(reference)?)
    }

    pub fn record_exists(&self, reference: &RecordRef) -> SyncResult<bool> {
        Ok(Records::new(self.conn).exists(reference)?)
    }

    /// Item of this provider whose source id ends with `suffix`
    pub fn find_by_source_suffix(
        &self,
        record_type: RecordType,
        suffix: &str,
    ) -> SyncResult<Option<Item>> {
        Ok(Timeline::new(self.conn).find_by_source_suffix(self.provider, record_type, suffix)?)
    }

    /// Save another record inside the same transaction
    ///
    /// An existing item gets its summary and URL refreshed. A followed
    /// record without one is projected under this provider, keyed by its
    /// intrinsic key or record id.
    pub fn save_related(&self, reference: &RecordRef, record: &DomainRecord) -> SyncResult<bool> {
        let created = Records::new(self.conn).write(reference, record)?;
        let timeline = Timeline::new(self.conn);
        if !timeline.refresh(reference, record)?
            && self.following.contains(&reference.record_type)
        {
            timeline.project(
                reference,
                record,
                &ItemProjection {
                    source: self.provider,
                    source_id: record
                        .intrinsic_key()
                        .unwrap_or(reference.record_id.as_str()),
                    ..ItemProjection::default()
                },
            )?;
        }
        Ok(created)
    }

    pub fn check_shutdown(&self) -> SyncResult<()> {
        self.shutdown.check()
    }
}

/// A source of records
///
/// Implementations are registered in a [`ProviderRegistry`] and driven by
/// the orchestrator; they never touch the store outside the contexts they
/// are handed.
pub trait Provider: Send {
    /// Identifier used in configuration, checkpoints and item sources
    fn name(&self) -> &str;

    /// Gate checked before any work, e.g. required credentials present
    fn enabled(&self) -> bool;

    /// Record types this provider produces
    fn registrations(&self) -> Vec<Registration>;

    /// Retrieve raw upstream data for one type
    fn fetch(&self, record_type: RecordType, ctx: &FetchContext<'_>) -> SyncResult<RawPayload>;

    /// Turn a payload into candidates newer than the checkpoint
    fn normalize(
        &self,
        record_type: RecordType,
        payload: RawPayload,
        checkpoint: &Checkpoint,
    ) -> SyncResult<Vec<Candidate>>;

    /// Stable dedup key for types without an intrinsic key
    fn source_id(&self, _record_type: RecordType, _candidate: &Candidate) -> Option<String> {
        None
    }

    /// Side effects run once per record after the upsert, inside its transaction
    fn post_persist(
        &self,
        _ctx: &HookContext<'_>,
        _record: &mut DomainRecord,
        _candidate: &Candidate,
        _created: bool,
    ) -> SyncResult<()> {
        Ok(())
    }

    /// Registrations in processing order
    fn ordered_registrations(&self) -> Vec<Registration> {
        let mut registrations = self.registrations();
        registrations.sort_by_key(|r| r.priority);
        registrations
    }
}

/// A type the provider never registered, or a payload it never produces
pub(crate) fn unsupported(provider: &str, record_type: RecordType) -> SyncError {
    SyncError::fetch(
        provider,
        format!("no fetcher for {} records or unexpected payload", record_type),
    )
}

/// Hex SHA-256 over the parts, separated so ("ab", "c") and ("a", "bc") differ
pub fn source_digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Lowercase, hyphen-separated tag slug
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;

    for c in text.trim().chars() {
        if c.is_alphanumeric() || c == '_' {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else if c.is_whitespace() || c == '-' {
            pending_dash = true;
        }
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::init_schema;

    struct Fixed;

    impl Provider for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        fn enabled(&self) -> bool {
            true
        }
        fn registrations(&self) -> Vec<Registration> {
            vec![
                Registration::new(RecordType::WebSearchResult, 1),
                Registration::new(RecordType::WebSearch, 0),
            ]
        }
        fn fetch(&self, _: RecordType, _: &FetchContext<'_>) -> SyncResult<RawPayload> {
            Ok(RawPayload::Empty)
        }
        fn normalize(
            &self,
            _: RecordType,
            _: RawPayload,
            _: &Checkpoint,
        ) -> SyncResult<Vec<Candidate>> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_ordered_registrations() {
        let order: Vec<_> = Fixed
            .ordered_registrations()
            .into_iter()
            .map(|r| r.record_type)
            .collect();
        assert_eq!(order, vec![RecordType::WebSearch, RecordType::WebSearchResult]);
    }

    #[test]
    fn test_source_digest() {
        let a = source_digest(&["ab", "c"]);
        let b = source_digest(&["a", "bc"]);
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert_eq!(a, source_digest(&["ab", "c"]));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hip Hop"), "hip-hop");
        assert_eq!(slugify("  Drum & Bass  "), "drum-bass");
        assert_eq!(slugify("post-rock"), "post-rock");
        assert_eq!(slugify("80s"), "80s");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_fetch_context_filtered_checkpoint() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let ts = chrono::Utc::now();
        Checkpoints::new(&conn)
            .advance("gitscm", RecordType::Commit, Some("alpha"), ts)
            .unwrap();

        let checkpoint = Checkpoint::epoch("gitscm", RecordType::Commit, None);
        let shutdown = Shutdown::new();
        let ctx = FetchContext::new(&conn, &checkpoint, &shutdown);

        assert!(ctx.checkpoint().is_epoch());
        let alpha = ctx.checkpoint_for("alpha").unwrap();
        assert_eq!(alpha.filter.as_deref(), Some("alpha"));
        assert!(!alpha.is_epoch());
        assert!(ctx.checkpoint_for("beta").unwrap().is_epoch());

        shutdown.trigger();
        assert!(ctx.check_shutdown().is_err());
    }

    fn video(title: &str) -> DomainRecord {
        DomainRecord::Video(crate::models::Video {
            source: "YouTube".into(),
            title: title.into(),
            url: "https://www.youtube.com/watch?v=abc".into(),
        })
    }

    #[test]
    fn test_save_related_projects_followed_records() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let shutdown = Shutdown::new();
        let following: HashSet<_> = [RecordType::Video].into_iter().collect();
        let ctx = HookContext::new(&conn, "fixed", &following, &shutdown);

        let reference = RecordRef::new(RecordType::Video, "v1");
        assert!(ctx.save_related(&reference, &video("First cut")).unwrap());

        let timeline = Timeline::new(&conn);
        let item = timeline.get_by_record(&reference).unwrap().unwrap();
        assert_eq!(item.source, "fixed");
        assert_eq!(item.source_id, "v1");
        assert_eq!(item.summary, "First cut");

        // Saving again refreshes the same item
        assert!(!ctx.save_related(&reference, &video("Final cut")).unwrap());
        assert_eq!(timeline.count(None).unwrap(), 1);
        let refreshed = timeline.get_by_record(&reference).unwrap().unwrap();
        assert_eq!(refreshed.id, item.id);
        assert_eq!(refreshed.summary, "Final cut");
    }

    #[test]
    fn test_save_related_skips_unfollowed_records() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let shutdown = Shutdown::new();
        let following = HashSet::new();
        let ctx = HookContext::new(&conn, "fixed", &following, &shutdown);

        let reference = RecordRef::new(RecordType::Video, "v1");
        ctx.save_related(&reference, &video("First cut")).unwrap();
        assert!(ctx.record_exists(&reference).unwrap());
        assert_eq!(Timeline::new(&conn).count(None).unwrap(), 0);
    }
}
