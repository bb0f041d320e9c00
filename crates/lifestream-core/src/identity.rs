//! Record identity resolution
//!
//! Maps a normalized candidate onto the domain record it describes:
//!
//! 1. **Intrinsic key**: types with a natural key (a photo id, a photoset
//!    id, a result URL) are fetched-or-created by that key.
//! 2. **Source id**: otherwise the provider derives a stable source id and
//!    the record is found through the timeline item stored under
//!    (provider, source id).
//!
//! Candidate fields always win over stored ones. Stored fields the
//! candidate does not carry (for example EXIF data written by a hook) are
//! kept.

use rusqlite::Connection;
use serde_json::Map;
use tracing::debug;
use uuid::Uuid;

use crate::candidate::Candidate;
use crate::error::{SyncError, SyncResult};
use crate::models::{DomainRecord, Item, RecordRef, RecordType};
use crate::storage::{Records, Timeline};

/// How a candidate is identified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordIdentity {
    /// Value of the type's intrinsic key
    Intrinsic(String),
    /// Provider-derived source id
    Source(String),
}

/// Outcome of an upsert
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub reference: RecordRef,
    pub record: DomainRecord,
    pub created: bool,
    /// Source id to store on the timeline item
    pub source_id: String,
}

/// Decide how a candidate is identified
pub fn identify(
    record_type: RecordType,
    candidate: &Candidate,
    source_id: Option<String>,
) -> SyncResult<RecordIdentity> {
    if let Some(key) = record_type
        .intrinsic_key()
        .and_then(|field| candidate.get_str(field))
        .filter(|value| !value.is_empty())
    {
        return Ok(RecordIdentity::Intrinsic(key.to_string()));
    }

    match source_id.filter(|id| !id.is_empty()) {
        Some(id) => Ok(RecordIdentity::Source(id)),
        None => Err(SyncError::Configuration(format!(
            "{} candidate has neither an intrinsic key nor a source id",
            record_type
        ))),
    }
}

/// Look up the timeline item a candidate would resolve to
pub fn find_item(
    conn: &Connection,
    provider: &str,
    record_type: RecordType,
    candidate: &Candidate,
    source_id: Option<String>,
) -> SyncResult<Option<Item>> {
    let timeline = Timeline::new(conn);
    let item = match identify(record_type, candidate, source_id)? {
        RecordIdentity::Intrinsic(key) => {
            timeline.get_by_record(&RecordRef::new(record_type, key))?
        }
        RecordIdentity::Source(id) => timeline
            .find_by_source(provider, &id)?
            .filter(|item| item.record_type() == record_type),
    };
    Ok(item)
}

/// Create or update the domain record a candidate describes
///
/// `followed` tells whether the type has timeline items; source-id
/// identity relies on them and is rejected for unfollowed types.
pub fn upsert(
    conn: &Connection,
    provider: &str,
    record_type: RecordType,
    followed: bool,
    candidate: &Candidate,
    source_id: Option<String>,
) -> SyncResult<Resolved> {
    let records = Records::new(conn);

    match identify(record_type, candidate, source_id.clone())? {
        RecordIdentity::Intrinsic(key) => {
            let reference = RecordRef::new(record_type, key.clone());
            let existing = records.get(&reference)?;
            let record = merge(record_type, existing, candidate)?;
            let created = records.write(&reference, &record)?;
            debug!(%reference, created, "Upserted by intrinsic key");

            Ok(Resolved {
                reference,
                record,
                created,
                source_id: source_id.filter(|id| !id.is_empty()).unwrap_or(key),
            })
        }
        RecordIdentity::Source(source_id) => {
            if !followed {
                return Err(SyncError::Configuration(format!(
                    "{} is not followed, so source id '{}' cannot be resolved",
                    record_type, source_id
                )));
            }

            let existing_item = Timeline::new(conn).find_by_source(provider, &source_id)?;
            let (reference, existing) = match existing_item {
                Some(item) if item.record_type() != record_type => {
                    return Err(SyncError::UpsertAmbiguity {
                        record_type,
                        source_id,
                        details: format!("source id already used by {}", item.record),
                    });
                }
                Some(item) => match records.get(&item.record)? {
                    Some(record) => (item.record, Some(record)),
                    None => {
                        return Err(SyncError::UpsertAmbiguity {
                            record_type,
                            source_id,
                            details: format!("item {} references a missing record", item.id),
                        });
                    }
                },
                None => (
                    RecordRef::new(record_type, Uuid::new_v4().to_string()),
                    None,
                ),
            };

            let record = merge(record_type, existing, candidate)?;
            let created = records.write(&reference, &record)?;
            debug!(%reference, created, %source_id, "Upserted by source id");

            Ok(Resolved {
                reference,
                record,
                created,
                source_id,
            })
        }
    }
}

/// Overlay the candidate's schema fields onto the stored record
fn merge(
    record_type: RecordType,
    existing: Option<DomainRecord>,
    candidate: &Candidate,
) -> SyncResult<DomainRecord> {
    let mut fields = match existing {
        Some(record) => record
            .to_fields()
            .map_err(|e| SyncError::processing(record_type, e))?,
        None => Map::new(),
    };

    let names = DomainRecord::field_names(record_type);
    for (name, value) in &candidate.fields {
        if names.contains(name) {
            fields.insert(name.clone(), value.clone());
        }
    }

    DomainRecord::from_fields(record_type, fields).map_err(|e| SyncError::processing(record_type, e))
}
