//! Unified storage interface
//!
//! The `Store` owns the SQLite connection and hands out the table-level
//! stores (`Records`, `Timeline`, `Checkpoints`). It also knows which
//! record types are followed, i.e. projected into the timeline.
//!
//! ## Usage
//!
//! ```ignore
//! let store = Store::open(&config)?;
//!
//! // Interactive save (no provider involved)
//! let saved = store.save_record(None, &record, &tags)?;
//!
//! // Query the timeline
//! let items = store.timeline().feed(&FeedQuery::default())?;
//! ```

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use rusqlite::{Connection, Transaction};
use uuid::Uuid;

use crate::config::Config;
use crate::models::{DomainRecord, Item, RecordRef, RecordType, INTERACTIVE_SOURCE};
use crate::storage::{
    init_schema, needs_init, Checkpoints, ItemProjection, Records, StorageError, StorageResult,
    Timeline,
};

/// Result of an interactive save
#[derive(Debug, Clone, PartialEq)]
pub struct SavedRecord {
    pub reference: RecordRef,
    pub created: bool,
    /// The timeline item, when the record's type is followed
    pub item: Option<Item>,
}

/// Unified storage interface for Lifestream
pub struct Store {
    conn: Connection,
    following: HashSet<RecordType>,
    path: Option<PathBuf>,
}

impl Store {
    /// Open or create the database described by the configuration
    pub fn open(config: &Config) -> Result<Self> {
        let path = config.sqlite_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::from_io(e, parent.to_path_buf()))
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let conn = Connection::open(&path).map_err(|source| StorageError::Open {
            path: path.clone(),
            source,
        })?;

        let mut store = Self::from_connection(conn, config.following.iter().copied())
            .context("Failed to initialize SQLite schema")?;
        store.path = Some(path);
        Ok(store)
    }

    /// Open an in-memory database following the default record types (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let following = RecordType::ALL
            .iter()
            .copied()
            .filter(|t| t.followed_by_default());
        Ok(Self::from_connection(conn, following)?)
    }

    fn from_connection(
        conn: Connection,
        following: impl IntoIterator<Item = RecordType>,
    ) -> StorageResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        if needs_init(&conn) {
            init_schema(&conn)?;
        }
        Ok(Self {
            conn,
            following: following.into_iter().collect(),
            path: None,
        })
    }

    /// Replace the set of followed record types
    pub fn with_following(mut self, following: impl IntoIterator<Item = RecordType>) -> Self {
        self.following = following.into_iter().collect();
        self
    }

    /// Record types projected into the timeline
    pub fn following(&self) -> &HashSet<RecordType> {
        &self.following
    }

    /// Whether records of this type get a timeline item
    pub fn follows(&self, record_type: RecordType) -> bool {
        self.following.contains(&record_type)
    }

    /// Get a reference to the underlying connection
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Path of the database file, `None` for in-memory stores
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    /// Size of the database file in bytes
    pub fn database_size(&self) -> u64 {
        self.path
            .as_ref()
            .and_then(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Begin a transaction
    pub fn transaction(&mut self) -> StorageResult<Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }

    pub fn records(&self) -> Records<'_> {
        Records::new(&self.conn)
    }

    pub fn timeline(&self) -> Timeline<'_> {
        Timeline::new(&self.conn)
    }

    pub fn checkpoints(&self) -> Checkpoints<'_> {
        Checkpoints::new(&self.conn)
    }

    // ==================== Interactive operations ====================

    /// Save a record outside of any provider run
    ///
    /// The record id is the record's intrinsic key when it has one, else
    /// `record_id`, else a fresh UUID. Followed types are projected with
    /// the `INTERACTIVE` source and an empty source id.
    pub fn save_record(
        &mut self,
        record_id: Option<&str>,
        record: &DomainRecord,
        tags: &[String],
    ) -> StorageResult<SavedRecord> {
        let record_type = record.record_type();
        let id = record
            .intrinsic_key()
            .or(record_id)
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let reference = RecordRef::new(record_type, id);
        let followed = self.follows(record_type);

        let tx = self.conn.transaction()?;
        let created = Records::new(&tx).write(&reference, record)?;
        let item = if followed {
            Some(Timeline::new(&tx).project(
                &reference,
                record,
                &ItemProjection {
                    timestamp: None,
                    tags,
                    url: None,
                    source: INTERACTIVE_SOURCE,
                    source_id: "",
                },
            )?)
        } else {
            None
        };
        tx.commit()?;

        Ok(SavedRecord {
            reference,
            created,
            item,
        })
    }

    /// Delete a record; its timeline item goes with it
    pub fn delete_record(&mut self, reference: &RecordRef) -> StorageResult<bool> {
        self.records().delete(reference)
    }

    /// Load a record by reference
    pub fn get_record(&self, reference: &RecordRef) -> StorageResult<Option<DomainRecord>> {
        self.records().get(reference)
    }
}
