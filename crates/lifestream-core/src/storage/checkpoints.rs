//! Checkpoint storage
//!
//! One row per (provider, record_type, filter). A missing row reads as the
//! epoch sentinel, and `advance` never moves a checkpoint backward.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::{epoch, Checkpoint, RecordType};
use crate::storage::{from_millis, to_millis, StorageResult};

/// Last synced timestamps
pub struct Checkpoints<'c> {
    conn: &'c Connection,
}

impl<'c> Checkpoints<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Current checkpoint, or the epoch sentinel when never synced
    pub fn get(
        &self,
        provider: &str,
        record_type: RecordType,
        filter: Option<&str>,
    ) -> StorageResult<Checkpoint> {
        let millis: Option<i64> = self
            .conn
            .query_row(
                r#"
                SELECT timestamp FROM checkpoints
                WHERE provider = ? AND record_type = ? AND filter_key = ?
                "#,
                params![provider, record_type.as_str(), filter.unwrap_or("")],
                |row| row.get(0),
            )
            .optional()?;

        let timestamp = millis.map(from_millis).unwrap_or_else(epoch);
        Ok(Checkpoint::new(
            provider,
            record_type,
            filter.map(String::from),
            timestamp,
        ))
    }

    /// Timestamp of the last sync, the epoch when never synced
    pub fn last_updated(
        &self,
        provider: &str,
        record_type: RecordType,
        filter: Option<&str>,
    ) -> StorageResult<DateTime<Utc>> {
        Ok(self.get(provider, record_type, filter)?.timestamp)
    }

    /// Move a checkpoint forward; earlier timestamps leave it unchanged
    pub fn advance(
        &self,
        provider: &str,
        record_type: RecordType,
        filter: Option<&str>,
        timestamp: DateTime<Utc>,
    ) -> StorageResult<Checkpoint> {
        let timestamp = timestamp.max(epoch());
        self.conn.execute(
            r#"
            INSERT INTO checkpoints (provider, record_type, filter_key, timestamp, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (provider, record_type, filter_key) DO UPDATE SET
                timestamp = MAX(checkpoints.timestamp, excluded.timestamp),
                updated_at = excluded.updated_at
            "#,
            params![
                provider,
                record_type.as_str(),
                filter.unwrap_or(""),
                to_millis(timestamp),
                to_millis(Utc::now()),
            ],
        )?;

        self.get(provider, record_type, filter)
    }

    /// Every stored checkpoint
    pub fn list(&self) -> StorageResult<Vec<Checkpoint>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT provider, record_type, filter_key, timestamp FROM checkpoints
            ORDER BY provider, record_type, filter_key
            "#,
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(provider, record_type, filter, millis)| -> StorageResult<Checkpoint> {
                Ok(Checkpoint::new(
                    provider,
                    record_type.parse()?,
                    (!filter.is_empty()).then_some(filter),
                    from_millis(millis),
                ))
            })
            .collect()
    }
}
