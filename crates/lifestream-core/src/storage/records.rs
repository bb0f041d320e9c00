//! Domain record storage

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};

use crate::models::{DomainRecord, RecordRef, RecordType};
use crate::storage::{to_millis, StorageError, StorageResult};

/// Typed records keyed by (record_type, record_id)
pub struct Records<'c> {
    conn: &'c Connection,
}

impl<'c> Records<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Load a record by reference
    pub fn get(&self, record: &RecordRef) -> StorageResult<Option<DomainRecord>> {
        let body: Option<String> = self
            .conn
            .query_row(
                "SELECT body FROM records WHERE record_type = ? AND record_id = ?",
                params![record.record_type.as_str(), record.record_id],
                |row| row.get(0),
            )
            .optional()?;

        body.map(|body| decode(record, &body)).transpose()
    }

    pub fn exists(&self, record: &RecordRef) -> StorageResult<bool> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT 1 FROM records WHERE record_type = ? AND record_id = ?")?;
        Ok(stmt.exists(params![record.record_type.as_str(), record.record_id])?)
    }

    /// Insert or replace a record, returning true when it was created
    pub fn write(&self, reference: &RecordRef, record: &DomainRecord) -> StorageResult<bool> {
        if reference.record_type != record.record_type() {
            return Err(StorageError::InvalidRecord {
                record: reference.clone(),
                details: format!("body is a {} record", record.record_type()),
            });
        }

        let created = !self.exists(reference)?;
        let body = serde_json::to_string(&record.to_fields()?)?;
        let now = to_millis(Utc::now());

        self.conn.execute(
            r#"
            INSERT INTO records (record_type, record_id, body, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT (record_type, record_id)
            DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at
            "#,
            params![
                reference.record_type.as_str(),
                reference.record_id,
                body,
                now
            ],
        )?;

        Ok(created)
    }

    /// Delete a record (its timeline item cascades), returning true if it existed
    pub fn delete(&self, record: &RecordRef) -> StorageResult<bool> {
        let removed = self.conn.execute(
            "DELETE FROM records WHERE record_type = ? AND record_id = ?",
            params![record.record_type.as_str(), record.record_id],
        )?;
        Ok(removed > 0)
    }

    /// Number of stored records, optionally of one type
    pub fn count(&self, record_type: Option<RecordType>) -> StorageResult<i64> {
        let count = match record_type {
            Some(t) => self.conn.query_row(
                "SELECT COUNT(*) FROM records WHERE record_type = ?",
                params![t.as_str()],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?,
        };
        Ok(count)
    }
}

fn decode(reference: &RecordRef, body: &str) -> StorageResult<DomainRecord> {
    let fields: Map<String, Value> =
        serde_json::from_str(body).map_err(|e| StorageError::InvalidRecord {
            record: reference.clone(),
            details: e.to_string(),
        })?;
    DomainRecord::from_fields(reference.record_type, fields).map_err(|e| {
        StorageError::InvalidRecord {
            record: reference.clone(),
            details: e.to_string(),
        }
    })
}
