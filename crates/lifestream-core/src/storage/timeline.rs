//! Timeline index
//!
//! Projects followed domain records into `items` and serves the feed
//! queries. An item is resolved by its (record_type, record_id) pair, so
//! saving the same record again updates its one item in place.
//!
//! Feed order is timestamp descending, ties broken by item id (insertion
//! order) ascending.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::{DomainRecord, Item, RecordRef, RecordType};
use crate::storage::{from_millis, to_millis, StorageError, StorageResult};

const ITEM_COLUMNS: &str =
    "id, record_type, record_id, timestamp, url, source, source_id, summary";

/// Item metadata supplied by whoever saved the record
#[derive(Debug, Clone, Default)]
pub struct ItemProjection<'a> {
    /// Explicit timestamp; falls back to the record's own, then to now
    pub timestamp: Option<DateTime<Utc>>,
    pub tags: &'a [String],
    /// Explicit URL; falls back to the record's canonical URL
    pub url: Option<&'a str>,
    pub source: &'a str,
    pub source_id: &'a str,
}

/// Feed query parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedQuery {
    pub record_type: Option<RecordType>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl FeedQuery {
    pub fn of_type(record_type: RecordType) -> Self {
        Self {
            record_type: Some(record_type),
            ..Self::default()
        }
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }
}

/// Timeline item storage and queries
pub struct Timeline<'c> {
    conn: &'c Connection,
}

impl<'c> Timeline<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Create or update the item for a record
    pub fn project(
        &self,
        reference: &RecordRef,
        record: &DomainRecord,
        projection: &ItemProjection<'_>,
    ) -> StorageResult<Item> {
        let timestamp = projection
            .timestamp
            .or_else(|| record.timestamp())
            .unwrap_or_else(Utc::now);
        let url = projection
            .url
            .map(String::from)
            .or_else(|| record.canonical_url());

        self.conn.execute(
            r#"
            INSERT INTO items (record_type, record_id, timestamp, url, source, source_id, summary)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (record_type, record_id) DO UPDATE SET
                timestamp = excluded.timestamp,
                url = excluded.url,
                source = excluded.source,
                source_id = excluded.source_id,
                summary = excluded.summary
            "#,
            params![
                reference.record_type.as_str(),
                reference.record_id,
                to_millis(timestamp),
                url,
                projection.source,
                projection.source_id,
                record.summary(),
            ],
        )?;

        let item_id: i64 = self.conn.query_row(
            "SELECT id FROM items WHERE record_type = ? AND record_id = ?",
            params![reference.record_type.as_str(), reference.record_id],
            |row| row.get(0),
        )?;
        self.replace_tags(item_id, projection.tags)?;

        self.get(item_id)?
            .ok_or_else(|| StorageError::RecordNotFound(reference.clone()))
    }

    /// Recompute summary and URL of an existing item after its record changed
    ///
    /// Returns false when the record has no item.
    pub fn refresh(&self, reference: &RecordRef, record: &DomainRecord) -> StorageResult<bool> {
        let updated = self.conn.execute(
            r#"
            UPDATE items SET summary = ?, url = COALESCE(?, url)
            WHERE record_type = ? AND record_id = ?
            "#,
            params![
                record.summary(),
                record.canonical_url(),
                reference.record_type.as_str(),
                reference.record_id,
            ],
        )?;
        Ok(updated > 0)
    }

    /// Get an item by id
    pub fn get(&self, id: i64) -> StorageResult<Option<Item>> {
        self.query_one(
            &format!("SELECT {} FROM items WHERE id = ?", ITEM_COLUMNS),
            params![id],
        )
    }

    /// Get the item shadowing a record
    pub fn get_by_record(&self, reference: &RecordRef) -> StorageResult<Option<Item>> {
        self.query_one(
            &format!(
                "SELECT {} FROM items WHERE record_type = ? AND record_id = ?",
                ITEM_COLUMNS
            ),
            params![reference.record_type.as_str(), reference.record_id],
        )
    }

    /// Find the item a provider stored under a source id
    pub fn find_by_source(&self, source: &str, source_id: &str) -> StorageResult<Option<Item>> {
        self.query_one(
            &format!(
                "SELECT {} FROM items WHERE source = ? AND source_id = ? ORDER BY id LIMIT 1",
                ITEM_COLUMNS
            ),
            params![source, source_id],
        )
    }

    /// Find a provider's item of a type whose source id ends with `suffix`
    pub fn find_by_source_suffix(
        &self,
        source: &str,
        record_type: RecordType,
        suffix: &str,
    ) -> StorageResult<Option<Item>> {
        self.query_one(
            &format!(
                r#"
                SELECT {} FROM items
                WHERE source = ?1
                  AND record_type = ?2
                  AND length(source_id) >= length(?3)
                  AND substr(source_id, length(source_id) - length(?3) + 1) = ?3
                ORDER BY id LIMIT 1
                "#,
                ITEM_COLUMNS
            ),
            params![source, record_type.as_str(), suffix],
        )
    }

    /// Items newest first
    pub fn feed(&self, query: &FeedQuery) -> StorageResult<Vec<Item>> {
        let limit = query.limit.map(|l| l as i64).unwrap_or(-1);
        let offset = query.offset as i64;

        match query.record_type {
            Some(t) => self.query_many(
                &format!(
                    r#"
                    SELECT {} FROM items WHERE record_type = ?
                    ORDER BY timestamp DESC, id ASC LIMIT ? OFFSET ?
                    "#,
                    ITEM_COLUMNS
                ),
                params![t.as_str(), limit, offset],
            ),
            None => self.query_many(
                &format!(
                    "SELECT {} FROM items ORDER BY timestamp DESC, id ASC LIMIT ? OFFSET ?",
                    ITEM_COLUMNS
                ),
                params![limit, offset],
            ),
        }
    }

    /// Search item summaries using full-text search
    pub fn search(&self, query: &str, limit: usize) -> StorageResult<Vec<Item>> {
        self.query_many(
            r#"
            SELECT i.id, i.record_type, i.record_id, i.timestamp, i.url, i.source, i.source_id, i.summary
            FROM items i
            JOIN items_fts fts ON i.id = fts.rowid
            WHERE items_fts MATCH ?
            ORDER BY rank, i.timestamp DESC
            LIMIT ?
            "#,
            params![query, limit as i64],
        )
    }

    /// Number of items, optionally of one type
    pub fn count(&self, record_type: Option<RecordType>) -> StorageResult<i64> {
        let count = match record_type {
            Some(t) => self.conn.query_row(
                "SELECT COUNT(*) FROM items WHERE record_type = ?",
                params![t.as_str()],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?,
        };
        Ok(count)
    }

    /// Item counts for every type that has items
    pub fn count_by_type(&self) -> StorageResult<Vec<(RecordType, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT record_type, COUNT(*) FROM items GROUP BY record_type ORDER BY record_type",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(tag, count)| -> StorageResult<(RecordType, i64)> {
                Ok((parse_type(&tag)?, count))
            })
            .collect()
    }

    /// Get tags with usage counts
    pub fn tags_with_counts(&self) -> StorageResult<Vec<(String, i64)>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT t.name, COUNT(it.item_id) as count
            FROM tags t
            JOIN item_tags it ON t.id = it.tag_id
            GROUP BY t.id
            ORDER BY count DESC, t.name
            "#,
        )?;

        let tags = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<(String, i64)>, _>>()?;
        Ok(tags)
    }

    // ==================== Private helpers ====================

    fn replace_tags(&self, item_id: i64, tags: &[String]) -> StorageResult<()> {
        self.conn
            .execute("DELETE FROM item_tags WHERE item_id = ?", params![item_id])?;

        for (position, tag) in tags.iter().enumerate() {
            let tag_id = get_or_create_tag(self.conn, tag)?;
            self.conn.execute(
                "INSERT OR IGNORE INTO item_tags (item_id, tag_id, position) VALUES (?, ?, ?)",
                params![item_id, tag_id, position as i64],
            )?;
        }
        Ok(())
    }

    fn tags_for_item(&self, item_id: i64) -> StorageResult<Vec<String>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT t.name FROM tags t
            JOIN item_tags it ON t.id = it.tag_id
            WHERE it.item_id = ?
            ORDER BY it.position
            "#,
        )?;

        let tags = stmt
            .query_map(params![item_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(tags)
    }

    fn query_one(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> StorageResult<Option<Item>> {
        let row = self
            .conn
            .query_row(sql, params, ItemRow::from_row)
            .optional()?;
        row.map(|row| self.hydrate(row)).transpose()
    }

    fn query_many(&self, sql: &str, params: impl rusqlite::Params) -> StorageResult<Vec<Item>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, ItemRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(|row| self.hydrate(row)).collect()
    }

    fn hydrate(&self, row: ItemRow) -> StorageResult<Item> {
        let record_type = parse_type(&row.record_type)?;
        Ok(Item {
            tags: self.tags_for_item(row.id)?,
            id: row.id,
            record: RecordRef::new(record_type, row.record_id),
            timestamp: from_millis(row.timestamp),
            url: row.url,
            source: row.source,
            source_id: row.source_id,
            summary: row.summary,
        })
    }
}

// ==================== Internal structs ====================

struct ItemRow {
    id: i64,
    record_type: String,
    record_id: String,
    timestamp: i64,
    url: Option<String>,
    source: String,
    source_id: String,
    summary: String,
}

impl ItemRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            record_type: row.get(1)?,
            record_id: row.get(2)?,
            timestamp: row.get(3)?,
            url: row.get(4)?,
            source: row.get(5)?,
            source_id: row.get(6)?,
            summary: row.get(7)?,
        })
    }
}

fn parse_type(tag: &str) -> StorageResult<RecordType> {
    Ok(tag.parse()?)
}

/// Get or create a tag, returning its ID
fn get_or_create_tag(conn: &Connection, name: &str) -> StorageResult<i64> {
    let existing: Option<i64> = conn
        .query_row("SELECT id FROM tags WHERE name = ?", params![name], |row| {
            row.get(0)
        })
        .optional()?;

    if let Some(id) = existing {
        return Ok(id);
    }

    conn.execute("INSERT INTO tags (name) VALUES (?)", params![name])?;
    Ok(conn.last_insert_rowid())
}
