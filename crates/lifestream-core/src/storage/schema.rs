//! SQLite schema
//!
//! Domain records are stored as typed JSON bodies keyed by
//! (record_type, record_id). Timeline items reference records through a
//! composite foreign key, so deleting a record deletes its item.

use rusqlite::{Connection, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- Domain records, one JSON body per record
        CREATE TABLE IF NOT EXISTS records (
            record_type TEXT NOT NULL,
            record_id TEXT NOT NULL,
            body TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (record_type, record_id)
        );

        -- Timeline items, at most one per record
        CREATE TABLE IF NOT EXISTS items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            record_type TEXT NOT NULL,
            record_id TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            url TEXT,
            source TEXT NOT NULL,
            source_id TEXT NOT NULL DEFAULT '',
            summary TEXT NOT NULL DEFAULT '',
            UNIQUE (record_type, record_id),
            FOREIGN KEY (record_type, record_id)
                REFERENCES records(record_type, record_id) ON DELETE CASCADE
        );

        -- Tags table (normalized)
        CREATE TABLE IF NOT EXISTS tags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL
        );

        -- Item-tag junction table, ordered
        CREATE TABLE IF NOT EXISTS item_tags (
            item_id INTEGER NOT NULL,
            tag_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            PRIMARY KEY (item_id, tag_id),
            FOREIGN KEY (item_id) REFERENCES items(id) ON DELETE CASCADE,
            FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
        );

        -- Last synced timestamp per provider, record type and filter
        CREATE TABLE IF NOT EXISTS checkpoints (
            provider TEXT NOT NULL,
            record_type TEXT NOT NULL,
            filter_key TEXT NOT NULL DEFAULT '',
            timestamp INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (provider, record_type, filter_key)
        );

        -- Indexes for common query patterns

        -- Feed order: newest first, insertion order on ties
        CREATE INDEX IF NOT EXISTS idx_items_timestamp ON items(timestamp DESC, id);

        -- Per-type feeds
        CREATE INDEX IF NOT EXISTS idx_items_type_timestamp ON items(record_type, timestamp DESC);

        -- Source-id identity lookups
        CREATE INDEX IF NOT EXISTS idx_items_source ON items(source, source_id);

        -- Fast tag lookups
        CREATE INDEX IF NOT EXISTS idx_tags_name ON tags(name);
        CREATE INDEX IF NOT EXISTS idx_item_tags_tag_id ON item_tags(tag_id);

        -- Full-text search over item summaries
        CREATE VIRTUAL TABLE IF NOT EXISTS items_fts USING fts5(
            summary,
            url,
            content='items',
            content_rowid='id'
        );

        -- Triggers to keep FTS in sync with items
        CREATE TRIGGER IF NOT EXISTS items_ai AFTER INSERT ON items BEGIN
            INSERT INTO items_fts(rowid, summary, url)
            VALUES (NEW.id, NEW.summary, NEW.url);
        END;

        CREATE TRIGGER IF NOT EXISTS items_ad AFTER DELETE ON items BEGIN
            INSERT INTO items_fts(items_fts, rowid, summary, url)
            VALUES ('delete', OLD.id, OLD.summary, OLD.url);
        END;

        CREATE TRIGGER IF NOT EXISTS items_au AFTER UPDATE ON items BEGIN
            INSERT INTO items_fts(items_fts, rowid, summary, url)
            VALUES ('delete', OLD.id, OLD.summary, OLD.url);
            INSERT INTO items_fts(rowid, summary, url)
            VALUES (NEW.id, NEW.summary, NEW.url);
        END;
        "#,
    )?;

    // Set schema version
    conn.execute(
        "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<Option<i32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_info WHERE key = 'version'")?;
    let result: Result<String> = stmt.query_row([], |row| row.get(0));

    match result {
        Ok(version_str) => Ok(version_str.parse().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Check if schema needs initialization or migration
pub fn needs_init(conn: &Connection) -> bool {
    let table_exists: bool = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_info'")
        .and_then(|mut stmt| stmt.exists([]))
        .unwrap_or(false);

    if !table_exists {
        return true;
    }

    match get_schema_version(conn) {
        Ok(Some(v)) => v < SCHEMA_VERSION,
        _ => true,
    }
}
