//! Database schema definitions
//!
//! Both shared components can live in one SQLite file: the identifier store
//! uses the `kv` table and the message bus uses the `messages` table.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Flat key space: URL -> id, decimal id -> URL, and the sequence counter
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Pipeline queues; a message is invisible while its lease is in the future
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    queue TEXT NOT NULL,
    payload BLOB NOT NULL,
    enqueued_at INTEGER NOT NULL,
    leased_until INTEGER,
    delivery_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_messages_queue ON messages(queue, id);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
