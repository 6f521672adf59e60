//! SQLite plumbing shared by the identifier store and the message bus
//!
//! Several stage processes may open the same database file at once, so every
//! connection runs in WAL mode with a busy timeout instead of failing fast on
//! a locked database.

mod schema;

pub use schema::{initialize_schema, SCHEMA_SQL};

use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// How long a connection waits for another process's write lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens (or creates) a database file and makes sure the schema exists
pub fn open_database(path: &Path) -> Result<Connection, rusqlite::Error> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;

    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA temp_store = MEMORY;
    ",
    )?;

    initialize_schema(&conn)?;

    Ok(conn)
}

/// Opens a private in-memory database with the schema applied
pub fn open_in_memory() -> Result<Connection, rusqlite::Error> {
    let conn = Connection::open_in_memory()?;
    initialize_schema(&conn)?;
    Ok(conn)
}

/// Milliseconds since the Unix epoch, the time unit stored in the database
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
