//! Checkpoint database schema

use rusqlite::Connection;

/// Version written with every snapshot; older or newer payloads are rejected
pub const CHECKPOINT_VERSION: i64 = 1;

/// SQL schema for the checkpoint database
///
/// A single row (`id = 1`) holds the latest snapshot, so a save is a
/// replace and readers only ever see one complete snapshot.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS checkpoint (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    config_hash TEXT NOT NULL,
    payload TEXT NOT NULL,
    saved_at TEXT NOT NULL
);
"#;

/// Creates the checkpoint table if it does not exist
pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}
