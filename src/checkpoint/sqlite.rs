//! SQLite checkpoint store

use crate::checkpoint::schema::{initialize_schema, CHECKPOINT_VERSION};
use crate::checkpoint::{
    CheckpointError, CheckpointRecord, CheckpointResult, CheckpointStore, StoredCheckpoint,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// Keeps the latest checkpoint in a single-row SQLite table
pub struct SqliteCheckpointStore {
    conn: Connection,
}

impl SqliteCheckpointStore {
    /// Opens or creates the checkpoint database at `path`
    pub fn open(path: &Path) -> CheckpointResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
        ",
        )?;

        initialize_schema(&conn)?;
        tracing::debug!("Opened checkpoint database {}", path.display());

        Ok(Self { conn })
    }

    /// Creates an in-memory store
    pub fn in_memory() -> CheckpointResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn save(&mut self, record: &CheckpointRecord, config_hash: &str) -> CheckpointResult<()> {
        let payload = serde_json::to_string(record)?;
        let now = Utc::now().to_rfc3339();

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO checkpoint (id, version, config_hash, payload, saved_at)
             VALUES (1, ?1, ?2, ?3, ?4)",
            params![CHECKPOINT_VERSION, config_hash, payload, now],
        )?;
        tx.commit()?;

        Ok(())
    }

    fn load(&self) -> CheckpointResult<Option<StoredCheckpoint>> {
        let row = self
            .conn
            .query_row(
                "SELECT version, config_hash, payload, saved_at FROM checkpoint WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((version, config_hash, payload, saved_at)) = row else {
            return Ok(None);
        };

        if version != CHECKPOINT_VERSION {
            return Err(CheckpointError::Corrupt(format!(
                "unsupported checkpoint version {} (expected {})",
                version, CHECKPOINT_VERSION
            )));
        }

        let record: CheckpointRecord = serde_json::from_str(&payload)
            .map_err(|e| CheckpointError::Corrupt(format!("undecodable payload: {}", e)))?;

        let saved_at = DateTime::parse_from_rfc3339(&saved_at)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| CheckpointError::Corrupt(format!("bad timestamp '{}': {}", saved_at, e)))?;

        Ok(Some(StoredCheckpoint {
            record,
            config_hash,
            saved_at,
        }))
    }

    fn clear(&mut self) -> CheckpointResult<()> {
        self.conn.execute("DELETE FROM checkpoint", [])?;
        Ok(())
    }
}
