//! Checkpointing for resumable runs
//!
//! After every URL reaches a terminal state the scheduler hands a
//! [`CheckpointRecord`] to a [`CheckpointStore`]. On startup the record is
//! loaded back so completed URLs are skipped and the frontier keeps its
//! order. A record that cannot be read is reported as
//! [`CheckpointError::Corrupt`] and the run starts fresh.

mod schema;
mod sqlite;

pub use schema::CHECKPOINT_VERSION;
pub use sqlite::SqliteCheckpointStore;

use crate::crawler::{ErrorCounters, FrontierEntry};
use crate::output::{CrawlStats, UrlOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from checkpoint persistence
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint is corrupt: {0}")]
    Corrupt(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for checkpoint operations
pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// Everything needed to resume a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Normalized URLs fetched successfully
    pub completed: Vec<String>,

    /// Normalized URLs that failed permanently
    pub failed: Vec<String>,

    /// Queued and in-flight entries, in pop order
    pub frontier: Vec<FrontierEntry>,

    pub outcomes: Vec<UrlOutcome>,

    pub stats: CrawlStats,

    pub errors: ErrorCounters,
}

impl CheckpointRecord {
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty() && self.failed.is_empty() && self.frontier.is_empty()
    }
}

/// A record as read back from a store
#[derive(Debug, Clone)]
pub struct StoredCheckpoint {
    pub record: CheckpointRecord,
    /// Hash of the configuration the record was written under
    pub config_hash: String,
    pub saved_at: DateTime<Utc>,
}

/// Durable storage for the latest checkpoint
pub trait CheckpointStore: Send {
    /// Atomically replaces the stored checkpoint
    fn save(&mut self, record: &CheckpointRecord, config_hash: &str) -> CheckpointResult<()>;

    /// Reads the stored checkpoint, if there is one
    fn load(&self) -> CheckpointResult<Option<StoredCheckpoint>>;

    /// Deletes the stored checkpoint
    fn clear(&mut self) -> CheckpointResult<()>;
}
