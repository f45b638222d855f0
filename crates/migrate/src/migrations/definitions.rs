//! Migration Definitions - Core types shared by the migration components
//!
//! Defines the migration file descriptor, the persisted ledger record, the
//! per-file execution mode and the results reported back to callers.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::path::PathBuf;

use crate::error::MigrateResult;

/// A migration file found on disk
///
/// Only the descriptor is kept in memory; the SQL is read when the file is
/// verified or applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    /// Sequence number parsed from the leading digits of the name
    pub sequence_id: i64,
    /// Path relative to the migration directory, `/`-separated
    pub name: String,
    /// Location to read the content from
    pub path: PathBuf,
}

impl MigrationFile {
    /// Read the migration SQL
    pub fn load_content(&self) -> MigrateResult<String> {
        Ok(std::fs::read_to_string(&self.path)?)
    }
}

/// A row of the ledger table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerRecord {
    /// Sequence number of the applied migration
    pub id: i64,
    /// File name the migration was applied from
    pub name: String,
    /// Content digest at the time it was applied
    pub hash: String,
    /// When it was applied
    pub executed_at: Option<NaiveDateTime>,
}

/// How a migration's SQL is sent to the database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecutionMode {
    /// Whole file plus its ledger record in one transaction
    Transactional,
    /// Statement by statement, outside any transaction
    NonTransactional,
}

/// Result of a migration run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationRunResult {
    /// Files applied by this run, in order
    pub applied_migrations: Vec<String>,
    /// Files that were already applied and passed the integrity check
    pub verified_count: usize,
    /// Watermark read back after the run; `None` when the run deferred
    pub final_watermark: Option<i64>,
    /// Another process held the lock, this run waited and applied nothing
    pub deferred: bool,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

impl MigrationRunResult {
    /// Number of migrations that were applied
    pub fn applied_count(&self) -> usize {
        self.applied_migrations.len()
    }
}

/// State of a single migration as seen by a status report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    /// Recorded in the ledger with a matching digest
    Applied,
    /// Present on disk, not yet recorded
    Pending,
    /// Recorded, but the file on disk no longer matches the recorded digest
    Modified,
    /// Recorded in the ledger, no matching file on disk
    Missing,
}

/// One line of a status report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationStatus {
    pub sequence_id: i64,
    pub name: String,
    pub state: MigrationState,
    pub executed_at: Option<NaiveDateTime>,
}

/// Status of every migration known on disk or in the ledger
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationStatusReport {
    pub watermark: i64,
    pub migrations: Vec<MigrationStatus>,
}

impl MigrationStatusReport {
    pub fn pending_count(&self) -> usize {
        self.count(MigrationState::Pending)
    }

    pub fn modified_count(&self) -> usize {
        self.count(MigrationState::Modified)
    }

    fn count(&self, state: MigrationState) -> usize {
        self.migrations.iter().filter(|m| m.state == state).count()
    }
}
