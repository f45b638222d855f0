//! Migration System
//!
//! Sequentially numbered SQL files applied exactly once, in order, under a
//! cross-process advisory lock, with a digest check on files already applied.

pub mod catalog;
pub mod definitions;
pub mod executor;
pub mod hasher;
pub mod ledger;
pub mod lock;
pub mod runner;

pub use catalog::{discover, parse_sequence_id};
pub use definitions::{
    ExecutionMode, LedgerRecord, MigrationFile, MigrationRunResult, MigrationState,
    MigrationStatus, MigrationStatusReport,
};
pub use executor::{execution_mode, split_statements, MigrationExecutor};
pub use hasher::hash_content;
pub use ledger::Ledger;
pub use lock::AdvisoryLock;
pub use runner::MigrationRunner;
