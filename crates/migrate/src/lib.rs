//! # sequent-migrate
//!
//! Applies a directory of numbered SQL migration files to PostgreSQL exactly
//! once, in strict order, while several deploy processes may be starting at
//! the same time.
//!
//! ```rust,no_run
//! use sequent_migrate::{MigrationConfig, MigrationRunner, PostgresConnection};
//!
//! # async fn example() -> sequent_migrate::MigrateResult<()> {
//! let runner = MigrationRunner::new(MigrationConfig::from_env()?)?;
//! let mut conn = PostgresConnection::connect(Some("postgres://localhost/app")).await?;
//! let result = runner.run(&mut conn).await?;
//! println!("last migration id: {:?}", result.final_watermark);
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod config;
pub mod error;
pub mod migrations;

#[cfg(test)]
mod tests;

pub use backends::{
    DatabaseConnection, DatabaseExecutor, DatabaseRow, DatabaseTransaction, DatabaseValue,
    PostgresConnection,
};
pub use config::MigrationConfig;
pub use error::{MigrateError, MigrateResult};
pub use migrations::{
    AdvisoryLock, ExecutionMode, Ledger, LedgerRecord, MigrationFile, MigrationRunResult,
    MigrationRunner, MigrationState, MigrationStatus, MigrationStatusReport,
};
