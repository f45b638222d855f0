//! Migration Runner - coordinates a migration run
//!
//! A run takes the advisory lock, makes sure the ledger exists, then walks the
//! catalog in name order against the ledger watermark:
//!
//! - files at or below the watermark are re-hashed and compared with the
//!   recorded digest,
//! - the file right after the watermark is applied and advances it,
//! - anything further ahead means a file is missing and the run stops.
//!
//! When another process already holds the lock, the run waits for it to be
//! released and returns without touching anything, trusting the holder to
//! have applied the full set.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::backends::DatabaseConnection;
use crate::config::MigrationConfig;
use crate::error::{MigrateError, MigrateResult};

use super::catalog;
use super::definitions::{
    MigrationFile, MigrationRunResult, MigrationState, MigrationStatus, MigrationStatusReport,
};
use super::executor::MigrationExecutor;
use super::hasher::hash_content;
use super::ledger::Ledger;
use super::lock::AdvisoryLock;

/// Migration runner that applies migrations against one database session
pub struct MigrationRunner {
    config: MigrationConfig,
    ledger: Ledger,
    lock: AdvisoryLock,
}

impl MigrationRunner {
    /// Create a new migration runner
    pub fn new(config: MigrationConfig) -> MigrateResult<Self> {
        config.validate()?;
        Ok(Self {
            ledger: Ledger::new(config.ledger_table.clone()),
            lock: AdvisoryLock::new(config.lock_id),
            config,
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Run all pending migrations
    ///
    /// The advisory lock is released on every path once it has been taken,
    /// including when a migration fails.
    pub async fn run(&self, conn: &mut dyn DatabaseConnection) -> MigrateResult<MigrationRunResult> {
        let start_time = Instant::now();

        if !self.lock.try_acquire(conn).await? {
            tracing::warn!("Another instance is running migrations, waiting...");
            self.lock.acquire(conn, self.config.lock_timeout).await?;
            self.lock.release(conn).await?;
            tracing::info!("Migrations were completed by another instance");

            return Ok(MigrationRunResult {
                deferred: true,
                execution_time_ms: start_time.elapsed().as_millis(),
                ..MigrationRunResult::default()
            });
        }

        let outcome = self.run_locked(conn).await;
        let released = self.lock.release(conn).await;

        let mut result = match (outcome, released) {
            (Ok(result), Ok(_)) => result,
            (Ok(_), Err(release_err)) => return Err(release_err),
            (Err(err), Ok(_)) => return Err(err),
            (Err(err), Err(release_err)) => {
                tracing::warn!(
                    "Failed to release migration lock {} after error: {}",
                    self.lock.key(),
                    release_err
                );
                return Err(err);
            }
        };

        result.execution_time_ms = start_time.elapsed().as_millis();
        Ok(result)
    }

    async fn run_locked(&self, conn: &mut dyn DatabaseConnection) -> MigrateResult<MigrationRunResult> {
        tracing::info!("Migrations started..");
        self.ledger.ensure_schema(conn).await?;
        let mut watermark = self.ledger.watermark(conn).await?;

        let files = catalog::discover(&self.config.migration_dir, &self.config.includes)?;
        self.check_sequence(&files, watermark)?;

        let executor = MigrationExecutor::new(&self.ledger);
        let mut result = MigrationRunResult::default();

        for file in &files {
            let content = file.load_content()?;

            if file.sequence_id <= watermark {
                self.verify(conn, file, &content).await?;
                result.verified_count += 1;
                continue;
            }
            if file.sequence_id > watermark + 1 {
                return Err(MigrateError::SequenceGap {
                    missing: watermark + 1,
                });
            }

            executor.apply(conn, file, &content).await?;
            watermark = file.sequence_id;
            result.applied_migrations.push(file.name.clone());
        }

        let final_watermark = self.ledger.watermark(conn).await?;
        tracing::info!("Migrations complete. Last migration id: {}", final_watermark);
        result.final_watermark = Some(final_watermark);
        Ok(result)
    }

    /// Walk the catalog ids against the watermark before touching the database
    ///
    /// A gap found here stops the run before any file is applied. In strict
    /// mode a file reusing the number of any earlier file is rejected too.
    fn check_sequence(&self, files: &[MigrationFile], watermark: i64) -> MigrateResult<()> {
        let mut expected = watermark;
        let mut seen = HashSet::with_capacity(files.len());

        for file in files {
            if !seen.insert(file.sequence_id) && self.config.strict_sequence {
                return Err(MigrateError::DuplicateSequenceId {
                    id: file.sequence_id,
                    file: file.name.clone(),
                });
            }

            if file.sequence_id == expected + 1 {
                expected = file.sequence_id;
            } else if file.sequence_id > expected + 1 {
                return Err(MigrateError::SequenceGap {
                    missing: expected + 1,
                });
            }
        }
        Ok(())
    }

    async fn verify(
        &self,
        conn: &mut dyn DatabaseConnection,
        file: &MigrationFile,
        content: &str,
    ) -> MigrateResult<()> {
        let recorded = self.ledger.record_hash(conn, file.sequence_id).await?;
        if recorded != hash_content(content) {
            return Err(MigrateError::ImmutabilityViolation {
                file: file.name.clone(),
            });
        }
        tracing::debug!("Verified {}", file.name);
        Ok(())
    }

    /// Report each migration as applied, pending, modified or missing
    ///
    /// Read-only: takes no lock and does not create the ledger table.
    pub async fn status(&self, conn: &mut dyn DatabaseConnection) -> MigrateResult<MigrationStatusReport> {
        let files = catalog::discover(&self.config.migration_dir, &self.config.includes)?;

        if !self.ledger.exists(conn).await? {
            let migrations = files
                .into_iter()
                .map(|file| MigrationStatus {
                    sequence_id: file.sequence_id,
                    name: file.name,
                    state: MigrationState::Pending,
                    executed_at: None,
                })
                .collect();
            return Ok(MigrationStatusReport {
                watermark: 0,
                migrations,
            });
        }

        let watermark = self.ledger.watermark(conn).await?;
        let records = self.ledger.records(conn).await?;
        let by_id: HashMap<i64, _> = records.iter().map(|record| (record.id, record)).collect();
        let on_disk: HashSet<i64> = files.iter().map(|file| file.sequence_id).collect();

        let mut migrations = Vec::with_capacity(files.len());
        for file in &files {
            let (state, executed_at) = match by_id.get(&file.sequence_id) {
                Some(record) => {
                    let state = if record.hash == hash_content(&file.load_content()?) {
                        MigrationState::Applied
                    } else {
                        MigrationState::Modified
                    };
                    (state, record.executed_at)
                }
                None => (MigrationState::Pending, None),
            };
            migrations.push(MigrationStatus {
                sequence_id: file.sequence_id,
                name: file.name.clone(),
                state,
                executed_at,
            });
        }

        migrations.extend(records.iter().filter(|r| !on_disk.contains(&r.id)).map(|record| {
            MigrationStatus {
                sequence_id: record.id,
                name: record.name.clone(),
                state: MigrationState::Missing,
                executed_at: record.executed_at,
            }
        }));
        migrations.sort_by_key(|m| m.sequence_id);

        Ok(MigrationStatusReport {
            watermark,
            migrations,
        })
    }
}
