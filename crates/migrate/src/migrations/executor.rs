//! Migration Executor - applies one migration and records it
//!
//! A migration runs in a single transaction together with its ledger record
//! unless its first line opts out with
//! `-- postgres-migrations disable-transaction`. Opted-out files are split into
//! statements that run one at a time with no enclosing transaction, which is
//! what `CREATE INDEX CONCURRENTLY` and similar statements require.
//!
//! Splitting is a plain pattern match on `;` followed by a line break. A
//! semicolon at the end of a line inside a string literal or function body
//! splits there too; such files should keep the default transactional mode.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::backends::{DatabaseConnection, DatabaseExecutor};
use crate::error::{MigrateError, MigrateResult};

use super::definitions::{ExecutionMode, MigrationFile};
use super::hasher::hash_content;
use super::ledger::Ledger;

static DISABLE_TRANSACTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*--\s*postgres-migrations disable-transaction")
        .expect("disable-transaction pattern is valid")
});

static STATEMENT_TERMINATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r";\s*[\r\n]+").expect("statement terminator pattern is valid"));

/// Execution mode requested by the migration content
pub fn execution_mode(content: &str) -> ExecutionMode {
    if DISABLE_TRANSACTION.is_match(content) {
        ExecutionMode::NonTransactional
    } else {
        ExecutionMode::Transactional
    }
}

/// Split content into the statements run in non-transactional mode
///
/// Blank chunks, such as the one after a trailing terminator, are dropped.
pub fn split_statements(content: &str) -> Vec<&str> {
    STATEMENT_TERMINATOR
        .split(content)
        .filter(|statement| !statement.trim().is_empty())
        .collect()
}

/// Applies pending migrations and records them in the ledger
pub struct MigrationExecutor<'l> {
    ledger: &'l Ledger,
}

impl<'l> MigrationExecutor<'l> {
    pub fn new(ledger: &'l Ledger) -> Self {
        Self { ledger }
    }

    /// Apply `migration` whose SQL is `content`
    pub async fn apply(
        &self,
        conn: &mut dyn DatabaseConnection,
        migration: &MigrationFile,
        content: &str,
    ) -> MigrateResult<ExecutionMode> {
        let hash = hash_content(content);
        let mode = execution_mode(content);

        match mode {
            ExecutionMode::Transactional => {
                self.apply_in_transaction(conn, migration, content, &hash).await?
            }
            ExecutionMode::NonTransactional => {
                self.apply_statements(conn, migration, content, &hash).await?
            }
        }

        tracing::info!("✓ Migrated {}", migration.name);
        Ok(mode)
    }

    async fn apply_in_transaction(
        &self,
        conn: &mut dyn DatabaseConnection,
        migration: &MigrationFile,
        content: &str,
        hash: &str,
    ) -> MigrateResult<()> {
        let mut tx = conn.begin_transaction().await?;

        let outcome = self
            .execute_and_record(tx.as_mut(), migration, content, hash)
            .await;
        match outcome {
            Ok(()) => tx.commit().await,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(
                        "Rollback of migration {} failed: {}",
                        migration.name,
                        rollback_err
                    );
                }
                Err(err)
            }
        }
    }

    async fn execute_and_record<E>(
        &self,
        db: &mut E,
        migration: &MigrationFile,
        content: &str,
        hash: &str,
    ) -> MigrateResult<()>
    where
        E: DatabaseExecutor + ?Sized,
    {
        if !content.trim().is_empty() {
            db.execute_raw(content)
                .await
                .map_err(|e| MigrateError::execution(&migration.name, e))?;
        }
        self.ledger
            .append(db, migration.sequence_id, &migration.name, hash)
            .await
    }

    // Statements that succeeded stay applied when a later one fails.
    async fn apply_statements(
        &self,
        conn: &mut dyn DatabaseConnection,
        migration: &MigrationFile,
        content: &str,
        hash: &str,
    ) -> MigrateResult<()> {
        let statements = split_statements(content);
        tracing::debug!(
            "Running {} statements of {} without a transaction",
            statements.len(),
            migration.name
        );

        for (index, statement) in statements.iter().enumerate() {
            conn.execute_raw(statement).await.map_err(|e| {
                tracing::error!(
                    "Statement {} of {} failed; earlier statements remain applied",
                    index + 1,
                    migration.name
                );
                MigrateError::execution(&migration.name, e)
            })?;
        }

        self.ledger
            .append(conn, migration.sequence_id, &migration.name, hash)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::mock_connection::{MockDatabase, FAIL_MARKER};
    use std::path::PathBuf;

    fn migration(id: i64, name: &str) -> MigrationFile {
        MigrationFile {
            sequence_id: id,
            name: name.to_string(),
            path: PathBuf::from(name),
        }
    }

    #[test]
    fn test_execution_mode_marker() {
        assert_eq!(
            execution_mode("-- postgres-migrations disable-transaction\nCREATE INDEX CONCURRENTLY i ON t(x);"),
            ExecutionMode::NonTransactional
        );
        assert_eq!(
            execution_mode("\n\n   --postgres-migrations disable-transaction\nSELECT 1;"),
            ExecutionMode::NonTransactional
        );
        assert_eq!(
            execution_mode("-- Postgres-Migrations Disable-Transaction\nSELECT 1;"),
            ExecutionMode::Transactional
        );
        assert_eq!(
            execution_mode("SELECT 1;\n-- postgres-migrations disable-transaction\n"),
            ExecutionMode::Transactional
        );
        assert_eq!(execution_mode("CREATE TABLE t(x int);"), ExecutionMode::Transactional);
    }

    #[test]
    fn test_split_statements() {
        let content = "-- postgres-migrations disable-transaction\nCREATE TABLE a(x int);\n\nCREATE INDEX CONCURRENTLY a_x ON a(x);  \r\nSELECT 1; SELECT 2;\n";
        let statements = split_statements(content);
        assert_eq!(
            statements,
            vec![
                "-- postgres-migrations disable-transaction\nCREATE TABLE a(x int)",
                "CREATE INDEX CONCURRENTLY a_x ON a(x)",
                "SELECT 1; SELECT 2",
            ]
        );
    }

    #[tokio::test]
    async fn test_transactional_apply_records_in_same_transaction() {
        let db = MockDatabase::new();
        let mut conn = db.connect();
        let ledger = Ledger::new("migrations");
        ledger.ensure_schema(&mut conn).await.unwrap();

        let content = "CREATE TABLE t(x int);\n";
        let mode = MigrationExecutor::new(&ledger)
            .apply(&mut conn, &migration(1, "001-init.sql"), content)
            .await
            .unwrap();

        assert_eq!(mode, ExecutionMode::Transactional);
        assert_eq!(db.statements(), vec![content.to_string()]);
        assert_eq!(db.ledger_ids(), vec![1]);
        assert_eq!(
            ledger.record_hash(&mut conn, 1).await.unwrap(),
            hash_content(content)
        );
        assert_eq!(db.commits(), 1);
    }

    #[tokio::test]
    async fn test_transactional_failure_rolls_back() {
        let db = MockDatabase::new();
        let mut conn = db.connect();
        let ledger = Ledger::new("migrations");
        ledger.ensure_schema(&mut conn).await.unwrap();

        let content = format!("CREATE TABLE t(x int);\n{};\n", FAIL_MARKER);
        let err = MigrationExecutor::new(&ledger)
            .apply(&mut conn, &migration(1, "001-init.sql"), &content)
            .await
            .unwrap_err();

        assert!(matches!(err, MigrateError::ExecutionFailure { ref migration, .. } if migration == "001-init.sql"));
        assert!(db.statements().is_empty());
        assert!(db.ledger_ids().is_empty());
        assert_eq!(db.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_record_rolls_back_migration_sql() {
        let db = MockDatabase::new();
        let mut conn = db.connect();
        let ledger = Ledger::new("migrations");
        ledger.ensure_schema(&mut conn).await.unwrap();
        ledger.append(&mut conn, 1, "001-init.sql", "aa").await.unwrap();

        let err = MigrationExecutor::new(&ledger)
            .apply(&mut conn, &migration(1, "001-again.sql"), "CREATE TABLE u(y int);")
            .await
            .unwrap_err();

        assert!(matches!(err, MigrateError::DuplicateId { id: 1 }));
        assert!(db.statements().is_empty());
    }

    #[tokio::test]
    async fn test_non_transactional_partial_failure_keeps_earlier_statements() {
        let db = MockDatabase::new();
        let mut conn = db.connect();
        let ledger = Ledger::new("migrations");
        ledger.ensure_schema(&mut conn).await.unwrap();

        let content = format!(
            "-- postgres-migrations disable-transaction\nCREATE TABLE a(x int);\n{};\nCREATE TABLE b(y int);\n",
            FAIL_MARKER
        );
        let err = MigrationExecutor::new(&ledger)
            .apply(&mut conn, &migration(1, "001-concurrent.sql"), &content)
            .await
            .unwrap_err();

        assert!(matches!(err, MigrateError::ExecutionFailure { .. }));
        assert_eq!(
            db.statements(),
            vec!["-- postgres-migrations disable-transaction\nCREATE TABLE a(x int)".to_string()]
        );
        assert!(db.ledger_ids().is_empty());
        assert_eq!(db.transactions_begun(), 0);
    }

    #[tokio::test]
    async fn test_non_transactional_success_records_afterwards() {
        let db = MockDatabase::new();
        let mut conn = db.connect();
        let ledger = Ledger::new("migrations");
        ledger.ensure_schema(&mut conn).await.unwrap();

        let content = "-- postgres-migrations disable-transaction\nCREATE TABLE a(x int);\nCREATE INDEX CONCURRENTLY a_x ON a(x);\n";
        let mode = MigrationExecutor::new(&ledger)
            .apply(&mut conn, &migration(1, "001-index.sql"), content)
            .await
            .unwrap();

        assert_eq!(mode, ExecutionMode::NonTransactional);
        assert_eq!(db.statements().len(), 2);
        assert_eq!(db.ledger_ids(), vec![1]);
        assert_eq!(db.transactions_begun(), 0);
    }
}
