//! Ledger - the table recording applied migrations
//!
//! One row per applied migration: its sequence number, file name and content
//! digest. The highest id is the watermark. Rows are written in the same
//! transaction as the migration they record whenever the migration runs
//! transactionally.

use crate::backends::{DatabaseExecutor, DatabaseValue};
use crate::error::{MigrateError, MigrateResult};

use super::definitions::LedgerRecord;

/// Access to the ledger table
#[derive(Debug, Clone)]
pub struct Ledger {
    table: String,
}

impl Ledger {
    /// Ledger stored in `table`; the name must already be validated
    pub fn new(table: impl Into<String>) -> Self {
        Self { table: table.into() }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the table if it is absent; never alters an existing one
    pub async fn ensure_schema<E>(&self, db: &mut E) -> MigrateResult<()>
    where
        E: DatabaseExecutor + ?Sized,
    {
        db.execute_raw(&self.create_table_sql()).await
    }

    /// Whether the ledger table exists, without creating it
    pub async fn exists<E>(&self, db: &mut E) -> MigrateResult<bool>
    where
        E: DatabaseExecutor + ?Sized,
    {
        let row = db
            .fetch_one(
                "SELECT to_regclass($1) IS NOT NULL AS present",
                &[DatabaseValue::from(self.table.as_str())],
            )
            .await?;
        row.get_by_name("present")?.as_bool()
    }

    /// Highest applied id, or 0 when nothing has been applied
    pub async fn watermark<E>(&self, db: &mut E) -> MigrateResult<i64>
    where
        E: DatabaseExecutor + ?Sized,
    {
        let row = db.fetch_one(&self.watermark_sql(), &[]).await?;
        row.get_by_name("last")?.as_i64()
    }

    /// Digest recorded for migration `id`
    pub async fn record_hash<E>(&self, db: &mut E, id: i64) -> MigrateResult<String>
    where
        E: DatabaseExecutor + ?Sized,
    {
        let row = db
            .fetch_optional(
                &format!("SELECT hash FROM {} WHERE id = $1", self.table),
                &[DatabaseValue::from(id)],
            )
            .await?
            .ok_or(MigrateError::RecordNotFound { id })?;
        row.get_by_name("hash")?.into_string()
    }

    /// Record migration `id` as applied
    pub async fn append<E>(&self, db: &mut E, id: i64, name: &str, hash: &str) -> MigrateResult<()>
    where
        E: DatabaseExecutor + ?Sized,
    {
        let result = db
            .execute(
                &format!("INSERT INTO {} (id, name, hash) VALUES ($1, $2, $3)", self.table),
                &[
                    DatabaseValue::from(id),
                    DatabaseValue::from(name),
                    DatabaseValue::from(hash),
                ],
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if err.is_unique_violation() => {
                if err.constraint().map_or(false, |c| c.ends_with("_pkey")) {
                    Err(MigrateError::DuplicateId { id })
                } else {
                    Err(MigrateError::DuplicateName {
                        name: name.to_string(),
                    })
                }
            }
            Err(err) => Err(err),
        }
    }

    /// All records ordered by id
    pub async fn records<E>(&self, db: &mut E) -> MigrateResult<Vec<LedgerRecord>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        let rows = db
            .fetch_all(
                &format!(
                    "SELECT id::BIGINT AS id, name, hash, executed_at FROM {} ORDER BY id",
                    self.table
                ),
                &[],
            )
            .await?;

        rows.into_iter()
            .map(|row| {
                Ok(LedgerRecord {
                    id: row.get_by_name("id")?.as_i64()?,
                    name: row.get_by_name("name")?.into_string()?,
                    hash: row.get_by_name("hash")?.into_string()?,
                    executed_at: row.get_by_name("executed_at")?.as_timestamp()?,
                })
            })
            .collect()
    }

    pub fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                id INTEGER PRIMARY KEY,\n    \
                name VARCHAR(255) UNIQUE NOT NULL,\n    \
                hash VARCHAR(64) NOT NULL,\n    \
                executed_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP\n\
            )",
            self.table
        )
    }

    fn watermark_sql(&self) -> String {
        format!("SELECT COALESCE(MAX(id), 0)::BIGINT AS last FROM {}", self.table)
    }
}
