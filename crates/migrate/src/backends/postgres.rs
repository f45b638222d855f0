//! PostgreSQL Backend Implementation
//!
//! This module provides the PostgreSQL implementation of the backend traits
//! over a single `sqlx::PgConnection`. Advisory locks are session scoped, so
//! a pool would not do here: lock, ledger and migration statements must all
//! travel over the same session.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgRow};
use sqlx::{Column, Connection, Executor, PgConnection, Postgres, Row, TypeInfo, ValueRef};

use super::core::*;
use crate::error::{MigrateError, MigrateResult};

/// PostgreSQL session implementation
pub struct PostgresConnection {
    conn: PgConnection,
}

impl PostgresConnection {
    pub fn new(conn: PgConnection) -> Self {
        Self { conn }
    }

    /// Open a session from a connection string, or from the libpq-style
    /// `PG*` environment variables when none is given
    pub async fn connect(connection_string: Option<&str>) -> MigrateResult<Self> {
        let options = match connection_string {
            Some(url) => {
                validate_database_url(url)?;
                PgConnectOptions::from_str(url)?
            }
            None => PgConnectOptions::new(),
        };

        let conn = PgConnection::connect_with(&options)
            .await
            .map_err(|e| MigrateError::connection(format!("Failed to connect to database: {}", e)))?;

        tracing::debug!(
            "Database session opened (host: {}, database: {})",
            options.get_host(),
            options.get_database().unwrap_or("<default>")
        );
        Ok(Self::new(conn))
    }
}

fn validate_database_url(url: &str) -> MigrateResult<()> {
    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
        return Err(MigrateError::configuration(
            "Invalid PostgreSQL URL scheme, expected postgres:// or postgresql://",
        ));
    }
    Ok(())
}

#[async_trait]
impl DatabaseExecutor for PostgresConnection {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<u64> {
        execute_on(&mut self.conn, sql, params).await
    }

    async fn execute_raw(&mut self, sql: &str) -> MigrateResult<()> {
        execute_raw_on(&mut self.conn, sql).await
    }

    async fn fetch_all(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrateResult<Vec<Box<dyn DatabaseRow>>> {
        fetch_all_on(&mut self.conn, sql, params).await
    }

    async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrateResult<Option<Box<dyn DatabaseRow>>> {
        fetch_optional_on(&mut self.conn, sql, params).await
    }
}

#[async_trait]
impl DatabaseConnection for PostgresConnection {
    async fn begin_transaction<'a>(&'a mut self) -> MigrateResult<Box<dyn DatabaseTransaction + 'a>> {
        let tx = self.conn.begin().await?;
        Ok(Box::new(PostgresTransaction::new(tx)))
    }

    async fn close(self: Box<Self>) -> MigrateResult<()> {
        self.conn.close().await?;
        Ok(())
    }
}

/// PostgreSQL transaction implementation
pub struct PostgresTransaction<'c> {
    tx: sqlx::Transaction<'c, Postgres>,
}

impl<'c> PostgresTransaction<'c> {
    pub fn new(tx: sqlx::Transaction<'c, Postgres>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl<'c> DatabaseExecutor for PostgresTransaction<'c> {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrateResult<u64> {
        execute_on(&mut self.tx, sql, params).await
    }

    async fn execute_raw(&mut self, sql: &str) -> MigrateResult<()> {
        execute_raw_on(&mut self.tx, sql).await
    }

    async fn fetch_all(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrateResult<Vec<Box<dyn DatabaseRow>>> {
        fetch_all_on(&mut self.tx, sql, params).await
    }

    async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrateResult<Option<Box<dyn DatabaseRow>>> {
        fetch_optional_on(&mut self.tx, sql, params).await
    }
}

#[async_trait]
impl<'c> DatabaseTransaction for PostgresTransaction<'c> {
    async fn commit(self: Box<Self>) -> MigrateResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> MigrateResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

async fn execute_on(conn: &mut PgConnection, sql: &str, params: &[DatabaseValue]) -> MigrateResult<u64> {
    let mut query = sqlx::query(sql);
    for param in params {
        query = bind_database_value(query, param);
    }
    let result = query.execute(&mut *conn).await?;
    Ok(result.rows_affected())
}

// A plain &str goes over the simple query protocol, which accepts several
// statements in one round-trip.
async fn execute_raw_on(conn: &mut PgConnection, sql: &str) -> MigrateResult<()> {
    conn.execute(sql).await?;
    Ok(())
}

async fn fetch_all_on(
    conn: &mut PgConnection,
    sql: &str,
    params: &[DatabaseValue],
) -> MigrateResult<Vec<Box<dyn DatabaseRow>>> {
    let mut query = sqlx::query(sql);
    for param in params {
        query = bind_database_value(query, param);
    }
    let rows = query.fetch_all(&mut *conn).await?;
    Ok(rows
        .into_iter()
        .map(|row| Box::new(PostgresRow::new(row)) as Box<dyn DatabaseRow>)
        .collect())
}

async fn fetch_optional_on(
    conn: &mut PgConnection,
    sql: &str,
    params: &[DatabaseValue],
) -> MigrateResult<Option<Box<dyn DatabaseRow>>> {
    let mut query = sqlx::query(sql);
    for param in params {
        query = bind_database_value(query, param);
    }
    let row = query.fetch_optional(&mut *conn).await?;
    Ok(row.map(|r| Box::new(PostgresRow::new(r)) as Box<dyn DatabaseRow>))
}

/// Bind a DatabaseValue to a sqlx query
fn bind_database_value<'a>(
    query: sqlx::query::Query<'a, Postgres, sqlx::postgres::PgArguments>,
    value: &DatabaseValue,
) -> sqlx::query::Query<'a, Postgres, sqlx::postgres::PgArguments> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Timestamp(ts) => query.bind(*ts),
    }
}

/// PostgreSQL row implementation
pub struct PostgresRow {
    row: PgRow,
}

impl PostgresRow {
    pub fn new(row: PgRow) -> Self {
        Self { row }
    }
}

impl DatabaseRow for PostgresRow {
    fn get_by_name(&self, name: &str) -> MigrateResult<DatabaseValue> {
        let index = self
            .row
            .columns()
            .iter()
            .position(|col| col.name() == name)
            .ok_or_else(|| MigrateError::database(format!("Column '{}' not found", name)))?;

        postgres_value_to_database_value(&self.row, index)
    }
}

/// Convert a PostgreSQL column value to DatabaseValue
fn postgres_value_to_database_value(row: &PgRow, index: usize) -> MigrateResult<DatabaseValue> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(DatabaseValue::Null);
    }

    let type_name = row.columns()[index].type_info().name().to_string();
    let value = match type_name.as_str() {
        "BOOL" => DatabaseValue::Bool(row.try_get(index)?),
        "INT2" => DatabaseValue::Int64(row.try_get::<i16, _>(index)? as i64),
        "INT4" => DatabaseValue::Int64(row.try_get::<i32, _>(index)? as i64),
        "INT8" => DatabaseValue::Int64(row.try_get(index)?),
        "TIMESTAMP" => DatabaseValue::Timestamp(row.try_get(index)?),
        "TIMESTAMPTZ" => {
            let value: chrono::DateTime<chrono::Utc> = row.try_get(index)?;
            DatabaseValue::Timestamp(value.naive_utc())
        }
        _ => DatabaseValue::String(row.try_get(index).map_err(|e| {
            MigrateError::database(format!(
                "Failed to get value as string for type '{}': {}",
                type_name, e
            ))
        })?),
    };
    Ok(value)
}
