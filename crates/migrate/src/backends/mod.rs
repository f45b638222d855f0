//! Database Backends
//!
//! Backend traits used by the migration components, and the PostgreSQL
//! implementation built on sqlx.

pub mod core;
pub mod postgres;

pub use self::core::{
    DatabaseConnection, DatabaseExecutor, DatabaseRow, DatabaseTransaction, DatabaseValue,
};
pub use self::postgres::{PostgresConnection, PostgresRow, PostgresTransaction};
