//! Error types for the migration system
//!
//! Every failure aborts the run it happens in. The coordinator releases the
//! advisory lock before the error reaches the caller.

use thiserror::Error;

/// SQLSTATE for `unique_violation`
pub const UNIQUE_VIOLATION: &str = "23505";

/// Result type alias for migration operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Error types for migration operations
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("Migration file names must start with their simple sequence number. Not '{file}'")]
    InvalidFileName { file: String },

    #[error("Migration file names must be sequential. Missing {missing}")]
    SequenceGap { missing: i64 },

    #[error("Migration files should be immutable, they should not change. '{file}' has changed.")]
    ImmutabilityViolation { file: String },

    #[error("Duplicate migration sequence number {id}: '{file}' reuses it")]
    DuplicateSequenceId { id: i64, file: String },

    #[error("No ledger record found for migration {id}")]
    RecordNotFound { id: i64 },

    #[error("A ledger record with id {id} already exists")]
    DuplicateId { id: i64 },

    #[error("A ledger record named '{name}' already exists")]
    DuplicateName { name: String },

    #[error("Migration '{migration}' failed: {message}")]
    ExecutionFailure { migration: String, message: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        code: Option<String>,
        constraint: Option<String>,
    },

    #[error("Connection error: {message}")]
    Connection { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Timed out after {seconds}s waiting for migration lock {lock_id}")]
    LockTimeout { lock_id: i64, seconds: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid include pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

impl MigrateError {
    /// Create a new database error without SQLSTATE details
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            code: None,
            constraint: None,
        }
    }

    /// Create a new configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Wrap a failure of a migration's own SQL
    pub fn execution(migration: impl Into<String>, source: MigrateError) -> Self {
        let message = match source {
            MigrateError::Database { message, .. } => message,
            other => other.to_string(),
        };
        Self::ExecutionFailure {
            migration: migration.into(),
            message,
        }
    }

    /// Whether this is a unique constraint violation reported by the database
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, MigrateError::Database { code: Some(code), .. } if code == UNIQUE_VIOLATION)
    }

    /// Constraint name reported with a database error, if any
    pub fn constraint(&self) -> Option<&str> {
        match self {
            MigrateError::Database { constraint, .. } => constraint.as_deref(),
            _ => None,
        }
    }
}

// Keep SQLSTATE and constraint so the ledger can classify unique violations
impl From<sqlx::Error> for MigrateError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => MigrateError::Database {
                message: db_err.message().to_string(),
                code: db_err.code().map(|code| code.into_owned()),
                constraint: db_err.constraint().map(str::to_string),
            },
            sqlx::Error::Io(e) => MigrateError::Connection {
                message: e.to_string(),
            },
            sqlx::Error::Tls(e) => MigrateError::Connection {
                message: e.to_string(),
            },
            sqlx::Error::Configuration(e) => MigrateError::Configuration {
                message: e.to_string(),
            },
            other => MigrateError::database(other.to_string()),
        }
    }
}
