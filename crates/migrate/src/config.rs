//! Migration configuration
//!
//! Defaults match what cooperating deploy processes expect out of the box.
//! Every field can be overridden from the environment, and callers such as
//! the CLI layer their own arguments on top.

use std::path::PathBuf;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{MigrateError, MigrateResult};

/// Advisory lock key shared by every cooperating process
pub const DEFAULT_LOCK_ID: i64 = 765432;
pub const DEFAULT_MIGRATION_DIR: &str = "./migrations";
pub const DEFAULT_INCLUDES: &str = "**/*.sql";
pub const DEFAULT_LEDGER_TABLE: &str = "migrations";

pub const MIGRATION_DIR_ENV: &str = "SEQUENT_MIGRATION_DIR";
pub const INCLUDES_ENV: &str = "SEQUENT_INCLUDES";
pub const LEDGER_TABLE_ENV: &str = "SEQUENT_LEDGER_TABLE";
pub const LOCK_ID_ENV: &str = "SEQUENT_LOCK_ID";
pub const STRICT_ENV: &str = "SEQUENT_STRICT";
pub const LOCK_TIMEOUT_ENV: &str = "SEQUENT_LOCK_TIMEOUT_SECS";

static TABLE_IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
        .expect("table identifier pattern is valid")
});

/// Configuration for a migration run
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationConfig {
    /// Directory holding the migration files
    pub migration_dir: PathBuf,
    /// Glob pattern, relative to `migration_dir`, selecting migration files
    pub includes: String,
    /// Table recording applied migrations
    pub ledger_table: String,
    /// Advisory lock key
    pub lock_id: i64,
    /// Reject files that reuse the previous file's sequence number
    pub strict_sequence: bool,
    /// Upper bound on waiting for another process's lock; `None` waits forever
    pub lock_timeout: Option<Duration>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            migration_dir: PathBuf::from(DEFAULT_MIGRATION_DIR),
            includes: DEFAULT_INCLUDES.to_string(),
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
            lock_id: DEFAULT_LOCK_ID,
            strict_sequence: false,
            lock_timeout: None,
        }
    }
}

impl MigrationConfig {
    /// Defaults overridden by any `SEQUENT_*` environment variables that are set
    pub fn from_env() -> MigrateResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`MigrationConfig::from_env`] with an explicit variable source
    pub fn from_lookup<F>(lookup: F) -> MigrateResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup(MIGRATION_DIR_ENV) {
            config.migration_dir = PathBuf::from(dir);
        }
        if let Some(includes) = lookup(INCLUDES_ENV) {
            config.includes = includes;
        }
        if let Some(table) = lookup(LEDGER_TABLE_ENV) {
            config.ledger_table = table;
        }
        if let Some(raw) = lookup(LOCK_ID_ENV) {
            config.lock_id = raw.trim().parse().map_err(|_| {
                MigrateError::configuration(format!(
                    "{} must be a 64-bit integer, got '{}'",
                    LOCK_ID_ENV, raw
                ))
            })?;
        }
        if let Some(raw) = lookup(STRICT_ENV) {
            config.strict_sequence = parse_flag(STRICT_ENV, &raw)?;
        }
        if let Some(raw) = lookup(LOCK_TIMEOUT_ENV) {
            let seconds: u64 = raw.trim().parse().map_err(|_| {
                MigrateError::configuration(format!(
                    "{} must be a whole number of seconds, got '{}'",
                    LOCK_TIMEOUT_ENV, raw
                ))
            })?;
            config.lock_timeout = Some(Duration::from_secs(seconds));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_migration_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migration_dir = dir.into();
        self
    }

    pub fn with_includes(mut self, includes: impl Into<String>) -> Self {
        self.includes = includes.into();
        self
    }

    pub fn with_ledger_table(mut self, table: impl Into<String>) -> Self {
        self.ledger_table = table.into();
        self
    }

    pub fn with_lock_id(mut self, lock_id: i64) -> Self {
        self.lock_id = lock_id;
        self
    }

    pub fn with_strict_sequence(mut self, strict: bool) -> Self {
        self.strict_sequence = strict;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Check the values that end up interpolated into SQL or glob patterns
    pub fn validate(&self) -> MigrateResult<()> {
        if self.includes.trim().is_empty() {
            return Err(MigrateError::configuration("Include pattern must not be empty"));
        }
        if !TABLE_IDENTIFIER.is_match(&self.ledger_table) {
            return Err(MigrateError::configuration(format!(
                "Invalid ledger table name '{}'",
                self.ledger_table
            )));
        }
        Ok(())
    }
}

fn parse_flag(name: &str, raw: &str) -> MigrateResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(MigrateError::configuration(format!(
            "{} must be a boolean, got '{}'",
            name, raw
        ))),
    }
}
