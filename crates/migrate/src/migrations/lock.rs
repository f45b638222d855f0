//! Advisory Lock - cross-process mutual exclusion for migration runs
//!
//! PostgreSQL session-level advisory locks keyed by a well-known integer. The
//! lock is cooperative: it only excludes processes that take the same key.

use std::time::Duration;

use crate::backends::{DatabaseConnection, DatabaseValue};
use crate::error::{MigrateError, MigrateResult};

/// Session-level advisory lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvisoryLock {
    key: i64,
}

impl AdvisoryLock {
    pub fn new(key: i64) -> Self {
        Self { key }
    }

    pub fn key(&self) -> i64 {
        self.key
    }

    /// Take the lock if nobody holds it, without waiting
    pub async fn try_acquire(&self, conn: &mut dyn DatabaseConnection) -> MigrateResult<bool> {
        let row = conn
            .fetch_one(
                "SELECT pg_try_advisory_lock($1) AS locked",
                &[DatabaseValue::from(self.key)],
            )
            .await?;
        let locked = row.get_by_name("locked")?.as_bool()?;
        tracing::debug!("Advisory lock {} try-acquire: {}", self.key, locked);
        Ok(locked)
    }

    /// Wait until the lock can be taken
    ///
    /// With `timeout` set, gives up with `LockTimeout`. The caller should
    /// drop the session afterwards: the abandoned request may still be
    /// granted server-side.
    pub async fn acquire(
        &self,
        conn: &mut dyn DatabaseConnection,
        timeout: Option<Duration>,
    ) -> MigrateResult<()> {
        let params = [DatabaseValue::from(self.key)];
        let wait = conn.execute("SELECT pg_advisory_lock($1)", &params);

        match timeout {
            None => {
                wait.await?;
            }
            Some(limit) => {
                tokio::time::timeout(limit, wait)
                    .await
                    .map_err(|_| MigrateError::LockTimeout {
                        lock_id: self.key,
                        seconds: limit.as_secs(),
                    })??;
            }
        }
        tracing::debug!("Advisory lock {} acquired", self.key);
        Ok(())
    }

    /// Release the lock; returns false when this session did not hold it
    pub async fn release(&self, conn: &mut dyn DatabaseConnection) -> MigrateResult<bool> {
        let row = conn
            .fetch_one(
                "SELECT pg_advisory_unlock($1) AS unlocked",
                &[DatabaseValue::from(self.key)],
            )
            .await?;
        let released = row.get_by_name("unlocked")?.as_bool()?;
        if !released {
            tracing::warn!("Advisory lock {} was not held by this session", self.key);
        }
        Ok(released)
    }
}
