use sqlx::PgConnection;
use tracing::warn;

use crate::errors::LockError;


/// Session-scoped PostgreSQL advisory lock on a configured 64-bit key.
///
/// The lock serialises executors across processes: among N concurrent
/// engine instances, at most one proceeds past [`acquire`][Self::acquire];
/// the rest fail fast with [`LockError::Busy`]. The server releases the
/// lock automatically when the holding session terminates, so a crashed
/// executor cannot wedge the database.
pub struct AdvisoryLock {
    key: i64,
}

impl AdvisoryLock {
    #[inline]
    pub fn new(key: i64) -> Self {
        Self { key }
    }

    pub fn key(&self) -> i64 {
        self.key
    }

    /// Attempts to take the lock without waiting.
    pub async fn acquire(
        &self,
        database_connection: &mut PgConnection,
    ) -> Result<(), LockError> {
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(self.key)
            .fetch_one(database_connection)
            .await
            .map_err(|error| LockError::QueryFailed { error })?;

        if !acquired {
            return Err(LockError::Busy { lock_key: self.key });
        }

        Ok(())
    }

    /// Releases the lock. Called on every orchestrator exit path; if the
    /// session already lost the lock, that is logged rather than raised,
    /// since the caller is usually mid-teardown.
    pub async fn release(
        &self,
        database_connection: &mut PgConnection,
    ) -> Result<(), LockError> {
        let released: bool = sqlx::query_scalar("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .fetch_one(database_connection)
            .await
            .map_err(|error| LockError::QueryFailed { error })?;

        if !released {
            warn!(
                lock_key = self.key,
                "Advisory lock was not held at release time."
            );
        }

        Ok(())
    }
}
