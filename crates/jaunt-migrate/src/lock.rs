//! Cross-process mutual exclusion via a PostgreSQL session advisory lock.

use sqlx_core::pool::PoolConnection;
use sqlx_core::query_scalar::query_scalar;
use sqlx_postgres::{PgConnection, PgPool, Postgres};
use tracing::{debug, instrument, warn};

use crate::error::{MigrateError, Result};

/// An advisory lock held on a dedicated pooled connection.
///
/// The lock belongs to the database session, so everything done under it
/// should run on [`MigrationLock::connection`]. Call [`MigrationLock::release`]
/// when finished. If the guard is dropped instead, the connection is detached
/// from the pool and closed, which ends the session and frees the lock.
pub struct MigrationLock {
    conn: Option<PoolConnection<Postgres>>,
    key: i64,
}

impl MigrationLock {
    /// Tries to take the lock without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::ConcurrentRun`] if another session holds it.
    #[instrument(skip(pool))]
    pub async fn acquire(pool: &PgPool, key: i64) -> Result<Self> {
        let conn = pool.acquire().await?;
        Self::acquire_on(conn, key).await
    }

    /// Like [`MigrationLock::acquire`], but on a connection the caller already holds.
    #[instrument(skip(conn))]
    pub async fn acquire_on(mut conn: PoolConnection<Postgres>, key: i64) -> Result<Self> {
        let acquired: bool = query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut *conn)
            .await?;

        if !acquired {
            return Err(MigrateError::ConcurrentRun { key });
        }

        debug!("Advisory lock acquired");
        Ok(Self {
            conn: Some(conn),
            key,
        })
    }

    /// The advisory lock key.
    #[must_use]
    pub fn key(&self) -> i64 {
        self.key
    }

    /// The session that owns the lock.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::Config`] if the lock was already released.
    pub fn connection(&mut self) -> Result<&mut PgConnection> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| MigrateError::config("migration lock already released"))
    }

    /// Releases the lock and returns the connection to the pool.
    #[instrument(skip(self), fields(key = self.key))]
    pub async fn release(mut self) -> Result<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        let released: bool = match query_scalar("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .fetch_one(&mut *conn)
            .await
        {
            Ok(released) => released,
            Err(e) => {
                // Closing the session is the only other way to drop the lock.
                drop(conn.detach());
                return Err(e.into());
            }
        };

        if released {
            debug!("Advisory lock released");
        } else {
            warn!("Advisory lock was not held at release");
        }
        Ok(())
    }
}

impl Drop for MigrationLock {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!(
                key = self.key,
                "Migration lock dropped without release - closing its connection"
            );
            drop(conn.detach());
        }
    }
}
