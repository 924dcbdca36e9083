//! Application-level distributed locks via session-scoped advisory locks.
//!
//! <https://www.postgresql.org/docs/current/explicit-locking.html#ADVISORY-LOCKS>

use sqlx::pool::PoolConnection;
use sqlx::{Connection, PgConnection, PgPool, Postgres};
use tracing::{instrument, warn};

use testdb_core::{join, TestDbError, TestDbResult};

/// Prepended to lock names when computing the integer lock id, to help
/// prevent collisions with other clients acquiring their own advisory locks.
pub const ID_PREFIX: &str = "sessionlock-";

/// Consistently hashes a lock name to an id usable with
/// `pg_advisory_lock()` / `pg_advisory_unlock()`. CRC32-IEEE, so any two
/// programs computing the same string produce the same id regardless of
/// language.
pub fn lock_id(name: &str) -> u32 {
    crc32fast::hash(format!("{ID_PREFIX}{name}").as_bytes())
}

/// A held session-scoped advisory lock, pinned to one physical connection
/// acquired from the pool.
///
/// Acquisition blocks until the lock is granted; the queueing is
/// intentional and no timeout is imposed. Call [`release`] to unlock; a
/// guard dropped without release closes its connection instead of returning
/// it to the pool, so the server-side session release applies.
///
/// [`release`]: SessionLock::release
pub struct SessionLock {
    conn: Option<PoolConnection<Postgres>>,
    id: u32,
    name: String,
}

impl SessionLock {
    /// Acquires a connection from the pool and takes the advisory lock named
    /// `name` on it, blocking until the lock is granted.
    #[instrument(skip(pool))]
    pub async fn acquire(pool: &PgPool, name: &str) -> TestDbResult<Self> {
        let id = lock_id(name);
        let mut conn = pool
            .acquire()
            .await
            .map_err(|source| TestDbError::SessionLock {
                name: name.to_string(),
                operation: "open conn",
                source: source.into(),
            })?;
        sqlx::query(&format!("SELECT pg_advisory_lock({id})"))
            .execute(&mut *conn)
            .await
            .map_err(|source| TestDbError::SessionLock {
                name: name.to_string(),
                operation: "lock",
                source: source.into(),
            })?;
        Ok(Self {
            conn: Some(conn),
            id,
            name: name.to_string(),
        })
    }

    /// The connection holding the lock. Work guarded by the lock must run on
    /// this connection; any other session would not see it.
    pub fn conn(&mut self) -> &mut PgConnection {
        self.conn
            .as_mut()
            .expect("session lock used after release")
    }

    /// Releases the lock and returns the connection to the pool.
    ///
    /// If the unlock statement fails, the connection is detached from the
    /// pool and closed: the server releases session-scoped locks with the
    /// session, and a possibly-lock-holding connection must never be handed
    /// back to the pool. Unlock and close errors are both reported.
    pub async fn release(mut self) -> Option<TestDbError> {
        let mut conn = self.conn.take()?;
        let unlock_err = sqlx::query(&format!("SELECT pg_advisory_unlock({})", self.id))
            .execute(&mut *conn)
            .await
            .err()
            .map(|source| TestDbError::SessionLock {
                name: self.name.clone(),
                operation: "unlock",
                source: source.into(),
            });
        if unlock_err.is_none() {
            return None;
        }
        let close_err = conn
            .detach()
            .close()
            .await
            .err()
            .map(|source| TestDbError::SessionLock {
                name: self.name.clone(),
                operation: "close conn",
                source: source.into(),
            });
        join([unlock_err, close_err])
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!(lock = %self.name, "session lock dropped without release; closing its connection");
            drop(conn.detach());
        }
    }
}

/// Combines the outcome of lock-guarded work with the outcome of releasing
/// the lock: release errors never mask a primary error, and are never
/// silently discarded either.
pub(crate) fn join_release<T>(
    result: TestDbResult<T>,
    release_err: Option<TestDbError>,
) -> TestDbResult<T> {
    match (result, release_err) {
        (result, None) => result,
        (Ok(_), Some(release)) => Err(release),
        (Err(primary), release) => {
            Err(join([Some(primary), release]).expect("joining a present error is an error"))
        }
    }
}
