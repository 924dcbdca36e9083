//! Get-or-create of the role that owns templates and instances.

use std::sync::LazyLock;

use sqlx::{PgConnection, PgPool};
use tracing::instrument;

use testdb_core::{OnceMap, TestDbError, TestDbResult};

use crate::config::Role;
use crate::session_lock::{join_release, SessionLock};

/// Guarantees that each role is get-or-created at most once per program.
/// Different calls can specify different roles; each is created only once no
/// matter how many programs or test suites run at once, thanks to the
/// session lock held while creating.
static ROLES: LazyLock<OnceMap<String, (), TestDbError>> = LazyLock::new(OnceMap::new);

#[instrument(skip(pool, role), fields(role = %role.username))]
pub(crate) async fn ensure(pool: &PgPool, role: &Role) -> TestDbResult<()> {
    ROLES
        .set(role.username.clone(), || async move {
            let mut lock = SessionLock::acquire(pool, &role.username).await?;
            let created = create_if_missing(lock.conn(), role).await;
            let release_err = lock.release().await;
            join_release(created, release_err)
        })
        .await
        .map(|_| ())
        .map_err(TestDbError::Cached)
}

async fn create_if_missing(conn: &mut PgConnection, role: &Role) -> TestDbResult<()> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT FROM pg_catalog.pg_roles WHERE rolname = $1)")
            .bind(&role.username)
            .fetch_one(&mut *conn)
            .await
            .map_err(|source| TestDbError::Role {
                operation: "check for",
                role: role.username.clone(),
                source: source.into(),
            })?;
    if exists {
        return Ok(());
    }

    sqlx::query(&format!(r#"CREATE ROLE "{}""#, role.username))
        .execute(&mut *conn)
        .await
        .map_err(|source| TestDbError::Role {
            operation: "create",
            role: role.username.clone(),
            source: source.into(),
        })?;

    // Capability strings are not parameterizable; splitting this from CREATE
    // ROLE keeps the password the only secret-bearing interpolation.
    sqlx::query(&format!(
        r#"ALTER ROLE "{}" WITH LOGIN PASSWORD '{}' {}"#,
        role.username, role.password, role.capabilities
    ))
    .execute(&mut *conn)
    .await
    .map_err(|source| TestDbError::Role {
        operation: "set password and capabilities for",
        role: role.username.clone(),
        source: source.into(),
    })?;
    Ok(())
}
