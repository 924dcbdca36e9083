//! Template-database lifecycle: get-or-create keyed by the composite
//! fingerprint, with `datistemplate` as the durable commit marker.

use std::sync::{Arc, LazyLock};

use sqlx::{Connection, PgConnection, PgPool};
use tracing::{debug, instrument};

use testdb_core::{OnceMap, RecursiveHash, TestDbError, TestDbResult};

use crate::config::{Config, Role};
use crate::migrator::Migrator;
use crate::session_lock::{join_release, SessionLock};

/// The state of a single template: its fingerprint and the derived
/// connection config. Created lazily, then shared read-only for the
/// program's lifetime.
pub(crate) struct TemplateState {
    pub(crate) config: Config,
    pub(crate) hash: String,
}

/// Guarantees each template is get-or-created at most once per program, and
/// caches the first failure so a broken migrator reports once instead of
/// being retried by every parallel test.
static TEMPLATES: LazyLock<OnceMap<String, TemplateState, TestDbError>> =
    LazyLock::new(OnceMap::new);

/// Get-or-creates a template, synchronizing in-process through the template
/// map and across programs with a session lock named after the template
/// database.
#[instrument(skip_all)]
pub(crate) async fn get_or_create<M: Migrator>(
    pool: &PgPool,
    config: &Config,
    role: &Role,
    migrator: &M,
) -> TestDbResult<Arc<TemplateState>> {
    let migrator_hash = migrator
        .hash()
        .map_err(|source| TestDbError::MigratorHash { source })?;
    // The role details are folded in along with the migrator hash: tests
    // running in parallel with different role capabilities must each get
    // their own template, because privileges affect what a migrator can do.
    let hash = RecursiveHash::with_fields([
        ("Username", role.username.as_str()),
        ("Password", role.password.as_str()),
        ("Capabilities", role.capabilities.as_str()),
        ("MigratorHash", migrator_hash.as_str()),
    ])
    .finish();

    TEMPLATES
        .set(hash.clone(), || async move {
            let mut template_config = config.clone();
            template_config.user = role.username.clone();
            template_config.password = role.password.clone();
            template_config.database = format!("testdb_tpl_{hash}");
            let state = TemplateState {
                config: template_config,
                hash,
            };

            // The lock lives on the administrative connection, never on the
            // template itself, so migrations that take their own advisory
            // locks or run CREATE INDEX CONCURRENTLY cannot deadlock
            // against the coordinator.
            let mut lock = SessionLock::acquire(pool, &state.config.database).await?;
            let ensured = ensure_template(lock.conn(), migrator, &state).await;
            let release_err = lock.release().await;
            join_release(ensured, release_err)?;
            Ok(state)
        })
        .await
        .map_err(TestDbError::Cached)
}

/// Builds the template if no committed one exists.
///
/// `datistemplate` is the commit marker: it is not set until the database
/// has been created and fully migrated. A row carrying the template's name
/// with the marker unset is a leftover from an aborted prior run and is
/// dropped before rebuilding. This is what makes the lifecycle safe against
/// crashes at any point between creation and commit.
async fn ensure_template<M: Migrator>(
    conn: &mut PgConnection,
    migrator: &M,
    state: &TemplateState,
) -> TestDbResult<()> {
    let database = &state.config.database;

    let ready: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT FROM pg_database WHERE datname = $1 AND datistemplate = true)",
    )
    .bind(database)
    .fetch_one(&mut *conn)
    .await
    .map_err(|source| TestDbError::Template {
        operation: "check for",
        database: database.clone(),
        source: source.into(),
    })?;
    if ready {
        debug!(template = %database, "template already committed");
        return Ok(());
    }

    sqlx::query(&format!(r#"DROP DATABASE IF EXISTS "{database}""#))
        .execute(&mut *conn)
        .await
        .map_err(|source| TestDbError::Template {
            operation: "drop broken",
            database: database.clone(),
            source: source.into(),
        })?;

    sqlx::query(&format!(
        r#"CREATE DATABASE "{database}" OWNER "{}""#,
        state.config.user
    ))
    .execute(&mut *conn)
    .await
    .map_err(|source| TestDbError::Template {
        operation: "create",
        database: database.clone(),
        source: source.into(),
    })?;

    // The migrator gets its own session on the new template.
    let mut template_conn = state.config.connect_single().await?;
    let migrated = match migrator.prepare(&mut template_conn, &state.config).await {
        Err(source) => Err(TestDbError::Migrator {
            operation: "prepare",
            database: database.clone(),
            source,
        }),
        Ok(()) => migrator
            .migrate(&mut template_conn, &state.config)
            .await
            .map_err(|source| TestDbError::Migrator {
                operation: "migrate",
                database: database.clone(),
                source,
            }),
    };
    // Close the template-side session on every path: cloning with
    // CREATE DATABASE ... WITH TEMPLATE requires no active connections to
    // the source. A migrator failure leaves the half-built database in
    // place, marker unset, so the developer can connect and investigate;
    // the next run will drop and retry it.
    let closed = template_conn.close().await;
    migrated?;
    closed.map_err(|source| TestDbError::Template {
        operation: "close connection to",
        database: database.clone(),
        source: source.into(),
    })?;

    sqlx::query("UPDATE pg_database SET datistemplate = true WHERE datname = $1")
        .bind(database)
        .execute(&mut *conn)
        .await
        .map_err(|source| TestDbError::Template {
            operation: "confirm",
            database: database.clone(),
            source: source.into(),
        })?;
    debug!(template = %database, "template created and committed");
    Ok(())
}
