//! Instance creation: cloning a template into a uniquely-named database for
//! one test, with teardown registered on the harness.

use rand::Rng;
use sqlx::{Connection, PgPool};
use tracing::{instrument, warn};

use testdb_core::{TestDbError, TestDbResult, TestHarness};

use crate::config::{Config, ConfigOption, Role};
use crate::migrator::Migrator;
use crate::template::{self, TemplateState};
use crate::role;

/// Connects to a postgres server, then creates and connects to a fresh
/// database instance for one test. The instance is prepared by
/// get-or-creating a template migrated by the given migrator and cloning
/// it. Safe to call from any number of tests in parallel.
///
/// On success, the connection string of the created database is logged
/// through the harness, so that a failing test leaves an artifact you can
/// connect to and inspect. On successful test completion the database is
/// dropped by the registered cleanup hook; a failed test keeps it.
///
/// Any provisioning error is reported through `harness.fatal`.
pub async fn new<H, M>(harness: &H, config: Config, migrator: &M) -> PgPool
where
    H: TestHarness,
    M: Migrator,
{
    harness.helper();
    match create(harness, config, migrator).await {
        Ok((_, pool)) => pool,
        Err(err) => fail(harness, err.to_string()),
    }
}

/// Like [`new`], but closes every connection opened during creation and
/// returns the configuration of the fresh instance, so the caller can
/// connect to it explicitly, potentially with a different client library,
/// without interference.
pub async fn custom<H, M>(harness: &H, config: Config, migrator: &M) -> Config
where
    H: TestHarness,
    M: Migrator,
{
    harness.helper();
    match create(harness, config, migrator).await {
        Ok((instance, pool)) => {
            pool.close().await;
            instance
        }
        Err(err) => fail(harness, err.to_string()),
    }
}

/// Convenience wrapper around [`new`] that parses the administrative
/// connection string and applies zero or more options, e.g.
/// [`with_test_role`](crate::config::with_test_role) or
/// [`with_force_terminate_connections`](crate::config::with_force_terminate_connections).
pub async fn new_from_url<H, M>(
    harness: &H,
    url: &str,
    migrator: &M,
    options: Vec<ConfigOption>,
) -> PgPool
where
    H: TestHarness,
    M: Migrator,
{
    harness.helper();
    let mut config = match Config::from_url(url) {
        Ok(config) => config,
        Err(err) => fail(harness, err.to_string()),
    };
    for option in options {
        option.apply(&mut config);
    }
    new(harness, config, migrator).await
}

fn fail<H: TestHarness>(harness: &H, message: String) -> ! {
    harness.fatal(message.clone());
    // Backstop for harnesses whose fatal() returns: never continue with a
    // half-provisioned database.
    panic!("{message}");
}

#[instrument(skip_all)]
async fn create<H, M>(
    harness: &H,
    mut config: Config,
    migrator: &M,
) -> TestDbResult<(Config, PgPool)>
where
    H: TestHarness,
    M: Migrator,
{
    let admin = config.connect().await?;

    let test_role = config.test_role.get_or_insert_with(Role::default).clone();
    role::ensure(&admin, &test_role).await?;

    let template = template::get_or_create(&admin, &config, &test_role, migrator).await?;
    let mut instance = create_instance(&admin, &template).await?;
    // The template config is shared by every test with the same fingerprint;
    // teardown behavior follows the calling test's own config.
    instance.force_terminate_connections = config.force_terminate_connections;
    harness.log(format!("testdbconf: {}", instance.url()));

    let pool = instance.connect().await?;
    admin.close().await;

    harness.cleanup(Box::pin(teardown(
        harness.clone(),
        config.clone(),
        instance.clone(),
        pool.clone(),
    )));

    // Even when the template already existed, verify the cloned instance so
    // any problem with the cached template surfaces here, at the call site,
    // rather than later in the test as unexpected database content.
    // Verification is assumed to be far cheaper than migrating.
    let mut conn = pool
        .acquire()
        .await
        .map_err(|source| TestDbError::Connect {
            database: instance.database.clone(),
            source: source.into(),
        })?;
    migrator
        .verify(&mut conn, &instance)
        .await
        .map_err(|source| TestDbError::Migrator {
            operation: "verify",
            database: instance.database.clone(),
            source,
        })?;
    drop(conn);

    Ok((instance, pool))
}

/// Clones the template into a new instance database.
async fn create_instance(admin: &PgPool, template: &TemplateState) -> TestDbResult<Config> {
    let mut instance = template.config.clone();
    instance.database = format!("testdb_tpl_{}_inst_{}", template.hash, random_suffix());
    sqlx::query(&format!(
        r#"CREATE DATABASE "{}" WITH TEMPLATE "{}" OWNER "{}""#,
        instance.database, template.config.database, instance.user
    ))
    .execute(admin)
    .await
    .map_err(|source| TestDbError::Instance {
        database: instance.database.clone(),
        template: template.config.database.clone(),
        source: source.into(),
    })?;
    Ok(instance)
}

/// 32 random bits, hex-encoded. Collisions within one template are unlikely
/// below ten thousand instances.
fn random_suffix() -> String {
    format!("{:08x}", rand::thread_rng().gen::<u32>())
}

/// Terminates every other backend connected to the named database.
const TERMINATE_CONNECTIONS_QUERY: &str = "\
SELECT pg_terminate_backend(pg_stat_activity.pid) \
FROM pg_stat_activity \
WHERE pg_stat_activity.datname = $1 AND pid <> pg_backend_pid()";

async fn teardown<H: TestHarness>(harness: H, admin_config: Config, instance: Config, pool: PgPool) {
    pool.close().await;

    // A failed test keeps its database around for investigation.
    if harness.failed() {
        return;
    }

    let mut admin = match admin_config.connect_single().await {
        Ok(conn) => conn,
        Err(err) => {
            harness.fatal(format!(
                "could not connect to drop test database \"{}\": {err}",
                instance.database
            ));
            return;
        }
    };

    if instance.force_terminate_connections {
        if let Err(err) = sqlx::query(TERMINATE_CONNECTIONS_QUERY)
            .bind(&instance.database)
            .execute(&mut admin)
            .await
        {
            warn!(database = %instance.database, error = %err, "failed to terminate leftover connections");
        }
    }

    let dropped = sqlx::query(&format!(
        r#"DROP DATABASE IF EXISTS "{}""#,
        instance.database
    ))
    .execute(&mut admin)
    .await;

    if let Err(err) = admin.close().await {
        warn!(database = %instance.database, error = %err, "failed to close administrative connection");
    }

    if let Err(source) = dropped {
        let err = TestDbError::Teardown {
            database: instance.database.clone(),
            source: source.into(),
        };
        warn!(database = %instance.database, error = %err, "teardown drop failed");
        if instance.force_terminate_connections {
            harness.fatal(err.to_string());
        } else {
            harness.fatal(format!(
                "{err}. The test may have leaked a connection to the database; \
                 set Config.force_terminate_connections (or pass \
                 with_force_terminate_connections() to new_from_url) to \
                 force-disconnect any remaining connections during cleanup."
            ));
        }
    }
}
