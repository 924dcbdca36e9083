//! The capability set consumed from a caller-supplied migration tool.

use futures::future::BoxFuture;
use sqlx::PgConnection;

use testdb_core::BoxError;

use crate::config::Config;

/// A migrator provisions and verifies the database used as a template for
/// each test.
pub trait Migrator: Send + Sync {
    /// Returns a unique identifier derived from the state of the database
    /// after it has been fully migrated, for instance a hash of all
    /// migration names and contents. Must be deterministic and pure.
    ///
    /// The returned hash identifies a template database. If a migrator
    /// returns a hash that has already been used to create a template, the
    /// template is not recreated, since migrating again would produce the
    /// same schema and data. That equivalence is the entire caching premise.
    fn hash(&self) -> Result<String, BoxError>;

    /// Performs the schema and data migrations that provision a template
    /// database. The connection is to an entirely new, empty database.
    /// Called at most once per template.
    fn migrate<'a>(
        &'a self,
        conn: &'a mut PgConnection,
        config: &'a Config,
    ) -> BoxFuture<'a, Result<(), BoxError>>;

    /// Performs any plugin or extension installation necessary to make the
    /// database ready for the migrations, such as enabling extensions like
    /// `trigram` or `pgcrypto`, creating or altering roles and permissions.
    /// Runs before [`migrate`](Migrator::migrate) on the same template
    /// connection. The default does nothing.
    fn prepare<'a>(
        &'a self,
        _conn: &'a mut PgConnection,
        _config: &'a Config,
    ) -> BoxFuture<'a, Result<(), BoxError>> {
        Box::pin(async { Ok(()) })
    }

    /// Called each time a new test database instance is requested, with a
    /// connection to the cloned instance. Returns `Ok` iff the database is
    /// in the expected state; an implementation might check that every known
    /// migration is marked as applied. Must be strictly cheaper than
    /// [`migrate`](Migrator::migrate), since it runs on every test. The
    /// default does nothing.
    fn verify<'a>(
        &'a self,
        _conn: &'a mut PgConnection,
        _config: &'a Config,
    ) -> BoxFuture<'a, Result<(), BoxError>> {
        Box::pin(async { Ok(()) })
    }
}

/// A [`Migrator`] that does absolutely nothing. Use it to get empty
/// databases in your tests, or to try out the library before picking a real
/// migrator.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMigrator;

impl Migrator for NoopMigrator {
    fn hash(&self) -> Result<String, BoxError> {
        Ok("noop".to_string())
    }

    fn migrate<'a>(
        &'a self,
        _conn: &'a mut PgConnection,
        _config: &'a Config,
    ) -> BoxFuture<'a, Result<(), BoxError>> {
        Box::pin(async { Ok(()) })
    }
}
