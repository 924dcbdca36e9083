//! PostgreSQL engine for testdb.
//!
//! Provisions isolated, fully-migrated PostgreSQL databases for test cases.
//! Each test gets a fresh, uniquely-named database cloned from a cached
//! template with `CREATE DATABASE ... WITH TEMPLATE`, so the per-test cost
//! is a file-level copy rather than a migration run. Templates are prepared
//! at most once per schema fingerprint: per process through in-memory
//! memoization, and across processes through session-scoped advisory locks
//! with `pg_database.datistemplate` as the durable commit marker.

pub mod config;
pub mod instance;
pub mod migrator;
pub mod session_lock;

mod role;
mod template;

pub use config::{
    with_force_terminate_connections, with_test_role, Config, ConfigOption, Role,
    DEFAULT_ROLE_CAPABILITIES, DEFAULT_ROLE_PASSWORD, DEFAULT_ROLE_USERNAME,
};
pub use instance::{custom, new, new_from_url};
pub use migrator::{Migrator, NoopMigrator};
pub use session_lock::{lock_id, SessionLock};
