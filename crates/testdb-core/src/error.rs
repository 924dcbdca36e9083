//! Error types for test-database provisioning.

use std::sync::Arc;

use thiserror::Error;

/// Boxed source error, the shape most driver and migrator errors arrive in.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for test-database operations.
pub type TestDbResult<T> = Result<T, TestDbError>;

/// Errors that can occur while provisioning or tearing down test databases.
///
/// Every SQL failure is wrapped with the operation that was being attempted
/// and the database or role it was attempted on, so a failing test names the
/// exact step that broke.
#[derive(Debug, Error)]
pub enum TestDbError {
    /// The connection URL or configuration could not be understood.
    #[error("invalid connection string: {0}")]
    InvalidConfig(String),

    /// Could not connect to a database.
    #[error("failed to connect to database \"{database}\": {source}")]
    Connect {
        database: String,
        source: BoxError,
    },

    /// A role get-or-create step failed.
    #[error("failed to {operation} role \"{role}\": {source}")]
    Role {
        operation: &'static str,
        role: String,
        source: BoxError,
    },

    /// A template lifecycle step failed.
    #[error("failed to {operation} template \"{database}\": {source}")]
    Template {
        operation: &'static str,
        database: String,
        source: BoxError,
    },

    /// The migrator could not compute its schema hash.
    #[error("migrator failed to calculate hash: {source}")]
    MigratorHash { source: BoxError },

    /// A migrator hook failed. When `prepare` or `migrate` fails, the
    /// half-built template is left on the server so it can be inspected.
    #[error("migrator failed to {operation} \"{database}\": {source}")]
    Migrator {
        operation: &'static str,
        database: String,
        source: BoxError,
    },

    /// Cloning an instance from its template failed.
    #[error("failed to create instance \"{database}\" from template \"{template}\": {source}")]
    Instance {
        database: String,
        template: String,
        source: BoxError,
    },

    /// A session-lock step failed.
    #[error("sessionlock({name}) failed to {operation}: {source}")]
    SessionLock {
        name: String,
        operation: &'static str,
        source: BoxError,
    },

    /// Dropping a test database during cleanup failed.
    #[error("failed to drop test database \"{database}\": {source}")]
    Teardown {
        database: String,
        source: BoxError,
    },

    /// Reading migration inputs from disk failed.
    #[error("failed to read \"{path}\": {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// A failure that was produced once and is shared with every caller that
    /// asked for the same cached value.
    #[error("{0}")]
    Cached(Arc<TestDbError>),

    /// Multiple errors from independent exit paths, combined by [`join`].
    #[error("{}", format_joined(.0))]
    Joined(Vec<TestDbError>),
}

impl TestDbError {
    /// The leaf errors of this error: itself, unless it is a [`Joined`]
    /// container, in which case the leaves of each member.
    ///
    /// [`Joined`]: TestDbError::Joined
    pub fn leaves(&self) -> Vec<&TestDbError> {
        match self {
            TestDbError::Joined(errs) => errs.iter().flat_map(TestDbError::leaves).collect(),
            other => vec![other],
        }
    }
}

fn format_joined(errs: &[TestDbError]) -> String {
    errs.iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Combines multiple optional errors into a single error containing all of
/// their messages, separated by newlines. `None`s are excluded; nested
/// [`TestDbError::Joined`] containers are flattened. If everything is `None`
/// the result is `None`, and a single surviving error is returned as itself
/// rather than wrapped.
pub fn join<I>(errs: I) -> Option<TestDbError>
where
    I: IntoIterator<Item = Option<TestDbError>>,
{
    let mut flat = Vec::new();
    for err in errs.into_iter().flatten() {
        match err {
            TestDbError::Joined(inner) => flat.extend(inner),
            other => flat.push(other),
        }
    }
    match flat.len() {
        0 => None,
        1 => flat.pop(),
        _ => Some(TestDbError::Joined(flat)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(msg: &str) -> BoxError {
        msg.to_string().into()
    }

    #[test]
    fn join_of_nothing_is_none() {
        assert!(join([]).is_none());
        assert!(join([None]).is_none());
        assert!(join([None, None, None]).is_none());
    }

    #[test]
    fn join_with_nones_returns_the_error_unwrapped() {
        let err = TestDbError::InvalidConfig("example".into());
        let res = join([Some(err), None, None]).unwrap();
        assert!(matches!(res, TestDbError::InvalidConfig(_)));
        assert_eq!(res.to_string(), "invalid connection string: example");
    }

    #[test]
    fn join_two_errors_is_newline_separated() {
        let a = TestDbError::InvalidConfig("error a".into());
        let b = TestDbError::InvalidConfig("error b".into());
        let res = join([None, Some(a), None, Some(b), None]).unwrap();
        assert_eq!(
            res.to_string(),
            "invalid connection string: error a\ninvalid connection string: error b"
        );
        assert_eq!(res.leaves().len(), 2);
    }

    #[test]
    fn join_flattens_nested_joins() {
        let inner = join([
            Some(TestDbError::InvalidConfig("error a".into())),
            Some(TestDbError::InvalidConfig("error b".into())),
        ])
        .unwrap();
        let res = join([
            Some(inner),
            Some(TestDbError::Teardown {
                database: "db".into(),
                source: boxed("error c"),
            }),
        ])
        .unwrap();
        let leaves = res.leaves();
        assert_eq!(leaves.len(), 3);
        assert!(matches!(leaves[2], TestDbError::Teardown { .. }));
    }

    #[test]
    fn sql_context_appears_in_messages() {
        let err = TestDbError::Template {
            operation: "create",
            database: "testdb_tpl_abc".into(),
            source: boxed("permission denied"),
        };
        assert_eq!(
            err.to_string(),
            "failed to create template \"testdb_tpl_abc\": permission denied"
        );
    }
}
