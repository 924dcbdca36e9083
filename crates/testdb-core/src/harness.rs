//! The capability set the engine consumes from the host test framework.

use futures::future::BoxFuture;

/// An owned teardown future registered with the harness. The harness drives
/// it after the test body finishes, most-recently-registered first.
pub type CleanupFuture = BoxFuture<'static, ()>;

/// The subset of a test framework's surface needed to provision a database
/// for one test.
///
/// Any host framework implementing this set plugs in; the library itself is
/// framework-agnostic. Implementations are expected to be cheap to clone
/// (a shared handle), since teardown hooks keep a copy.
pub trait TestHarness: Clone + Send + Sync + 'static {
    /// Registers a hook to run when the test completes. Hooks run in
    /// last-registered-first order.
    fn cleanup(&self, hook: CleanupFuture);

    /// Reports whether the test has failed. Consulted by teardown hooks to
    /// decide whether the instance database should be preserved.
    fn failed(&self) -> bool;

    /// Reports a fatal error and stops the test.
    ///
    /// Implementations are expected not to return (panic, or the host
    /// framework's equivalent). If an implementation does return, the
    /// library panics with the same message rather than continue with a
    /// half-provisioned database.
    fn fatal(&self, message: String);

    /// Logs a message to the test's output.
    fn log(&self, message: String);

    /// Marks the calling function as a helper, where the host framework
    /// supports the notion. The default does nothing.
    fn helper(&self) {}
}
