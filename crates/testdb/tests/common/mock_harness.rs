//! A `TestHarness` implementation that records instead of aborting, so
//! tests can check whether a provisioning run "would have failed".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use testdb::{CleanupFuture, TestHarness};

#[derive(Clone, Default)]
pub struct MockHarness {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    failed: AtomicBool,
    fatals: Mutex<Vec<String>>,
    logs: Mutex<Vec<String>>,
    cleanups: Mutex<Vec<CleanupFuture>>,
}

impl MockHarness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drives the registered cleanup hooks, most recently registered first.
    pub async fn do_cleanup(&self) {
        loop {
            let hook = self.inner.cleanups.lock().unwrap().pop();
            match hook {
                Some(hook) => hook.await,
                None => break,
            }
        }
    }

    /// Marks the test as failed, as the host framework would after an
    /// assertion failure in the test body.
    pub fn mark_failed(&self) {
        self.inner.failed.store(true, Ordering::SeqCst);
    }

    pub fn fatal_messages(&self) -> Vec<String> {
        self.inner.fatals.lock().unwrap().clone()
    }

    pub fn log_messages(&self) -> Vec<String> {
        self.inner.logs.lock().unwrap().clone()
    }
}

impl TestHarness for MockHarness {
    fn cleanup(&self, hook: CleanupFuture) {
        self.inner.cleanups.lock().unwrap().push(hook);
    }

    fn failed(&self) -> bool {
        self.inner.failed.load(Ordering::SeqCst)
    }

    fn fatal(&self, message: String) {
        self.inner.failed.store(true, Ordering::SeqCst);
        self.inner.fatals.lock().unwrap().push(message);
    }

    fn log(&self, message: String) {
        self.inner.logs.lock().unwrap().push(message);
    }
}
