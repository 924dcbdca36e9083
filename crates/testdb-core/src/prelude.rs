//! Convenience prelude for testdb core types.

pub use crate::error::{join, BoxError, TestDbError, TestDbResult};
pub use crate::harness::{CleanupFuture, TestHarness};
pub use crate::hash::{hash_dir, hash_files, RecursiveHash};
pub use crate::once::{OnceMap, OnceResult, OnceVar};
