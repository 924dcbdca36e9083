//! Core traits and types for testdb.
//!
//! This crate holds the backend-agnostic building blocks of the test-database
//! provisioner: the error taxonomy and multi-error joining, the
//! [`TestHarness`] capability set consumed from the host test framework,
//! keyed at-most-once initialization ([`OnceMap`] / [`OnceVar`]), and the
//! content hashing used to fingerprint migration inputs.
//!
//! [`TestHarness`]: harness::TestHarness
//! [`OnceMap`]: once::OnceMap
//! [`OnceVar`]: once::OnceVar

pub mod error;
pub mod harness;
pub mod hash;
pub mod once;
pub mod prelude;

pub use error::{join, BoxError, TestDbError, TestDbResult};
pub use prelude::*;
