// crates/test-utils/src/lib.rs

//! Shared helpers for `cmdq` integration tests.

pub mod builders;

pub use builders::QueueBuilder;

/// A temp directory suitable as a queue `dpath`. Keep the guard alive for
/// the duration of the test; the directory is removed on drop.
pub fn temp_dpath() -> tempfile::TempDir {
    tempfile::tempdir().expect("creating temp dpath")
}
