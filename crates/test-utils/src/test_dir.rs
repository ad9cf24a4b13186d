//! Temporary directory management for tests.
//!
//! [`TestDir`] wraps [`tempfile::TempDir`] with the path helpers the table
//! load and dump tests use.

// Test utilities are expected to panic on failure - that's their purpose
#![allow(clippy::expect_used)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A managed temporary directory for tests.
///
/// The directory is automatically cleaned up when this struct is dropped.
///
/// # Example
///
/// ```
/// use flight_tables_test_utils::TestDir;
///
/// let dir = TestDir::new();
/// let image = dir.join("table.tbl");
/// let dump = dir.path_string("dump.tbl");
/// # let _ = (image, dump);
/// ```
pub struct TestDir {
    inner: TempDir,
}

impl TestDir {
    /// Create a new temporary directory.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        let inner = TempDir::new().expect("failed to create temp directory");
        Self { inner }
    }

    /// Returns the path to the temporary directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Join a relative path to the temporary directory.
    #[must_use]
    pub fn join<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.inner.path().join(path)
    }

    /// Joined path as a `String`, the form table services takes file names in.
    #[must_use]
    pub fn path_string<P: AsRef<Path>>(&self, path: P) -> String {
        self.join(path).display().to_string()
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}
