//! Byte-addressable backends for the critical data store.
//!
//! A backend is a fixed-capacity image addressed by byte offset. The file
//! backend persists it across process restarts; the in-memory backend keeps it
//! in a shared buffer so a test can drop every store built on it and open a new
//! one over the same bytes, which is how a processor reset is simulated.

mod file;
mod memory;

pub use file::FileBackend;
pub use memory::InMemoryBackend;

use crate::error::{Error, Result};

/// Backend trait for abstracting CDS image I/O.
pub trait CdsBackend: Send + Sync {
    /// Reads `buf.len()` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `Error::OutOfBounds` if the range exceeds the capacity and
    /// `Error::Io` if the read fails.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Writes `data` at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `Error::OutOfBounds` if the range exceeds the capacity and
    /// `Error::Io` if the write fails.
    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Flushes writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the sync fails.
    fn sync(&self) -> Result<()>;

    /// Size of the image in bytes.
    fn capacity(&self) -> u64;
}

/// Rejects accesses that run past the end of the image.
pub(crate) fn check_bounds(offset: u64, len: usize, capacity: u64) -> Result<()> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(Error::OutOfBounds { offset, len, capacity }),
    }
}
