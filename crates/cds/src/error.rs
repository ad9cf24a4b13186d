//! Error types for the critical data store.

use std::io;

use snafu::Snafu;

/// Result type alias for CDS operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during CDS operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// I/O error from the underlying backend.
    #[snafu(display("I/O error: {source}"))]
    Io {
        /// The underlying I/O error.
        source: io::Error,
    },

    /// Access beyond the end of the backing image.
    #[snafu(display("Access of {len} bytes at {offset} exceeds capacity {capacity}"))]
    OutOfBounds {
        /// Start of the access.
        offset: u64,
        /// Length of the access.
        len: usize,
        /// Size of the backing image.
        capacity: u64,
    },

    /// The image header is malformed or fails its checksum.
    #[snafu(display("Corrupted CDS image: {reason}"))]
    Corrupted {
        /// Description of what was corrupted.
        reason: String,
    },

    /// The image was written by something other than this store.
    #[snafu(display("Invalid CDS magic number"))]
    InvalidMagic,

    /// Block name empty or longer than the directory field.
    #[snafu(display("Invalid block name: {name:?}"))]
    InvalidName {
        /// The rejected name.
        name: String,
    },

    /// Zero-sized block requested.
    #[snafu(display("Invalid block size for {name}: {size}"))]
    InvalidSize {
        /// Block name.
        name: String,
        /// Requested size.
        size: usize,
    },

    /// Every directory slot is in use.
    #[snafu(display("CDS directory full ({max_blocks} blocks)"))]
    DirectoryFull {
        /// Directory capacity.
        max_blocks: usize,
    },

    /// No contiguous data region is large enough.
    #[snafu(display("Out of CDS space: {size} bytes requested"))]
    OutOfSpace {
        /// Requested size.
        size: usize,
    },

    /// The handle does not name a live block.
    #[snafu(display("Invalid CDS handle {handle}"))]
    InvalidHandle {
        /// The raw handle value.
        handle: u32,
    },

    /// The caller's buffer does not match the block size.
    #[snafu(display("Size mismatch for block {name}: block is {expected} bytes, buffer is {actual}"))]
    SizeMismatch {
        /// Block name.
        name: String,
        /// Registered size.
        expected: usize,
        /// Caller's buffer size.
        actual: usize,
    },

    /// Block contents fail their checksum.
    #[snafu(display("Block {name} checksum mismatch"))]
    BlockChecksumMismatch {
        /// Block name.
        name: String,
    },

    /// No block of that name exists.
    #[snafu(display("Block {name} not found"))]
    NotFound {
        /// Block name.
        name: String,
    },

    /// The block exists but is not of the requested kind.
    #[snafu(display("Block {name} is not a {expected}"))]
    WrongType {
        /// Block name.
        name: String,
        /// The kind the caller asked for.
        expected: &'static str,
    },
}

impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        Error::Io { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_io() {
        let err = Error::from(io::Error::new(io::ErrorKind::NotFound, "missing"));
        assert!(format!("{err}").starts_with("I/O error:"));
    }

    #[test]
    fn test_error_display_out_of_bounds() {
        let err = Error::OutOfBounds { offset: 100, len: 8, capacity: 104 };
        assert_eq!(format!("{err}"), "Access of 8 bytes at 100 exceeds capacity 104");
    }

    #[test]
    fn test_error_display_wrong_type() {
        let err = Error::WrongType { name: "APP.Data".to_string(), expected: "table" };
        assert_eq!(format!("{err}"), "Block APP.Data is not a table");
    }

    #[test]
    fn test_error_display_checksum() {
        let err = Error::BlockChecksumMismatch { name: "CDS_Registry".to_string() };
        assert_eq!(format!("{err}"), "Block CDS_Registry checksum mismatch");
    }
}
