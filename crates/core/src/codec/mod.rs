//! Encoding layer between table files and in-memory table contents.
//!
//! The core never interprets payload bytes. A [`TableCodec`] decides how the
//! table-specific file header is laid out and how the payload maps onto the
//! in-memory buffer. Two implementations ship:
//!
//! - [`PassThroughCodec`] copies bytes unchanged; file header fields are big-endian.
//! - [`SchemaCodec`] packs declared fields big-endian on disk and unpacks them
//!   to native layout in memory.

use std::io::Read;

use crate::error::{FileTooLargeSnafu, Info, Result};

mod passthrough;
mod schema;

pub use passthrough::PassThroughCodec;
pub use schema::{FieldKind, FieldSpec, SchemaCodec, TableSchema};

/// Decoded table-specific file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadHeader {
    /// Qualified name of the target table.
    pub table_name: String,
    /// Byte offset, in encoded space, of the payload.
    pub offset: u32,
    /// Payload length in bytes, in encoded space.
    pub num_bytes: u32,
}

impl LoadHeader {
    /// End of the payload in encoded space.
    pub fn end(&self) -> u64 {
        u64::from(self.offset) + u64::from(self.num_bytes)
    }
}

/// Contract between the core and an encoding implementation.
pub trait TableCodec: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Checks a registration request. Called before any state changes.
    fn validate_config(&self, table: &str, size: usize) -> Result<()>;

    /// Size of the encoded form of a table of in-memory `size` bytes.
    fn encoded_size(&self, table: &str, size: usize) -> usize;

    /// Rejects payloads that would extend past the encoded table.
    fn validate_load_size(&self, header: &LoadHeader, encoded_size: usize) -> Result<()> {
        if header.end() > encoded_size as u64 {
            return FileTooLargeSnafu {
                table: header.table_name.clone(),
                reason: format!(
                    "offset {} + {} bytes exceeds table size {encoded_size}",
                    header.offset, header.num_bytes
                ),
            }
            .fail();
        }
        Ok(())
    }

    /// Classifies a completed load.
    fn final_status(&self, header: &LoadHeader, encoded_size: usize) -> Info {
        if header.offset != 0 {
            Info::WarnPartialLoad
        } else if header.end() < encoded_size as u64 {
            Info::WarnShortFile
        } else {
            Info::Success
        }
    }

    /// Reads the table-specific header that follows the standard file header.
    fn decode_header(&self, reader: &mut dyn Read, path: &str) -> Result<LoadHeader>;

    /// Produces the table-specific header for a dump file.
    fn encode_header(&self, table: &str, offset: u32, num_bytes: u32) -> Vec<u8>;

    /// Converts a complete encoded table `src` into in-memory contents `dst`.
    fn decode_input(&self, table: &str, src: &[u8], dst: &mut [u8]) -> Result<()>;

    /// Converts in-memory contents `src` into encoded form in `dst`.
    ///
    /// Returns the number of bytes written.
    fn encode_output(&self, table: &str, src: &[u8], dst: &mut [u8]) -> Result<usize>;

    /// True if loads go through a scratch buffer in encoded space.
    ///
    /// When false the payload is read straight into the working buffer.
    fn needs_scratch_buffer(&self) -> bool {
        false
    }
}

/// Reads into `buf` until it is full or the reader is exhausted.
pub(crate) fn read_fully(reader: &mut dyn Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {},
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(offset: u32, num_bytes: u32) -> LoadHeader {
        LoadHeader { table_name: "A.T".into(), offset, num_bytes }
    }

    #[test]
    fn test_default_final_status() {
        let codec = PassThroughCodec;
        assert_eq!(codec.final_status(&header(0, 64), 64), Info::Success);
        assert_eq!(codec.final_status(&header(0, 32), 64), Info::WarnShortFile);
        assert_eq!(codec.final_status(&header(8, 56), 64), Info::WarnPartialLoad);
    }

    #[test]
    fn test_default_load_size_check() {
        let codec = PassThroughCodec;
        assert!(codec.validate_load_size(&header(0, 64), 64).is_ok());
        assert!(codec.validate_load_size(&header(1, 64), 64).is_err());
        assert!(codec.validate_load_size(&header(u32::MAX, u32::MAX), 64).is_err());
    }

    #[test]
    fn test_read_fully_short_source() {
        let mut src: &[u8] = &[1, 2, 3];
        let mut buf = [0u8; 5];
        assert_eq!(read_fully(&mut src, &mut buf).ok(), Some(3));
        assert_eq!(buf, [1, 2, 3, 0, 0]);
    }
}
