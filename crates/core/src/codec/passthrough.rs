//! Byte-exact codec.

use std::io::Read;

use flight_tables_types::{TBL_HEADER_SIZE, TableFileHeader};
use snafu::ResultExt;

use super::{LoadHeader, TableCodec, read_fully};
use crate::error::{AccessSnafu, NoTblHeaderSnafu, Result, internal};

/// Copies payload bytes unchanged.
///
/// The table header is the fixed [`TableFileHeader`] layout: three big-endian
/// `u32` fields followed by a NUL-terminated name field.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughCodec;

impl TableCodec for PassThroughCodec {
    fn name(&self) -> &'static str {
        "pass-through"
    }

    fn validate_config(&self, _table: &str, _size: usize) -> Result<()> {
        Ok(())
    }

    fn encoded_size(&self, _table: &str, size: usize) -> usize {
        size
    }

    fn decode_header(&self, reader: &mut dyn Read, path: &str) -> Result<LoadHeader> {
        let mut buf = [0u8; TBL_HEADER_SIZE];
        let read = read_fully(reader, &mut buf).context(AccessSnafu { path })?;
        if read < TBL_HEADER_SIZE {
            return NoTblHeaderSnafu { path }.fail();
        }
        let header = TableFileHeader::from_bytes(&buf).ok_or_else(|| NoTblHeaderSnafu { path }.build())?;
        Ok(LoadHeader { table_name: header.table_name, offset: header.offset, num_bytes: header.num_bytes })
    }

    fn encode_header(&self, table: &str, offset: u32, num_bytes: u32) -> Vec<u8> {
        TableFileHeader::new(table, offset, num_bytes).to_bytes().to_vec()
    }

    fn decode_input(&self, _table: &str, src: &[u8], dst: &mut [u8]) -> Result<()> {
        let n = src.len().min(dst.len());
        dst[..n].copy_from_slice(&src[..n]);
        Ok(())
    }

    fn encode_output(&self, _table: &str, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        if dst.len() < src.len() {
            return Err(internal(format!("snapshot buffer of {} bytes cannot hold {}", dst.len(), src.len())));
        }
        dst[..src.len()].copy_from_slice(src);
        Ok(src.len())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::TableError;

    #[test]
    fn test_header_layout_is_big_endian() {
        let bytes = PassThroughCodec.encode_header("NAV.Gains", 4, 0x0102);
        assert_eq!(bytes.len(), TBL_HEADER_SIZE);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 4]);
        assert_eq!(&bytes[8..12], &[0, 0, 1, 2]);
        let mut reader: &[u8] = &bytes;
        let header = PassThroughCodec.decode_header(&mut reader, "f").unwrap();
        assert_eq!(header, LoadHeader { table_name: "NAV.Gains".into(), offset: 4, num_bytes: 0x0102 });
    }

    #[test]
    fn test_truncated_header() {
        let bytes = PassThroughCodec.encode_header("NAV.Gains", 0, 1);
        let mut reader: &[u8] = &bytes[..20];
        let err = PassThroughCodec.decode_header(&mut reader, "f").unwrap_err();
        assert!(matches!(err, TableError::NoTblHeader { .. }));
    }

    #[test]
    fn test_unterminated_name() {
        let mut bytes = PassThroughCodec.encode_header("X", 0, 1);
        bytes[12..].fill(b'x');
        let mut reader: &[u8] = &bytes;
        assert!(PassThroughCodec.decode_header(&mut reader, "f").is_err());
    }

    #[test]
    fn test_encode_rejects_small_destination() {
        let mut dst = [0u8; 2];
        assert!(PassThroughCodec.encode_output("A.T", &[1, 2, 3], &mut dst).is_err());
    }
}
