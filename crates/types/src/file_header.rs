//! Fixed-layout headers of table image and registry dump files.
//!
//! Every file starts with a 64-byte standard file header. Table images follow
//! it with a 52-byte table header and then the payload. All integers are
//! stored big-endian regardless of host byte order.
//!
//! # Standard file header (64 bytes)
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0      | 4    | content type (`"cFE1"`) |
//! | 4      | 4    | sub-type |
//! | 8      | 4    | header length |
//! | 12     | 4    | spacecraft ID |
//! | 16     | 4    | processor ID |
//! | 20     | 4    | application ID |
//! | 24     | 4    | time seconds |
//! | 28     | 4    | time subseconds |
//! | 32     | 32   | description, NUL padded |
//!
//! # Table header (52 bytes)
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0      | 4    | reserved |
//! | 4      | 4    | offset |
//! | 8      | 4    | number of bytes |
//! | 12     | 40   | table name, NUL terminated |

use crate::time::MissionTime;

/// Size of the standard file header.
pub const FS_HEADER_SIZE: usize = 64;

/// Size of the description field.
pub const FS_DESCRIPTION_LEN: usize = 32;

/// Content type tag `"cFE1"`.
pub const CONTENT_TYPE_CFE1: u32 = 0x6346_4531;

/// Sub-type of a table image file.
pub const SUBTYPE_TBL_IMG: u32 = 8;

/// Sub-type of a table registry dump file.
pub const SUBTYPE_TBL_REG: u32 = 9;

/// Size of the table-name field of the table header.
pub const TABLE_NAME_FIELD_LEN: usize = 40;

/// Size of the table header.
pub const TBL_HEADER_SIZE: usize = 12 + TABLE_NAME_FIELD_LEN;

/// Standard file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdFileHeader {
    /// Content type tag; [`CONTENT_TYPE_CFE1`] for valid files.
    pub content_type: u32,
    /// File sub-type.
    pub sub_type: u32,
    /// Header length in bytes.
    pub length: u32,
    /// Spacecraft that produced the file.
    pub spacecraft_id: u32,
    /// Processor that produced the file.
    pub processor_id: u32,
    /// Application that produced the file.
    pub application_id: u32,
    /// Creation time.
    pub time: MissionTime,
    /// Free-form description, at most 31 bytes.
    pub description: String,
}

impl StdFileHeader {
    /// Creates a header for a file produced on this processor.
    pub fn new(sub_type: u32, description: impl Into<String>) -> Self {
        Self {
            content_type: CONTENT_TYPE_CFE1,
            sub_type,
            length: FS_HEADER_SIZE as u32,
            spacecraft_id: 0,
            processor_id: 0,
            application_id: 0,
            time: MissionTime::default(),
            description: description.into(),
        }
    }

    /// Serializes to the on-disk layout.
    pub fn to_bytes(&self) -> [u8; FS_HEADER_SIZE] {
        let mut buf = [0u8; FS_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.content_type.to_be_bytes());
        buf[4..8].copy_from_slice(&self.sub_type.to_be_bytes());
        buf[8..12].copy_from_slice(&self.length.to_be_bytes());
        buf[12..16].copy_from_slice(&self.spacecraft_id.to_be_bytes());
        buf[16..20].copy_from_slice(&self.processor_id.to_be_bytes());
        buf[20..24].copy_from_slice(&self.application_id.to_be_bytes());
        buf[24..28].copy_from_slice(&self.time.seconds.to_be_bytes());
        buf[28..32].copy_from_slice(&self.time.subseconds.to_be_bytes());
        write_padded(&mut buf[32..], &self.description);
        buf
    }

    /// Deserializes from the on-disk layout. Returns `None` if `buf` is short.
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < FS_HEADER_SIZE {
            return None;
        }
        Some(Self {
            content_type: be_u32(buf, 0)?,
            sub_type: be_u32(buf, 4)?,
            length: be_u32(buf, 8)?,
            spacecraft_id: be_u32(buf, 12)?,
            processor_id: be_u32(buf, 16)?,
            application_id: be_u32(buf, 20)?,
            time: MissionTime::new(be_u32(buf, 24)?, be_u32(buf, 28)?),
            description: read_padded(&buf[32..FS_HEADER_SIZE]).unwrap_or_default(),
        })
    }
}

/// Table-specific header of a pass-through table image.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableFileHeader {
    /// Reserved, written as zero.
    pub reserved: u32,
    /// Byte offset of the payload within the table.
    pub offset: u32,
    /// Number of payload bytes that follow the header.
    pub num_bytes: u32,
    /// Fully-qualified `AppName.TableName` of the target table.
    pub table_name: String,
}

impl TableFileHeader {
    /// Creates a header for `num_bytes` of payload at `offset`.
    pub fn new(table_name: impl Into<String>, offset: u32, num_bytes: u32) -> Self {
        Self { reserved: 0, offset, num_bytes, table_name: table_name.into() }
    }

    /// Serializes to the on-disk layout.
    ///
    /// A name longer than the field is truncated so the terminating NUL fits.
    pub fn to_bytes(&self) -> [u8; TBL_HEADER_SIZE] {
        let mut buf = [0u8; TBL_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.reserved.to_be_bytes());
        buf[4..8].copy_from_slice(&self.offset.to_be_bytes());
        buf[8..12].copy_from_slice(&self.num_bytes.to_be_bytes());
        write_padded(&mut buf[12..], &self.table_name);
        buf
    }

    /// Deserializes from the on-disk layout.
    ///
    /// Returns `None` if `buf` is short or the name is not NUL terminated.
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < TBL_HEADER_SIZE {
            return None;
        }
        Some(Self {
            reserved: be_u32(buf, 0)?,
            offset: be_u32(buf, 4)?,
            num_bytes: be_u32(buf, 8)?,
            table_name: read_padded(&buf[12..TBL_HEADER_SIZE])?,
        })
    }
}

fn be_u32(buf: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_be_bytes(buf.get(at..at + 4)?.try_into().ok()?))
}

/// Copies `text` into `field`, leaving at least one trailing NUL.
fn write_padded(field: &mut [u8], text: &str) {
    let len = text.len().min(field.len().saturating_sub(1));
    field[..len].copy_from_slice(&text.as_bytes()[..len]);
}

/// Reads a NUL-terminated string from a fixed field.
fn read_padded(field: &[u8]) -> Option<String> {
    let end = field.iter().position(|&b| b == 0)?;
    String::from_utf8(field[..end].to_vec()).ok()
}
