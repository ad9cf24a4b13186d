//! Table image files.
//!
//! A table image is a standard file header, a codec-specific table header and
//! `num_bytes` of payload destined for logical offset `offset`. This module
//! opens images, applies the header checks in order and reads the payload;
//! it never touches the registry.

use std::fs::File;
use std::io::BufReader;

use flight_tables_types::{
    CONTENT_TYPE_CFE1, FS_HEADER_SIZE, StdFileHeader, SUBTYPE_TBL_IMG, TableServicesConfig,
};
use snafu::ResultExt;

use crate::codec::{LoadHeader, TableCodec, read_fully};
use crate::error::{
    AccessSnafu, BadArgumentSnafu, BadContentIdSnafu, BadProcessorIdSnafu, BadSpacecraftIdSnafu,
    BadSubtypeIdSnafu, FileForWrongTableSnafu, FileTooLargeSnafu, FilenameTooLongSnafu,
    LoadIncompleteSnafu, NoStdHeaderSnafu, PartialLoadSnafu, Result, ZeroLengthLoadSnafu,
};

/// Rejects empty paths and paths that do not fit the path field.
pub(crate) fn check_filename(path: &str, max_path_len: usize) -> Result<()> {
    if path.is_empty() {
        return BadArgumentSnafu { message: "empty file name" }.fail();
    }
    if path.len() >= max_path_len {
        return FilenameTooLongSnafu { len: path.len(), max: max_path_len }.fail();
    }
    Ok(())
}

/// Truncates `text` to fewer than `max_len` bytes on a character boundary.
pub(crate) fn bounded(text: &str, max_len: usize) -> String {
    let limit = max_len.saturating_sub(1);
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// An opened image with both headers read and checked.
pub(crate) struct TableImageFile {
    reader: BufReader<File>,
    path: String,
    pub std_header: StdFileHeader,
    pub header: LoadHeader,
}

impl TableImageFile {
    /// Opens `path` and reads both headers.
    ///
    /// Checks content type, sub-type and the spacecraft and processor filters.
    pub fn open(path: &str, config: &TableServicesConfig, codec: &dyn TableCodec) -> Result<Self> {
        let file = File::open(path).context(AccessSnafu { path })?;
        let mut reader = BufReader::new(file);
        let mut raw = [0u8; FS_HEADER_SIZE];
        let read = read_fully(&mut reader, &mut raw).context(AccessSnafu { path })?;
        if read < FS_HEADER_SIZE {
            return NoStdHeaderSnafu { path }.fail();
        }
        let std_header = StdFileHeader::from_bytes(&raw).ok_or_else(|| NoStdHeaderSnafu { path }.build())?;
        check_std_header(&std_header, config)?;
        let header = codec.decode_header(&mut reader, path)?;
        Ok(Self { reader, path: path.to_string(), std_header, header })
    }

    /// Applies the per-table checks: name, zero length, partial first load, size.
    pub fn check_target(
        &self,
        table: &str,
        loaded_once: bool,
        encoded_size: usize,
        codec: &dyn TableCodec,
    ) -> Result<()> {
        if self.header.table_name != table {
            return FileForWrongTableSnafu { expected: table, found: self.header.table_name.clone() }.fail();
        }
        if self.header.num_bytes == 0 {
            return ZeroLengthLoadSnafu { table }.fail();
        }
        if self.header.offset != 0 && !loaded_once {
            return PartialLoadSnafu { table }.fail();
        }
        codec.validate_load_size(&self.header, encoded_size)
    }

    /// Reads exactly `dst.len()` payload bytes and confirms nothing follows.
    pub fn read_payload(&mut self, dst: &mut [u8]) -> Result<()> {
        let path = self.path.as_str();
        let read = read_fully(&mut self.reader, dst).context(AccessSnafu { path })?;
        if read < dst.len() {
            return LoadIncompleteSnafu { read, expected: dst.len() }.fail();
        }
        let mut extra = [0u8; 1];
        let trailing = read_fully(&mut self.reader, &mut extra).context(AccessSnafu { path })?;
        if trailing != 0 {
            return FileTooLargeSnafu {
                table: self.header.table_name.clone(),
                reason: "file has bytes after the declared payload".to_string(),
            }
            .fail();
        }
        Ok(())
    }
}

fn check_std_header(header: &StdFileHeader, config: &TableServicesConfig) -> Result<()> {
    if header.content_type != CONTENT_TYPE_CFE1 {
        return BadContentIdSnafu { found: header.content_type }.fail();
    }
    if header.sub_type != SUBTYPE_TBL_IMG {
        return BadSubtypeIdSnafu { found: header.sub_type }.fail();
    }
    if !config.valid_spacecraft_ids.is_empty() && !config.valid_spacecraft_ids.contains(&header.spacecraft_id) {
        return BadSpacecraftIdSnafu { found: header.spacecraft_id }.fail();
    }
    if !config.valid_processor_ids.is_empty() && !config.valid_processor_ids.contains(&header.processor_id) {
        return BadProcessorIdSnafu { found: header.processor_id }.fail();
    }
    Ok(())
}

/// Reads an image's table header only, to learn which table it targets.
pub(crate) fn peek_table_name(path: &str, config: &TableServicesConfig, codec: &dyn TableCodec) -> Result<String> {
    Ok(TableImageFile::open(path, config, codec)?.header.table_name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use flight_tables_test_utils::{TableImage, TestDir};

    use super::*;
    use crate::codec::PassThroughCodec;
    use crate::error::TableError;

    fn open(path: &std::path::Path, config: &TableServicesConfig) -> Result<TableImageFile> {
        TableImageFile::open(path.to_str().unwrap(), config, &PassThroughCodec)
    }

    #[test]
    fn test_well_formed_image() {
        let dir = TestDir::new();
        let path = TableImage::builder().table_name("A.T").payload(vec![0x5A; 64]).build().write_to(&dir, "t.bin");
        let mut image = open(&path, &TableServicesConfig::default()).unwrap();
        image.check_target("A.T", false, 64, &PassThroughCodec).unwrap();
        let mut buf = vec![0u8; 64];
        image.read_payload(&mut buf).unwrap();
        assert!(buf.iter().all(|b| *b == 0x5A));
    }

    #[test]
    fn test_header_rejections() {
        let dir = TestDir::new();
        let config = TableServicesConfig::default();

        let p = TableImage::builder().table_name("A.T").payload(vec![1; 4]).content_type(7).build().write_to(&dir, "ct");
        assert!(matches!(open(&p, &config), Err(TableError::BadContentId { found: 7 })));

        let p = TableImage::builder().table_name("A.T").payload(vec![1; 4]).sub_type(3).build().write_to(&dir, "st");
        assert!(matches!(open(&p, &config), Err(TableError::BadSubtypeId { found: 3 })));

        let p = TableImage::builder().table_name("A.T").payload(vec![1; 4]).truncate_std_header(10).build().write_to(&dir, "sh");
        assert!(matches!(open(&p, &config), Err(TableError::NoStdHeader { .. })));

        let p = TableImage::builder().table_name("A.T").payload(Vec::new()).omit_table_header(true).build().write_to(&dir, "th");
        assert!(matches!(open(&p, &config), Err(TableError::NoTblHeader { .. })));

        let missing = dir.join("missing.bin");
        assert!(matches!(open(&missing, &config), Err(TableError::Access { .. })));
    }

    #[test]
    fn test_id_filters() {
        let dir = TestDir::new();
        let config = TableServicesConfig::builder()
            .valid_spacecraft_ids(vec![0x42])
            .valid_processor_ids(vec![1, 2])
            .build()
            .unwrap();
        let p = TableImage::builder().table_name("A.T").payload(vec![1; 4]).spacecraft_id(0x43).build().write_to(&dir, "sc");
        assert!(matches!(open(&p, &config), Err(TableError::BadSpacecraftId { found: 0x43 })));
        let p = TableImage::builder().table_name("A.T").payload(vec![1; 4]).processor_id(3).build().write_to(&dir, "pr");
        assert!(matches!(open(&p, &config), Err(TableError::BadProcessorId { found: 3 })));
        let p = TableImage::builder().table_name("A.T").payload(vec![1; 4]).processor_id(2).build().write_to(&dir, "ok");
        assert!(open(&p, &config).is_ok());
    }

    #[test]
    fn test_target_checks() {
        let dir = TestDir::new();
        let config = TableServicesConfig::default();
        let p = TableImage::builder().table_name("A.T").payload(vec![1; 8]).offset(8).build().write_to(&dir, "p");
        let image = open(&p, &config).unwrap();
        assert!(matches!(image.check_target("A.U", true, 64, &PassThroughCodec), Err(TableError::FileForWrongTable { .. })));
        assert!(matches!(image.check_target("A.T", false, 64, &PassThroughCodec), Err(TableError::PartialLoad { .. })));
        assert!(matches!(image.check_target("A.T", true, 12, &PassThroughCodec), Err(TableError::FileTooLarge { .. })));
        assert!(image.check_target("A.T", true, 16, &PassThroughCodec).is_ok());

        let p = TableImage::builder().table_name("A.T").payload(Vec::new()).build().write_to(&dir, "z");
        let image = open(&p, &config).unwrap();
        assert!(matches!(image.check_target("A.T", true, 64, &PassThroughCodec), Err(TableError::ZeroLengthLoad { .. })));
    }

    #[test]
    fn test_payload_length_mismatch() {
        let dir = TestDir::new();
        let config = TableServicesConfig::default();
        let p = TableImage::builder().table_name("A.T").payload(vec![1; 8]).num_bytes(16).build().write_to(&dir, "short");
        let mut image = open(&p, &config).unwrap();
        let mut buf = vec![0u8; 16];
        assert!(matches!(image.read_payload(&mut buf), Err(TableError::LoadIncomplete { read: 8, expected: 16 })));

        let p = TableImage::builder().table_name("A.T").payload(vec![1; 8]).trailing(vec![9; 3]).build().write_to(&dir, "long");
        let mut image = open(&p, &config).unwrap();
        let mut buf = vec![0u8; 8];
        assert!(matches!(image.read_payload(&mut buf), Err(TableError::FileTooLarge { .. })));
    }

    #[test]
    fn test_filename_and_bounded() {
        assert!(check_filename("/cf/a.tbl", 64).is_ok());
        assert!(matches!(check_filename(&"x".repeat(64), 64), Err(TableError::FilenameTooLong { .. })));
        assert!(check_filename("", 64).is_err());
        assert_eq!(bounded("abcdef", 4), "abc");
        assert_eq!(bounded("ab", 4), "ab");
        assert_eq!(bounded("aé", 3), "a");
    }
}
