//! Table image files in the pass-through format.

// Test utilities are expected to panic on failure - that's their purpose
#![allow(clippy::expect_used)]

use std::path::{Path, PathBuf};

use flight_tables_types::{
    CONTENT_TYPE_CFE1, MissionTime, SUBTYPE_TBL_IMG, StdFileHeader, TableFileHeader,
};

use crate::TestDir;

/// A table image file.
///
/// Every header field can be overridden so tests can produce files that fail
/// one specific load check. `num_bytes` defaults to the payload length.
#[derive(Debug, Clone, bon::Builder)]
pub struct TableImage {
    /// Fully-qualified target table name.
    #[builder(into)]
    table_name: String,
    /// Payload bytes written after the headers.
    #[builder(default)]
    payload: Vec<u8>,
    /// Offset field of the table header.
    #[builder(default)]
    offset: u32,
    /// Number-of-bytes field; defaults to `payload.len()`.
    num_bytes: Option<u32>,
    /// Extra bytes appended after the payload.
    #[builder(default)]
    trailing: Vec<u8>,
    #[builder(default = CONTENT_TYPE_CFE1)]
    content_type: u32,
    #[builder(default = SUBTYPE_TBL_IMG)]
    sub_type: u32,
    #[builder(default = 0x42)]
    spacecraft_id: u32,
    #[builder(default = 1)]
    processor_id: u32,
    #[builder(default = MissionTime::new(1000, 0))]
    time: MissionTime,
    #[builder(default = "test image".to_string(), into)]
    description: String,
    /// Stop after the standard header (no table header).
    #[builder(default)]
    omit_table_header: bool,
    /// Truncate the standard header to this many bytes.
    truncate_std_header: Option<usize>,
}

impl TableImage {
    /// Serializes the file.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut std = StdFileHeader::new(self.sub_type, self.description.clone());
        std.content_type = self.content_type;
        std.spacecraft_id = self.spacecraft_id;
        std.processor_id = self.processor_id;
        std.time = self.time;

        let mut bytes = std.to_bytes().to_vec();
        if let Some(len) = self.truncate_std_header {
            bytes.truncate(len);
            return bytes;
        }
        if self.omit_table_header {
            return bytes;
        }
        let num_bytes = self.num_bytes.unwrap_or(self.payload.len() as u32);
        bytes.extend_from_slice(
            &TableFileHeader::new(self.table_name.clone(), self.offset, num_bytes).to_bytes(),
        );
        bytes.extend_from_slice(&self.payload);
        bytes.extend_from_slice(&self.trailing);
        bytes
    }

    /// Writes the file to `path`.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be written.
    pub fn write(&self, path: &Path) {
        std::fs::write(path, self.to_bytes()).expect("failed to write table image");
    }

    /// Writes the file as `name` inside `dir` and returns its path.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be written.
    pub fn write_to(&self, dir: &TestDir, name: &str) -> PathBuf {
        let path = dir.join(name);
        self.write(&path);
        path
    }
}
