//! Shared test utilities for flight table services crates.
//!
//! - [`TestDir`] - Managed temporary directory with path helpers
//! - [`TableImage`] / [`TableImageBuilder`] - Well-formed or deliberately broken table files
//! - [`strategies`] - Proptest generators for table names, options and payloads

#![deny(unsafe_code)]

mod image;
pub mod strategies;
mod test_dir;

pub use image::{TableImage, TableImageBuilder};
pub use test_dir::TestDir;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use flight_tables_types::{FS_HEADER_SIZE, StdFileHeader, TBL_HEADER_SIZE, TableFileHeader};

    use super::*;

    #[test]
    fn test_dir_creates_temp_directory() {
        let dir = TestDir::new();
        assert!(dir.path().is_dir());
    }

    #[test]
    fn test_dir_cleanup_on_drop() {
        let path = {
            let dir = TestDir::new();
            let p = dir.path().to_path_buf();
            std::fs::write(p.join("file.txt"), "data").expect("write file");
            p
        };
        assert!(!path.exists(), "temp directory should be cleaned up on drop");
    }

    #[test]
    fn test_image_layout() {
        let bytes = TableImage::builder().table_name("A.T").payload(vec![0x5A; 64]).build().to_bytes();
        assert_eq!(bytes.len(), FS_HEADER_SIZE + TBL_HEADER_SIZE + 64);
        let std = StdFileHeader::from_bytes(&bytes).unwrap();
        assert_eq!(std.sub_type, flight_tables_types::SUBTYPE_TBL_IMG);
        let tbl = TableFileHeader::from_bytes(&bytes[FS_HEADER_SIZE..]).unwrap();
        assert_eq!(tbl.table_name, "A.T");
        assert_eq!(tbl.num_bytes, 64);
        assert!(bytes[FS_HEADER_SIZE + TBL_HEADER_SIZE..].iter().all(|&b| b == 0x5A));
    }

    #[test]
    fn test_image_malformed_fields() {
        let bytes = TableImage::builder()
            .table_name("A.T")
            .payload(vec![1; 8])
            .num_bytes(16)
            .trailing(vec![9; 3])
            .build()
            .to_bytes();
        let tbl = TableFileHeader::from_bytes(&bytes[FS_HEADER_SIZE..]).unwrap();
        assert_eq!(tbl.num_bytes, 16);
        assert_eq!(bytes.len(), FS_HEADER_SIZE + TBL_HEADER_SIZE + 8 + 3);
    }

    #[test]
    fn test_image_write_to() {
        let dir = TestDir::new();
        let path = TableImage::builder().table_name("A.T").payload(vec![1, 2]).build().write_to(&dir, "t.tbl");
        assert!(path.exists());
        assert_eq!(std::fs::metadata(&path).unwrap().len() as usize, FS_HEADER_SIZE + TBL_HEADER_SIZE + 2);
    }
}
