//! File-backed CDS image using position-based I/O (`pread`/`pwrite`).
//!
//! Writes are serialized through a unit [`parking_lot::Mutex`]; reads take
//! `&self` and never move the file cursor on Unix.

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(windows)]
use std::os::windows::fs::FileExt;
use std::{
    fs::{File, OpenOptions},
    path::Path,
};

use parking_lot::Mutex;

use super::{CdsBackend, check_bounds};
use crate::error::Result;

/// File-backed CDS image.
///
/// The file is sized to the image capacity when created. Durability requires
/// [`sync`](CdsBackend::sync); the store calls it after every directory update.
pub struct FileBackend {
    file: File,
    write_lock: Mutex<()>,
    capacity: u64,
}

impl FileBackend {
    /// Opens an existing image, taking its capacity from the file length.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;
        let capacity = file.metadata()?.len();
        Ok(Self { file, write_lock: Mutex::new(()), capacity })
    }

    /// Creates a zero-filled image of `capacity` bytes, truncating any existing file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the file cannot be created or sized.
    pub fn create(path: impl AsRef<Path>, capacity: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        file.set_len(capacity)?;
        file.sync_all()?;
        Ok(Self { file, write_lock: Mutex::new(()), capacity })
    }

    /// Opens the image at `path`, creating it with `capacity` bytes if absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) on any file-system failure.
    pub fn open_or_create(path: impl AsRef<Path>, capacity: u64) -> Result<Self> {
        if path.as_ref().exists() { Self::open(path) } else { Self::create(path, capacity) }
    }
}

impl CdsBackend for FileBackend {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_bounds(offset, buf.len(), self.capacity)?;
        read_exact_at_offset(&self.file, buf, offset)
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        check_bounds(offset, data.len(), self.capacity)?;
        let _guard = self.write_lock.lock();
        write_all_at_offset(&self.file, data, offset)
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }
}

#[cfg(unix)]
fn read_exact_at_offset(file: &File, buf: &mut [u8], offset: u64) -> Result<()> {
    file.read_exact_at(buf, offset)?;
    Ok(())
}

/// `seek_read` moves the cursor; concurrent readers rely on the store's lock.
#[cfg(windows)]
fn read_exact_at_offset(file: &File, buf: &mut [u8], offset: u64) -> Result<()> {
    let mut pos = 0;
    while pos < buf.len() {
        let n = file.seek_read(&mut buf[pos..], offset + pos as u64)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "CDS image ended during read",
            )
            .into());
        }
        pos += n;
    }
    Ok(())
}

#[cfg(unix)]
fn write_all_at_offset(file: &File, data: &[u8], offset: u64) -> Result<()> {
    file.write_all_at(data, offset)?;
    Ok(())
}

#[cfg(windows)]
fn write_all_at_offset(file: &File, data: &[u8], offset: u64) -> Result<()> {
    let mut pos = 0;
    while pos < data.len() {
        pos += file.seek_write(&data[pos..], offset + pos as u64)?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_create_sizes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cds.img");
        let backend = FileBackend::create(&path, 4096).unwrap();
        assert_eq!(backend.capacity(), 4096);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);
    }

    #[test]
    fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cds.img");
        {
            let backend = FileBackend::create(&path, 1024).unwrap();
            backend.write_at(100, b"critical").unwrap();
            backend.sync().unwrap();
        }
        let backend = FileBackend::open_or_create(&path, 2048).unwrap();
        assert_eq!(backend.capacity(), 1024);
        let mut buf = [0u8; 8];
        backend.read_at(100, &mut buf).unwrap();
        assert_eq!(&buf, b"critical");
    }

    #[test]
    fn test_write_past_end_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::create(dir.path().join("cds.img"), 16).unwrap();
        assert!(backend.write_at(10, &[0u8; 7]).is_err());
    }
}
