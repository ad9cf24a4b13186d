//! In-memory CDS backend.

use std::sync::Arc;

use parking_lot::RwLock;

use super::{CdsBackend, check_bounds};
use crate::error::Result;

/// In-memory CDS backend.
///
/// Clones share the same image. Dropping a store and opening a new one over a
/// clone behaves like a restart with preserved critical memory.
#[derive(Clone)]
pub struct InMemoryBackend {
    image: Arc<RwLock<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates a zero-filled image of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self { image: Arc::new(RwLock::new(vec![0u8; capacity])) }
    }

    /// Returns a copy of the raw image.
    pub fn snapshot(&self) -> Vec<u8> {
        self.image.read().clone()
    }

    /// Flips every bit of the byte at `offset`. Out-of-range offsets are ignored.
    pub fn corrupt_byte(&self, offset: usize) {
        if let Some(byte) = self.image.write().get_mut(offset) {
            *byte ^= 0xFF;
        }
    }
}

impl CdsBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let image = self.image.read();
        check_bounds(offset, buf.len(), image.len() as u64)?;
        let start = offset as usize;
        buf.copy_from_slice(&image[start..start + buf.len()]);
        Ok(())
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut image = self.image.write();
        check_bounds(offset, data.len(), image.len() as u64)?;
        let start = offset as usize;
        image[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn capacity(&self) -> u64 {
        self.image.read().len() as u64
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_write_then_read() {
        let backend = InMemoryBackend::new(64);
        backend.write_at(8, &[1, 2, 3]).unwrap();
        let mut buf = [0u8; 3];
        backend.read_at(8, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }

    #[test]
    fn test_clones_share_image() {
        let backend = InMemoryBackend::new(16);
        let other = backend.clone();
        backend.write_at(0, &[9]).unwrap();
        assert_eq!(other.snapshot()[0], 9);
    }

    #[test]
    fn test_out_of_bounds() {
        let backend = InMemoryBackend::new(16);
        let err = backend.write_at(12, &[0u8; 8]).unwrap_err();
        assert!(matches!(err, Error::OutOfBounds { offset: 12, len: 8, capacity: 16 }));
        let mut buf = [0u8; 1];
        assert!(backend.read_at(u64::MAX, &mut buf).is_err());
    }
}
