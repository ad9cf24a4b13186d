//! Named-block store over a [`CdsBackend`].
//!
//! # Image layout
//!
//! | Region | Size | Contents |
//! |--------|------|----------|
//! | header | 64 | magic, version, directory size, xxh3 of bytes 0..56 |
//! | directory | `max_blocks × 80` | one [`BlockEntry`] per slot |
//! | data | rest of the image | block contents, first-fit placement |
//!
//! Every directory entry carries its own xxh3 checksum and the xxh3 of the
//! block contents. An entry whose checksum fails at open is dropped with a
//! warning; a block whose contents fail their checksum is reported on read.

use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    backend::CdsBackend,
    error::{Error, Result},
};

/// Longest block name; one byte of the 40-byte field is the terminating NUL.
pub const MAX_BLOCK_NAME_LEN: usize = 39;

const MAGIC: &[u8; 8] = b"FTBLCDS1";
const FORMAT_VERSION: u16 = 1;
const HEADER_SIZE: u64 = 64;
const HEADER_CHECKSUMMED: usize = 56;
const NAME_FIELD: usize = 40;
const DATA_ALIGN: u64 = 8;

const FLAG_IN_USE: u8 = 0x01;
const FLAG_TABLE: u8 = 0x02;

/// What a block holds. Deleting a block requires naming its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockKind {
    /// Contents of a critical table.
    Table,
    /// Anything else, such as the critical-table registry.
    Other,
}

impl BlockKind {
    fn as_str(self) -> &'static str {
        match self {
            BlockKind::Table => "table",
            BlockKind::Other => "non-table block",
        }
    }
}

/// Outcome of [`CriticalDataStore::register_block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    /// A new zero-filled block was allocated.
    Created,
    /// A block with this name and size survived from before; its contents are intact.
    AlreadyExists,
}

/// Opaque handle to a registered block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CdsHandle(u32);

impl CdsHandle {
    /// Wraps a raw handle value. Stores other than [`CdsStore`] use this to mint handles.
    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw handle value.
    pub const fn value(self) -> u32 {
        self.0
    }

    fn slot(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CdsHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cds:{}", self.0)
    }
}

/// Contract between table services and the critical data store.
///
/// `AlreadyExists` from [`register_block`](Self::register_block) is a normal
/// outcome; it is what drives recovery of critical tables after a reset.
pub trait CriticalDataStore: Send + Sync {
    /// Registers a block, reusing an existing block of the same name and size.
    ///
    /// An existing block of a different size is discarded and replaced.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidName`, `Error::InvalidSize`,
    /// `Error::DirectoryFull`, `Error::OutOfSpace` or a backend error.
    fn register_block(&self, name: &str, size: usize, kind: BlockKind)
    -> Result<(CdsHandle, BlockStatus)>;

    /// Copies a block's contents into `buf`, verifying the checksum.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHandle`, `Error::SizeMismatch`,
    /// `Error::BlockChecksumMismatch` or a backend error.
    fn read_block(&self, handle: CdsHandle, buf: &mut [u8]) -> Result<()>;

    /// Replaces a block's contents.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHandle`, `Error::SizeMismatch` or a backend error.
    fn write_block(&self, handle: CdsHandle, data: &[u8]) -> Result<()>;

    /// Deletes the named block. `is_table` must match the block's kind.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound`, `Error::WrongType` or a backend error.
    fn delete_block(&self, name: &str, is_table: bool) -> Result<()>;
}

/// One directory slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEntry {
    /// Block name.
    pub name: String,
    /// Block kind.
    pub kind: BlockKind,
    /// Block size in bytes.
    pub size: u32,
    /// Offset of the contents in the image.
    pub offset: u64,
    /// xxh3 of the contents.
    pub data_checksum: u64,
}

impl BlockEntry {
    /// Size of an entry on disk.
    pub const SIZE: usize = 80;

    const CHECKSUMMED: usize = 64;

    fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let name = self.name.as_bytes();
        let len = name.len().min(NAME_FIELD - 1);
        buf[..len].copy_from_slice(&name[..len]);
        buf[40] = FLAG_IN_USE | if self.kind == BlockKind::Table { FLAG_TABLE } else { 0 };
        buf[44..48].copy_from_slice(&self.size.to_le_bytes());
        buf[48..56].copy_from_slice(&self.offset.to_le_bytes());
        buf[56..64].copy_from_slice(&self.data_checksum.to_le_bytes());
        let checksum = xxhash_rust::xxh3::xxh3_64(&buf[..Self::CHECKSUMMED]);
        buf[64..72].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// Parses a slot. `Ok(None)` is a free slot; `Err` is a corrupt one.
    fn from_bytes(buf: &[u8]) -> std::result::Result<Option<Self>, &'static str> {
        if buf.len() < Self::SIZE {
            return Err("short entry");
        }
        if buf[40] & FLAG_IN_USE == 0 {
            return Ok(None);
        }
        let stored = u64::from_le_bytes(le_array(buf, 64)?);
        if stored != xxhash_rust::xxh3::xxh3_64(&buf[..Self::CHECKSUMMED]) {
            return Err("entry checksum mismatch");
        }
        let end = buf[..NAME_FIELD].iter().position(|&b| b == 0).ok_or("unterminated name")?;
        let name = std::str::from_utf8(&buf[..end]).map_err(|_| "name is not UTF-8")?;
        Ok(Some(Self {
            name: name.to_string(),
            kind: if buf[40] & FLAG_TABLE != 0 { BlockKind::Table } else { BlockKind::Other },
            size: u32::from_le_bytes(le_array(buf, 44)?),
            offset: u64::from_le_bytes(le_array(buf, 48)?),
            data_checksum: u64::from_le_bytes(le_array(buf, 56)?),
        }))
    }
}

fn le_array<const N: usize>(buf: &[u8], at: usize) -> std::result::Result<[u8; N], &'static str> {
    buf.get(at..at + N).and_then(|s| s.try_into().ok()).ok_or("short field")
}

/// Critical data store over a byte-addressable backend.
///
/// The directory is cached in memory behind one mutex. Every mutation writes
/// the affected entry back to the image before the lock is released.
pub struct CdsStore<B: CdsBackend> {
    backend: B,
    directory: Mutex<Vec<Option<BlockEntry>>>,
    data_start: u64,
}

impl<B: CdsBackend> CdsStore<B> {
    /// Opens the store in `backend`, formatting it if the image is blank.
    ///
    /// A blank (all-zero header) image is formatted with `max_blocks`
    /// directory slots; an existing image keeps its own directory size.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidMagic` for a foreign image, `Error::Corrupted`
    /// if the header fails its checksum or does not fit, or a backend error.
    pub fn open(backend: B, max_blocks: usize) -> Result<Self> {
        let mut header = [0u8; HEADER_SIZE as usize];
        backend.read_at(0, &mut header)?;

        if header.iter().all(|&b| b == 0) {
            return Self::format(backend, max_blocks);
        }
        if &header[0..8] != MAGIC {
            return Err(Error::InvalidMagic);
        }
        let stored = u64::from_le_bytes(le_array(&header, 56).map_err(corrupted)?);
        if stored != xxhash_rust::xxh3::xxh3_64(&header[..HEADER_CHECKSUMMED]) {
            return Err(Error::Corrupted { reason: "header checksum mismatch".to_string() });
        }
        let version = u16::from_le_bytes(le_array(&header, 8).map_err(corrupted)?);
        if version > FORMAT_VERSION {
            return Err(Error::Corrupted { reason: format!("unsupported version {version}") });
        }
        let slots = u32::from_le_bytes(le_array(&header, 12).map_err(corrupted)?) as usize;
        let data_start = data_start(slots);
        if data_start > backend.capacity() {
            return Err(Error::Corrupted {
                reason: format!("directory of {slots} slots exceeds the image"),
            });
        }

        let mut raw = vec![0u8; slots * BlockEntry::SIZE];
        backend.read_at(HEADER_SIZE, &mut raw)?;
        let mut directory = Vec::with_capacity(slots);
        for (slot, chunk) in raw.chunks_exact(BlockEntry::SIZE).enumerate() {
            match BlockEntry::from_bytes(chunk) {
                Ok(entry) => directory.push(entry),
                Err(reason) => {
                    warn!(slot, reason, "Dropping corrupt CDS directory entry");
                    directory.push(None);
                },
            }
        }
        debug!(slots, used = directory.iter().flatten().count(), "Opened CDS image");

        Ok(Self { backend, directory: Mutex::new(directory), data_start })
    }

    fn format(backend: B, max_blocks: usize) -> Result<Self> {
        let data_start = data_start(max_blocks);
        if data_start > backend.capacity() {
            return Err(Error::Corrupted {
                reason: format!(
                    "directory of {max_blocks} slots does not fit in {} bytes",
                    backend.capacity()
                ),
            });
        }
        let mut header = [0u8; HEADER_SIZE as usize];
        header[0..8].copy_from_slice(MAGIC);
        header[8..10].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        header[12..16].copy_from_slice(&(max_blocks as u32).to_le_bytes());
        let checksum = xxhash_rust::xxh3::xxh3_64(&header[..HEADER_CHECKSUMMED]);
        header[56..64].copy_from_slice(&checksum.to_le_bytes());

        backend.write_at(HEADER_SIZE, &vec![0u8; max_blocks * BlockEntry::SIZE])?;
        backend.write_at(0, &header)?;
        backend.sync()?;
        debug!(max_blocks, capacity = backend.capacity(), "Formatted CDS image");

        Ok(Self { backend, directory: Mutex::new(vec![None; max_blocks]), data_start })
    }

    /// Returns the backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Number of blocks currently registered.
    pub fn block_count(&self) -> usize {
        self.directory.lock().iter().flatten().count()
    }

    /// Returns the entry for `name`, if registered.
    pub fn entry(&self, name: &str) -> Option<BlockEntry> {
        self.directory.lock().iter().flatten().find(|e| e.name == name).cloned()
    }

    fn write_entry(&self, slot: usize, entry: Option<&BlockEntry>) -> Result<()> {
        let bytes = entry.map_or([0u8; BlockEntry::SIZE], BlockEntry::to_bytes);
        self.backend.write_at(HEADER_SIZE + (slot * BlockEntry::SIZE) as u64, &bytes)?;
        self.backend.sync()
    }

    /// First-fit placement among the live blocks.
    fn place(&self, directory: &[Option<BlockEntry>], size: usize) -> Option<u64> {
        let mut used: Vec<(u64, u64)> =
            directory.iter().flatten().map(|e| (e.offset, u64::from(e.size))).collect();
        used.sort_unstable();
        let size = size as u64;
        let mut cursor = self.data_start;
        for (offset, len) in used {
            if offset >= cursor && offset - cursor >= size {
                return Some(cursor);
            }
            cursor = cursor.max(align_up(offset + len));
        }
        (self.backend.capacity().saturating_sub(cursor) >= size).then_some(cursor)
    }

    fn live_entry<'a>(
        directory: &'a [Option<BlockEntry>],
        handle: CdsHandle,
    ) -> Result<&'a BlockEntry> {
        directory
            .get(handle.slot())
            .and_then(Option::as_ref)
            .ok_or(Error::InvalidHandle { handle: handle.value() })
    }
}

impl<B: CdsBackend> CriticalDataStore for CdsStore<B> {
    fn register_block(
        &self,
        name: &str,
        size: usize,
        kind: BlockKind,
    ) -> Result<(CdsHandle, BlockStatus)> {
        if name.is_empty() || name.len() > MAX_BLOCK_NAME_LEN || name.contains('\0') {
            return Err(Error::InvalidName { name: name.to_string() });
        }
        if size == 0 || size > u32::MAX as usize {
            return Err(Error::InvalidSize { name: name.to_string(), size });
        }

        let mut directory = self.directory.lock();
        if let Some(slot) = directory.iter().position(|e| e.as_ref().is_some_and(|e| e.name == name))
        {
            let same = directory[slot].as_ref().is_some_and(|e| e.size as usize == size && e.kind == kind);
            if same {
                return Ok((CdsHandle(slot as u32), BlockStatus::AlreadyExists));
            }
            debug!(name, size, "Replacing CDS block registered with a different size");
            directory[slot] = None;
            self.write_entry(slot, None)?;
        }

        let slot = directory
            .iter()
            .position(Option::is_none)
            .ok_or(Error::DirectoryFull { max_blocks: directory.len() })?;
        let offset = self.place(&directory, size).ok_or(Error::OutOfSpace { size })?;

        let zeros = vec![0u8; size];
        self.backend.write_at(offset, &zeros)?;
        let entry = BlockEntry {
            name: name.to_string(),
            kind,
            size: size as u32,
            offset,
            data_checksum: xxhash_rust::xxh3::xxh3_64(&zeros),
        };
        self.write_entry(slot, Some(&entry))?;
        directory[slot] = Some(entry);
        debug!(name, size, offset, slot, "Created CDS block");

        Ok((CdsHandle(slot as u32), BlockStatus::Created))
    }

    fn read_block(&self, handle: CdsHandle, buf: &mut [u8]) -> Result<()> {
        let directory = self.directory.lock();
        let entry = Self::live_entry(&directory, handle)?;
        if entry.size as usize != buf.len() {
            return Err(Error::SizeMismatch {
                name: entry.name.clone(),
                expected: entry.size as usize,
                actual: buf.len(),
            });
        }
        self.backend.read_at(entry.offset, buf)?;
        if xxhash_rust::xxh3::xxh3_64(buf) != entry.data_checksum {
            return Err(Error::BlockChecksumMismatch { name: entry.name.clone() });
        }
        Ok(())
    }

    fn write_block(&self, handle: CdsHandle, data: &[u8]) -> Result<()> {
        let mut directory = self.directory.lock();
        let mut entry = Self::live_entry(&directory, handle)?.clone();
        if entry.size as usize != data.len() {
            return Err(Error::SizeMismatch {
                name: entry.name,
                expected: entry.size as usize,
                actual: data.len(),
            });
        }
        self.backend.write_at(entry.offset, data)?;
        entry.data_checksum = xxhash_rust::xxh3::xxh3_64(data);
        self.write_entry(handle.slot(), Some(&entry))?;
        directory[handle.slot()] = Some(entry);
        Ok(())
    }

    fn delete_block(&self, name: &str, is_table: bool) -> Result<()> {
        let mut directory = self.directory.lock();
        let slot = directory
            .iter()
            .position(|e| e.as_ref().is_some_and(|e| e.name == name))
            .ok_or_else(|| Error::NotFound { name: name.to_string() })?;
        let wanted = if is_table { BlockKind::Table } else { BlockKind::Other };
        if directory[slot].as_ref().is_some_and(|e| e.kind != wanted) {
            return Err(Error::WrongType { name: name.to_string(), expected: wanted.as_str() });
        }
        self.write_entry(slot, None)?;
        directory[slot] = None;
        debug!(name, slot, "Deleted CDS block");
        Ok(())
    }
}

fn data_start(slots: usize) -> u64 {
    align_up(HEADER_SIZE + (slots * BlockEntry::SIZE) as u64)
}

fn align_up(offset: u64) -> u64 {
    offset.div_ceil(DATA_ALIGN) * DATA_ALIGN
}

fn corrupted(reason: &'static str) -> Error {
    Error::Corrupted { reason: reason.to_string() }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::backend::InMemoryBackend;

    fn store(capacity: usize) -> CdsStore<InMemoryBackend> {
        CdsStore::open(InMemoryBackend::new(capacity), 8).expect("open")
    }

    #[test]
    fn test_register_creates_zeroed_block() {
        let store = store(4096);
        let (handle, status) = store.register_block("APP.Tbl", 16, BlockKind::Table).unwrap();
        assert_eq!(status, BlockStatus::Created);
        let mut buf = [0xAAu8; 16];
        store.read_block(handle, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 16]);
    }

    #[test]
    fn test_register_same_name_and_size_reports_existing() {
        let store = store(4096);
        let (first, _) = store.register_block("APP.Tbl", 16, BlockKind::Table).unwrap();
        store.write_block(first, &[3u8; 16]).unwrap();
        let (second, status) = store.register_block("APP.Tbl", 16, BlockKind::Table).unwrap();
        assert_eq!(status, BlockStatus::AlreadyExists);
        assert_eq!(first, second);
    }

    #[test]
    fn test_register_different_size_replaces_block() {
        let store = store(4096);
        let (handle, _) = store.register_block("APP.Tbl", 16, BlockKind::Table).unwrap();
        store.write_block(handle, &[3u8; 16]).unwrap();
        let (handle, status) = store.register_block("APP.Tbl", 24, BlockKind::Table).unwrap();
        assert_eq!(status, BlockStatus::Created);
        let mut buf = [1u8; 24];
        store.read_block(handle, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 24]);
        assert_eq!(store.block_count(), 1);
    }

    #[test]
    fn test_contents_survive_reopen() {
        let backend = InMemoryBackend::new(4096);
        {
            let store = CdsStore::open(backend.clone(), 8).unwrap();
            let (handle, _) = store.register_block("CDS_Registry", 8, BlockKind::Other).unwrap();
            store.write_block(handle, b"registry").unwrap();
        }
        let store = CdsStore::open(backend, 99).unwrap();
        let (handle, status) = store.register_block("CDS_Registry", 8, BlockKind::Other).unwrap();
        assert_eq!(status, BlockStatus::AlreadyExists);
        let mut buf = [0u8; 8];
        store.read_block(handle, &mut buf).unwrap();
        assert_eq!(&buf, b"registry");
    }

    #[test]
    fn test_corrupt_contents_detected() {
        let backend = InMemoryBackend::new(4096);
        let store = CdsStore::open(backend.clone(), 8).unwrap();
        let (handle, _) = store.register_block("APP.Tbl", 4, BlockKind::Table).unwrap();
        store.write_block(handle, &[1, 2, 3, 4]).unwrap();
        let offset = store.entry("APP.Tbl").unwrap().offset as usize;
        backend.corrupt_byte(offset + 2);
        let mut buf = [0u8; 4];
        let err = store.read_block(handle, &mut buf).unwrap_err();
        assert!(matches!(err, Error::BlockChecksumMismatch { .. }));
    }

    #[test]
    fn test_corrupt_entry_dropped_on_open() {
        let backend = InMemoryBackend::new(4096);
        {
            let store = CdsStore::open(backend.clone(), 8).unwrap();
            store.register_block("APP.Tbl", 4, BlockKind::Table).unwrap();
        }
        backend.corrupt_byte(HEADER_SIZE as usize + 1);
        let store = CdsStore::open(backend, 8).unwrap();
        assert_eq!(store.block_count(), 0);
        let (_, status) = store.register_block("APP.Tbl", 4, BlockKind::Table).unwrap();
        assert_eq!(status, BlockStatus::Created);
    }

    #[test]
    fn test_foreign_image_rejected() {
        let backend = InMemoryBackend::new(1024);
        backend.write_at(0, b"NOTACDS!").unwrap();
        assert!(matches!(CdsStore::open(backend, 4), Err(Error::InvalidMagic)));
    }

    #[test]
    fn test_corrupt_header_rejected() {
        let backend = InMemoryBackend::new(1024);
        drop(CdsStore::open(backend.clone(), 4).unwrap());
        backend.corrupt_byte(12);
        assert!(matches!(CdsStore::open(backend, 4), Err(Error::Corrupted { .. })));
    }

    #[test]
    fn test_delete_checks_kind() {
        let store = store(4096);
        store.register_block("CDS_Registry", 8, BlockKind::Other).unwrap();
        let err = store.delete_block("CDS_Registry", true).unwrap_err();
        assert!(matches!(err, Error::WrongType { .. }));
        store.delete_block("CDS_Registry", false).unwrap();
        let err = store.delete_block("CDS_Registry", false).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_deleted_space_is_reused() {
        let capacity = data_start(2) as usize + 64;
        let store = CdsStore::open(InMemoryBackend::new(capacity), 2).unwrap();
        store.register_block("A.One", 32, BlockKind::Table).unwrap();
        store.register_block("A.Two", 32, BlockKind::Table).unwrap();
        let err = store.register_block("A.Three", 8, BlockKind::Table).unwrap_err();
        assert!(matches!(err, Error::DirectoryFull { max_blocks: 2 }));
        store.delete_block("A.One", true).unwrap();
        store.register_block("A.Three", 32, BlockKind::Table).unwrap();
        assert_eq!(store.entry("A.Three").unwrap().offset, data_start(2));
    }

    #[test]
    fn test_out_of_space() {
        let capacity = data_start(4) as usize + 16;
        let store = CdsStore::open(InMemoryBackend::new(capacity), 4).unwrap();
        let err = store.register_block("A.Big", 17, BlockKind::Table).unwrap_err();
        assert!(matches!(err, Error::OutOfSpace { size: 17 }));
    }

    #[test]
    fn test_size_mismatch_and_bad_handle() {
        let store = store(4096);
        let (handle, _) = store.register_block("A.T", 4, BlockKind::Table).unwrap();
        assert!(matches!(store.write_block(handle, &[0u8; 5]), Err(Error::SizeMismatch { .. })));
        let mut buf = [0u8; 4];
        assert!(matches!(
            store.read_block(CdsHandle(7), &mut buf),
            Err(Error::InvalidHandle { handle: 7 })
        ));
    }

    #[test]
    fn test_invalid_names() {
        let store = store(4096);
        assert!(store.register_block("", 4, BlockKind::Table).is_err());
        assert!(store.register_block(&"x".repeat(MAX_BLOCK_NAME_LEN + 1), 4, BlockKind::Table).is_err());
        assert!(store.register_block(&"x".repeat(MAX_BLOCK_NAME_LEN), 4, BlockKind::Table).is_ok());
    }

    proptest! {
        #[test]
        fn prop_live_blocks_never_overlap(sizes in proptest::collection::vec(1usize..200, 1..8), drop_mask in 0u8..=255) {
            let store = CdsStore::open(InMemoryBackend::new(16 * 1024), 8).unwrap();
            for (i, size) in sizes.iter().enumerate() {
                store.register_block(&format!("A.T{i}"), *size, BlockKind::Table).unwrap();
            }
            for i in 0..sizes.len() {
                if drop_mask & (1 << i) != 0 {
                    store.delete_block(&format!("A.T{i}"), true).unwrap();
                }
            }
            store.register_block("A.Extra", 150, BlockKind::Table).unwrap();
            let mut spans: Vec<(u64, u64)> = store
                .directory
                .lock()
                .iter()
                .flatten()
                .map(|e| (e.offset, e.offset + u64::from(e.size)))
                .collect();
            spans.sort_unstable();
            for pair in spans.windows(2) {
                prop_assert!(pair[0].1 <= pair[1].0);
            }
        }
    }
}
