//! Load buffers and the shared buffer pool.
//!
//! All load buffers live in one array indexed by the unified
//! [`LoadBufferLayout`]: the first `max_simultaneous_loads` slots form the
//! shared pool (lent out for single-buffer loads, dump snapshots and codec
//! scratch space), followed by two dedicated slots per registry record.
//!
//! The buffer metadata is protected by the registry lock. The shared pool's
//! claim bits have their own lock, taken only around the find-and-claim step.
//! Lock order is registry, then pool.

use std::sync::Arc;

use flight_tables_types::{
    IdCategory, LoadBufferId, LoadBufferLayout, MissionTime, RegId, ResourceId, find_next,
};
use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Table contents.
///
/// Cloning shares the memory: a clone handed out by `get_address` keeps
/// observing the same buffer. The inner lock only guards against torn reads
/// while table services copies into or out of the buffer.
#[derive(Debug, Clone)]
pub struct TableData(Arc<RwLock<Vec<u8>>>);

impl TableData {
    /// Allocates `len` zero bytes.
    pub fn zeroed(len: usize) -> Self {
        Self(Arc::new(RwLock::new(vec![0; len])))
    }

    /// Wraps existing bytes, e.g. for a user-defined-address table.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self(Arc::new(RwLock::new(bytes)))
    }

    /// Number of bytes.
    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    /// True if the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Locks the contents for reading.
    pub fn read(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        RwLockReadGuard::map(self.0.read(), |v| v.as_slice())
    }

    /// Locks the contents for in-place modification.
    ///
    /// Owners that change an active table this way must call `modified`.
    pub fn write(&self) -> MappedRwLockWriteGuard<'_, [u8]> {
        RwLockWriteGuard::map(self.0.write(), |v| v.as_mut_slice())
    }

    /// Copies the contents out.
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.read().clone()
    }

    /// True if both values share the same memory.
    pub fn ptr_eq(&self, other: &TableData) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Description of the memory used as the data source of address loads.
    pub(crate) fn address_label(&self) -> String {
        format!("Addr {:p}", Arc::as_ptr(&self.0))
    }

    /// Copies the first `len` bytes of `src` into the start of `self`.
    pub(crate) fn copy_prefix_from(&self, src: &TableData, len: usize) {
        if self.ptr_eq(src) {
            return;
        }
        let src = src.read();
        let mut dst = self.write();
        let n = len.min(src.len()).min(dst.len());
        dst[..n].copy_from_slice(&src[..n]);
    }

    /// Zeroes the first `len` bytes.
    pub(crate) fn clear_prefix(&self, len: usize) {
        let mut dst = self.write();
        let n = len.min(dst.len());
        dst[..n].fill(0);
    }

    /// CRC-32 of the first `len` bytes.
    pub(crate) fn crc(&self, len: usize) -> u32 {
        let data = self.read();
        crc32fast::hash(&data[..len.min(data.len())])
    }
}

/// One entry of the load-buffer array.
#[derive(Debug, Clone, Default)]
pub(crate) struct LoadBuffer {
    /// Own id; `None` while the slot is free.
    pub id: Option<LoadBufferId>,
    /// Last id issued for this slot, the seed for its next generation.
    pub last_id: Option<LoadBufferId>,
    pub owner: Option<RegId>,
    pub data: Option<TableData>,
    /// Bytes allocated by table services; 0 for adopted user memory.
    pub alloc_size: usize,
    pub content_size: usize,
    pub file_time: MissionTime,
    pub crc: u32,
    pub validated: bool,
    pub data_source: String,
}

impl LoadBuffer {
    /// Marks the slot free. The memory stays attached for reuse.
    pub fn set_free(&mut self) {
        self.id = None;
        self.owner = None;
        self.validated = false;
        self.content_size = 0;
    }

    /// Frees the slot and drops its memory.
    pub fn deallocate(&mut self) {
        self.set_free();
        self.data = None;
        self.alloc_size = 0;
        self.crc = 0;
        self.file_time = MissionTime::default();
        self.data_source.clear();
    }

    /// Clears per-load metadata on a freshly claimed slot.
    pub fn reset_for(&mut self, id: LoadBufferId, owner: RegId) {
        self.id = Some(id);
        self.last_id = Some(id);
        self.owner = Some(owner);
        self.validated = false;
        self.content_size = 0;
        self.crc = 0;
        self.file_time = MissionTime::default();
        self.data_source.clear();
    }
}

/// Returns the next id for dedicated slot `index`, one generation after its last.
pub(crate) fn next_dedicated_id(layout: &LoadBufferLayout, buffers: &[LoadBuffer], index: usize) -> Option<LoadBufferId> {
    let (category, _) = layout.locate(index);
    let seed = buffers
        .get(index)
        .and_then(|b| b.last_id)
        .map_or_else(|| ResourceId::from_parts(IdCategory::LoadBuffer, index as u32), LoadBufferId::id);
    let mut next = seed;
    for _ in 0..layout.category_len(category) {
        next = layout.increment(next);
    }
    LoadBufferId::new(next)
}

/// Claim state of the shared pool.
#[derive(Debug)]
struct PoolState {
    claimed: Vec<bool>,
    cursor: ResourceId,
}

/// Shared load-buffer pool.
#[derive(Debug)]
pub(crate) struct SharedPool {
    layout: LoadBufferLayout,
    state: Mutex<PoolState>,
}

impl SharedPool {
    pub fn new(layout: LoadBufferLayout) -> Self {
        Self {
            state: Mutex::new(PoolState {
                claimed: vec![false; layout.shared()],
                cursor: layout.category_cursor(0),
            }),
            layout,
        }
    }

    /// Claims a free shared buffer for `owner`. Caller holds the registry lock.
    pub fn acquire(&self, buffers: &mut [LoadBuffer], owner: RegId) -> Option<LoadBufferId> {
        let total = self.layout.total();
        let mut state = self.state.lock();
        let PoolState { claimed, cursor } = &mut *state;
        let found = find_next(
            *cursor,
            self.layout.shared(),
            |id| self.layout.increment(id),
            |id| id.to_index(IdCategory::LoadBuffer, total).and_then(|i| claimed.get(i).copied()).unwrap_or(true),
        )?;
        let id = LoadBufferId::new(found)?;
        let index = id.to_index(total)?;
        claimed[index] = true;
        *cursor = found;
        drop(state);
        buffers[index].reset_for(id, owner);
        Some(id)
    }

    /// Returns a shared buffer to the pool. Ignores ids outside the pool.
    pub fn release(&self, buffers: &mut [LoadBuffer], id: LoadBufferId) {
        let Some(index) = id.to_index(self.layout.total()) else {
            return;
        };
        if index >= self.layout.shared() || buffers[index].id != Some(id) {
            return;
        }
        buffers[index].set_free();
        self.state.lock().claimed[index] = false;
    }

    pub fn free_count(&self) -> usize {
        self.state.lock().claimed.iter().filter(|c| !**c).count()
    }

    pub fn is_shared(&self, id: LoadBufferId) -> bool {
        id.to_index(self.layout.total()).is_some_and(|i| i < self.layout.shared())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn reg(serial: u32) -> RegId {
        RegId::new(ResourceId::from_parts(IdCategory::Registry, serial)).unwrap()
    }

    fn buffers(layout: &LoadBufferLayout) -> Vec<LoadBuffer> {
        vec![LoadBuffer::default(); layout.total()]
    }

    #[test]
    fn test_pool_exhaustion_and_release() {
        let layout = LoadBufferLayout::new(2, 3);
        let pool = SharedPool::new(layout);
        let mut bufs = buffers(&layout);

        let a = pool.acquire(&mut bufs, reg(1)).unwrap();
        let b = pool.acquire(&mut bufs, reg(1)).unwrap();
        assert_ne!(a, b);
        assert!(pool.acquire(&mut bufs, reg(1)).is_none());
        assert_eq!(pool.free_count(), 0);

        pool.release(&mut bufs, a);
        assert_eq!(pool.free_count(), 1);
        let c = pool.acquire(&mut bufs, reg(2)).unwrap();
        assert_ne!(c, a, "reused slot must carry a new id");
        assert_eq!(c.to_index(layout.total()), a.to_index(layout.total()));
        assert!(pool.is_shared(c));
    }

    #[test]
    fn test_release_of_stale_id_is_ignored() {
        let layout = LoadBufferLayout::new(1, 1);
        let pool = SharedPool::new(layout);
        let mut bufs = buffers(&layout);
        let a = pool.acquire(&mut bufs, reg(1)).unwrap();
        pool.release(&mut bufs, a);
        let b = pool.acquire(&mut bufs, reg(1)).unwrap();
        pool.release(&mut bufs, a);
        assert_eq!(bufs[0].id, Some(b));
        assert_eq!(pool.free_count(), 0);
    }

    #[test]
    fn test_dedicated_generations_stay_in_slot() {
        let layout = LoadBufferLayout::new(4, 8);
        let mut bufs = buffers(&layout);
        let index = layout.index_of(LoadBufferLayout::dedicated_category(3), 1);
        let first = next_dedicated_id(&layout, &bufs, index).unwrap();
        bufs[index].reset_for(first, reg(4));
        let second = next_dedicated_id(&layout, &bufs, index).unwrap();
        assert_ne!(first, second);
        assert_eq!(first.to_index(layout.total()), Some(index));
        assert_eq!(second.to_index(layout.total()), Some(index));
        assert!(!pool_is_shared(&layout, second));
    }

    fn pool_is_shared(layout: &LoadBufferLayout, id: LoadBufferId) -> bool {
        SharedPool::new(*layout).is_shared(id)
    }

    #[test]
    fn test_table_data_copy_and_crc() {
        let a = TableData::from_vec(vec![1, 2, 3, 4]);
        let b = TableData::zeroed(4);
        b.copy_prefix_from(&a, 3);
        assert_eq!(b.to_vec(), vec![1, 2, 3, 0]);
        assert_eq!(a.crc(4), crc32fast::hash(&[1, 2, 3, 4]));
        b.clear_prefix(2);
        assert_eq!(b.to_vec(), vec![0, 0, 3, 0]);
        let alias = a.clone();
        assert!(alias.ptr_eq(&a));
        alias.copy_prefix_from(&a, 4);
        assert!(a.address_label().starts_with("Addr 0x"));
    }
}
