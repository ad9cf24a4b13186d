//! Access descriptors and the per-table access list.
//!
//! Each registry record heads an intrusive doubly-linked list of the access
//! descriptors open on it. Links are table handles, not references: the
//! descriptor array is the arena and a link is resolved through the handle's
//! slot index. The record's `access_head` is the sentinel; a node whose
//! `prev` is `None` follows the sentinel directly, and the sentinel's `prev`
//! names the tail.

use flight_tables_types::{IdCategory, LoadBufferId, ResourceId, TableHandle, find_next};
use smallvec::SmallVec;

use crate::app::AppId;
use crate::registry::Registry;

/// Forward and backward links of a list node or the sentinel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct AccessLink {
    pub next: Option<TableHandle>,
    pub prev: Option<TableHandle>,
}

/// One open handle on a table.
#[derive(Debug, Clone)]
pub(crate) struct AccessDescriptor {
    /// `None` while the slot is free.
    pub handle: Option<TableHandle>,
    pub app: AppId,
    pub reg_index: usize,
    pub link: AccessLink,
    /// Set between `get_address` and `release_address`.
    pub lock_flag: bool,
    /// Set when the active buffer changed since this handle last looked.
    pub updated: bool,
    /// Buffer observed by the last `get_address`; pinned while `lock_flag` is set.
    pub buffer_index: Option<LoadBufferId>,
}

impl Default for AccessDescriptor {
    fn default() -> Self {
        Self {
            handle: None,
            app: AppId::TABLE_SERVICES,
            reg_index: 0,
            link: AccessLink::default(),
            lock_flag: false,
            updated: false,
            buffer_index: None,
        }
    }
}

/// Handles in list order. Lists are short; eight fit inline.
pub(crate) type HandleList = SmallVec<[TableHandle; 8]>;

impl Registry {
    /// Slot index of a live descriptor, confirmed against the handle stored there.
    pub fn descriptor_index(&self, handle: TableHandle) -> Option<usize> {
        let index = handle.to_index(self.descriptors.len())?;
        (self.descriptors[index].handle == Some(handle)).then_some(index)
    }

    /// Reserves a free descriptor for `app` on registry slot `reg_index`.
    ///
    /// The descriptor is not yet linked into the record's list.
    pub fn alloc_descriptor(&mut self, app: AppId, reg_index: usize) -> Option<TableHandle> {
        let size = self.descriptors.len();
        let descriptors = &self.descriptors;
        let found = find_next(self.handle_cursor, size, ResourceId::next_serial, |id| {
            id.to_index(IdCategory::TableHandle, size).map_or(true, |i| descriptors[i].handle.is_some())
        })?;
        let handle = TableHandle::new(found)?;
        let index = handle.to_index(size)?;
        self.handle_cursor = found;
        self.descriptors[index] =
            AccessDescriptor { handle: Some(handle), app, reg_index, ..AccessDescriptor::default() };
        Some(handle)
    }

    /// Inserts `handle` at the head of its record's access list.
    pub fn link_descriptor(&mut self, handle: TableHandle) {
        let Some(index) = self.descriptor_index(handle) else {
            return;
        };
        let reg_index = self.descriptors[index].reg_index;
        let old_first = self.records[reg_index].access_head.next;
        self.descriptors[index].link = AccessLink { next: old_first, prev: None };
        match old_first.and_then(|h| self.descriptor_index(h)) {
            Some(first) => self.descriptors[first].link.prev = Some(handle),
            None => self.records[reg_index].access_head.prev = Some(handle),
        }
        self.records[reg_index].access_head.next = Some(handle);
    }

    /// Removes `handle` from its record's access list and resets its links.
    pub fn unlink_descriptor(&mut self, handle: TableHandle) {
        let Some(index) = self.descriptor_index(handle) else {
            return;
        };
        let reg_index = self.descriptors[index].reg_index;
        let link = self.descriptors[index].link;
        match link.prev.and_then(|h| self.descriptor_index(h)) {
            Some(prev) => self.descriptors[prev].link.next = link.next,
            None => self.records[reg_index].access_head.next = link.next,
        }
        match link.next.and_then(|h| self.descriptor_index(h)) {
            Some(next) => self.descriptors[next].link.prev = link.prev,
            None => self.records[reg_index].access_head.prev = link.prev,
        }
        self.descriptors[index].link = AccessLink::default();
    }

    /// Walks the access list of `reg_index` from head to tail.
    pub fn access_list(&self, reg_index: usize) -> HandleList {
        let mut out = HandleList::new();
        let mut cursor = self.records[reg_index].access_head.next;
        while let Some(handle) = cursor {
            let Some(index) = self.descriptor_index(handle) else {
                break;
            };
            if out.len() >= self.descriptors.len() {
                break;
            }
            out.push(handle);
            cursor = self.descriptors[index].link.next;
        }
        out
    }

    /// Walks the access list of `reg_index` from tail to head.
    pub fn access_list_reversed(&self, reg_index: usize) -> HandleList {
        let mut out = HandleList::new();
        let mut cursor = self.records[reg_index].access_head.prev;
        while let Some(handle) = cursor {
            let Some(index) = self.descriptor_index(handle) else {
                break;
            };
            if out.len() >= self.descriptors.len() {
                break;
            }
            out.push(handle);
            cursor = self.descriptors[index].link.prev;
        }
        out
    }

    /// Applies `f` to every descriptor on the access list of `reg_index`.
    pub fn for_each_descriptor(&mut self, reg_index: usize, mut f: impl FnMut(&mut AccessDescriptor)) {
        for handle in self.access_list(reg_index) {
            if let Some(index) = self.descriptor_index(handle) {
                f(&mut self.descriptors[index]);
            }
        }
    }

    pub fn num_users(&self, reg_index: usize) -> usize {
        self.access_list(reg_index).len()
    }

    /// Handle `app` holds on `reg_index`, if any.
    pub fn handle_of(&self, reg_index: usize, app: AppId) -> Option<TableHandle> {
        self.access_list(reg_index)
            .into_iter()
            .find(|h| self.descriptor_index(*h).is_some_and(|i| self.descriptors[i].app == app))
    }

    /// Marks every descriptor on the list updated.
    pub fn mark_all_updated(&mut self, reg_index: usize) {
        self.for_each_descriptor(reg_index, |d| d.updated = true);
    }

    /// Marks every descriptor except `except` updated.
    pub fn mark_others_updated(&mut self, reg_index: usize, except: TableHandle) {
        self.for_each_descriptor(reg_index, |d| {
            if d.handle != Some(except) {
                d.updated = true;
            }
        });
    }

    /// True if a locked descriptor on the list pins the buffer in array slot `buffer_slot`.
    ///
    /// Compares slots rather than ids so an older generation of the same memory counts.
    pub fn is_buffer_pinned(&self, reg_index: usize, buffer_slot: usize) -> bool {
        let total = self.buffers.len();
        self.access_list(reg_index).into_iter().any(|h| {
            self.descriptor_index(h).is_some_and(|i| {
                let d = &self.descriptors[i];
                d.lock_flag && d.buffer_index.and_then(|b| b.to_index(total)) == Some(buffer_slot)
            })
        })
    }

    /// Unlinks and frees a descriptor.
    pub fn free_descriptor(&mut self, handle: TableHandle) {
        self.unlink_descriptor(handle);
        if let Some(index) = self.descriptor_index(handle) {
            self.descriptors[index] = AccessDescriptor::default();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use flight_tables_types::TableServicesConfig;
    use proptest::prelude::*;

    use super::*;

    fn registry(handles: usize) -> (Registry, usize) {
        let config = TableServicesConfig::builder()
            .max_num_tables(2)
            .max_num_handles(handles)
            .build()
            .unwrap();
        let mut reg = Registry::new(&config);
        let index = reg.alloc_next().unwrap();
        (reg, index)
    }

    fn open(reg: &mut Registry, reg_index: usize, app: u32) -> TableHandle {
        let h = reg.alloc_descriptor(AppId::from_index(app as usize), reg_index).unwrap();
        reg.link_descriptor(h);
        h
    }

    #[test]
    fn test_insert_at_head() {
        let (mut reg, r) = registry(4);
        let a = open(&mut reg, r, 1);
        let b = open(&mut reg, r, 2);
        let c = open(&mut reg, r, 3);
        assert_eq!(reg.access_list(r).as_slice(), &[c, b, a]);
        assert_eq!(reg.access_list_reversed(r).as_slice(), &[a, b, c]);
        assert_eq!(reg.handle_of(r, AppId::from_index(2)), Some(b));
    }

    #[test]
    fn test_unlink_middle_head_and_tail() {
        let (mut reg, r) = registry(4);
        let a = open(&mut reg, r, 1);
        let b = open(&mut reg, r, 2);
        let c = open(&mut reg, r, 3);
        reg.free_descriptor(b);
        assert_eq!(reg.access_list(r).as_slice(), &[c, a]);
        reg.free_descriptor(c);
        assert_eq!(reg.access_list(r).as_slice(), &[a]);
        reg.free_descriptor(a);
        assert!(reg.access_list(r).is_empty());
        assert_eq!(reg.records[r].access_head, AccessLink::default());
    }

    #[test]
    fn test_handles_exhausted() {
        let (mut reg, r) = registry(2);
        open(&mut reg, r, 1);
        open(&mut reg, r, 2);
        assert!(reg.alloc_descriptor(AppId::from_index(3), r).is_none());
    }

    #[test]
    fn test_mark_others_updated() {
        let (mut reg, r) = registry(4);
        let a = open(&mut reg, r, 1);
        let b = open(&mut reg, r, 2);
        reg.mark_others_updated(r, a);
        let ia = reg.descriptor_index(a).unwrap();
        let ib = reg.descriptor_index(b).unwrap();
        assert!(!reg.descriptors[ia].updated);
        assert!(reg.descriptors[ib].updated);
    }

    proptest! {
        #[test]
        fn prop_list_consistent_under_random_ops(ops in proptest::collection::vec(any::<(bool, u8)>(), 1..64)) {
            let (mut reg, r) = registry(16);
            let mut live: Vec<TableHandle> = Vec::new();
            for (insert, pick) in ops {
                if insert || live.is_empty() {
                    if let Some(h) = reg.alloc_descriptor(AppId::from_index(1), r) {
                        reg.link_descriptor(h);
                        live.insert(0, h);
                    }
                } else {
                    let h = live.remove(pick as usize % live.len());
                    reg.free_descriptor(h);
                }
                let forward = reg.access_list(r);
                let mut backward = reg.access_list_reversed(r);
                backward.reverse();
                prop_assert_eq!(forward.as_slice(), backward.as_slice());
                prop_assert_eq!(forward.as_slice(), live.as_slice());
            }
        }
    }
}
