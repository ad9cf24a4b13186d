//! Dump-control records.
//!
//! A dump request reserves one of these alongside a shared snapshot buffer.
//! For ordinary tables the snapshot is taken on the spot and the record is
//! `Performed`; dump-only tables stay `Pending` until their owner copies the
//! data during its next management cycle. Housekeeping writes performed
//! snapshots to file and frees both the buffer and the record.

use flight_tables_types::{DumpControlId, IdCategory, LoadBufferId, ResourceId, find_next};

use crate::app::AppId;
use crate::registry::Registry;
use crate::validation::RecordState;

#[derive(Debug, Clone, Default)]
pub(crate) struct DumpControl {
    pub id: Option<DumpControlId>,
    pub state: RecordState,
    /// Buffer the snapshot is taken from.
    pub source: Option<LoadBufferId>,
    /// Shared buffer holding the snapshot.
    pub snapshot: Option<LoadBufferId>,
    pub table_name: String,
    pub file_name: String,
    pub reg_index: usize,
    /// Owner of the table when the dump was requested.
    pub owner: Option<AppId>,
}

impl Registry {
    pub fn alloc_dump(&mut self) -> Option<DumpControlId> {
        let size = self.dumps.len();
        let records = &self.dumps;
        let found = find_next(self.dump_cursor, size, ResourceId::next_serial, |id| {
            id.to_index(IdCategory::DumpControl, size).map_or(true, |i| records[i].state != RecordState::Free)
        })?;
        let id = DumpControlId::new(found)?;
        let index = id.to_index(size)?;
        self.dump_cursor = found;
        self.dumps[index] = DumpControl { id: Some(id), state: RecordState::Pending, ..DumpControl::default() };
        Some(id)
    }

    pub fn dump_index(&self, id: DumpControlId) -> Option<usize> {
        let index = id.to_index(self.dumps.len())?;
        let record = &self.dumps[index];
        (record.id == Some(id) && record.state != RecordState::Free).then_some(index)
    }

    /// Frees a dump record. The caller releases its snapshot buffer.
    pub fn free_dump(&mut self, index: usize) {
        let reg_index = self.dumps[index].reg_index;
        let id = self.dumps[index].id;
        if id.is_some() && self.records.get(reg_index).is_some_and(|r| r.dump_control == id) {
            self.records[reg_index].dump_control = None;
        }
        self.dumps[index] = DumpControl::default();
    }
}
