//! Registry record store.
//!
//! [`Registry`] owns every fixed-capacity array of table services: registry
//! records, access descriptors, load-buffer metadata, validation and
//! dump-control records and the critical-table rows. It lives behind the
//! registry mutex; nothing in here locks.
//!
//! Records are addressed by slot index after the caller has confirmed the
//! slot holds the expected id. IDs are never trusted on their own because a
//! freed slot may have been reissued under a new serial.

use std::sync::Arc;

use flight_tables_cds::CdsHandle;
use flight_tables_types::{
    DumpControlId, IdCategory, LoadBufferId, LoadBufferLayout, MissionTime, RegId, ResourceId,
    TableHandle, TableOptions, TableServicesConfig, ValidationId, find_next,
};

use crate::access::{AccessDescriptor, AccessLink};
use crate::app::AppId;
use crate::buffer::LoadBuffer;
use crate::critical::CriticalTableEntry;
use crate::dump::DumpControl;
use crate::housekeeping::HousekeepingCounters;
use crate::notify::NotifyDescriptor;
use crate::validation::ValidationRecord;

/// Owner-supplied validation function.
///
/// Returns 0 to accept the contents, a negative code to reject them, or a
/// positive code which is treated as a rejection and reported separately.
/// It is called without the registry lock held and must not call back into
/// table services.
pub type TableValidator = Arc<dyn Fn(&[u8]) -> i32 + Send + Sync>;

/// Registration-time configuration of a table.
#[derive(Clone, Default)]
pub(crate) struct TableConfig {
    /// Qualified `App.Table` name.
    pub name: String,
    pub size: usize,
    pub options: TableOptions,
    pub validator: Option<TableValidator>,
}

impl std::fmt::Debug for TableConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableConfig")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("options", &self.options)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

/// Mutable status of a table.
#[derive(Debug, Clone, Default)]
pub(crate) struct TableStatus {
    pub active: Option<LoadBufferId>,
    pub prev: Option<LoadBufferId>,
    /// Load in progress.
    pub next: Option<LoadBufferId>,
    pub time_of_last_update: MissionTime,
    pub is_modified: bool,
    pub last_file_loaded: String,
}

/// One registry record.
#[derive(Debug, Clone, Default)]
pub(crate) struct RegistryRecord {
    /// `None` while the slot is free.
    pub reg_id: Option<RegId>,
    /// `None` once the owner has unregistered.
    pub owner: Option<AppId>,
    pub access_head: AccessLink,
    pub validate_active: Option<ValidationId>,
    pub validate_inactive: Option<ValidationId>,
    pub dump_control: Option<DumpControlId>,
    pub cds_handle: Option<CdsHandle>,
    pub config: TableConfig,
    pub status: TableStatus,
    pub notify: Option<NotifyDescriptor>,
}

impl RegistryRecord {
    pub fn is_used(&self) -> bool {
        self.reg_id.is_some()
    }

    pub fn loaded_once(&self) -> bool {
        self.status.active.is_some()
    }

    pub fn is_critical(&self) -> bool {
        self.config.options.critical() && self.cds_handle.is_some()
    }
}

/// All table-services state guarded by the registry lock.
#[derive(Debug)]
pub(crate) struct Registry {
    pub layout: LoadBufferLayout,
    pub records: Vec<RegistryRecord>,
    pub descriptors: Vec<AccessDescriptor>,
    pub buffers: Vec<LoadBuffer>,
    pub validations: Vec<ValidationRecord>,
    pub dumps: Vec<DumpControl>,
    pub critical: Vec<CriticalTableEntry>,
    pub hk: HousekeepingCounters,
    reg_cursor: ResourceId,
    pub(crate) handle_cursor: ResourceId,
    pub(crate) validation_cursor: ResourceId,
    pub(crate) dump_cursor: ResourceId,
}

impl Registry {
    pub fn new(config: &TableServicesConfig) -> Self {
        let layout = config.buffer_layout();
        let mut buffers = vec![LoadBuffer::default(); layout.total()];
        for buffer in buffers.iter_mut().take(layout.shared()) {
            buffer.data = Some(crate::buffer::TableData::zeroed(config.shared_buffer_size()));
            buffer.alloc_size = config.shared_buffer_size();
        }
        Self {
            layout,
            records: vec![RegistryRecord::default(); config.max_num_tables],
            descriptors: vec![AccessDescriptor::default(); config.max_num_handles],
            buffers,
            validations: vec![ValidationRecord::default(); config.max_num_validations],
            dumps: vec![DumpControl::default(); config.max_simultaneous_loads],
            critical: vec![CriticalTableEntry::default(); config.max_critical_tables],
            hk: HousekeepingCounters::default(),
            reg_cursor: ResourceId::from_parts(IdCategory::Registry, 0),
            handle_cursor: ResourceId::from_parts(IdCategory::TableHandle, 0),
            validation_cursor: ResourceId::from_parts(IdCategory::Validation, 0),
            dump_cursor: ResourceId::from_parts(IdCategory::DumpControl, 0),
        }
    }

    /// Slot index of the in-use record named `name`.
    pub fn locate_by_name(&self, name: &str) -> Option<usize> {
        self.records.iter().position(|r| r.is_used() && r.config.name == name)
    }

    /// Slot index of `id`, confirmed against the id stored in the slot.
    pub fn locate_by_id(&self, id: RegId) -> Option<usize> {
        let index = id.to_index(self.records.len())?;
        self.is_match(index, id).then_some(index)
    }

    pub fn is_match(&self, index: usize, id: RegId) -> bool {
        self.records.get(index).is_some_and(|r| r.reg_id == Some(id))
    }

    /// Reserves a free registry slot and marks it used.
    pub fn alloc_next(&mut self) -> Option<usize> {
        let size = self.records.len();
        let records = &self.records;
        let found = find_next(self.reg_cursor, size, ResourceId::next_serial, |id| {
            id.to_index(IdCategory::Registry, size).map_or(true, |i| records[i].is_used())
        })?;
        let id = RegId::new(found)?;
        let index = id.to_index(size)?;
        self.reg_cursor = found;
        self.records[index] = RegistryRecord { reg_id: Some(id), ..RegistryRecord::default() };
        Some(index)
    }

    pub fn used_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_used()).count()
    }

    /// Slot index of a buffer id, confirmed against the slot's own id.
    pub fn buffer_index(&self, id: LoadBufferId) -> Option<usize> {
        let index = id.to_index(self.buffers.len())?;
        (self.buffers[index].id == Some(id)).then_some(index)
    }

    pub fn buffer(&self, id: LoadBufferId) -> Option<&LoadBuffer> {
        self.buffer_index(id).map(|i| &self.buffers[i])
    }

    pub fn buffer_mut(&mut self, id: LoadBufferId) -> Option<&mut LoadBuffer> {
        self.buffer_index(id).map(|i| &mut self.buffers[i])
    }

    /// Array index of dedicated slot `slot` (0 or 1) of registry slot `reg_index`.
    pub fn dedicated_index(&self, reg_index: usize, slot: usize) -> usize {
        self.layout.index_of(LoadBufferLayout::dedicated_category(reg_index), slot)
    }

    /// True if the record's load in progress is validated and ready to activate.
    pub fn is_pending_activation(&self, reg_index: usize) -> bool {
        self.records[reg_index]
            .status
            .next
            .and_then(|id| self.buffer(id))
            .is_some_and(|b| b.validated)
    }

    /// Clears a load-in-progress reference whose buffer no longer carries that id.
    ///
    /// Returns true if the reference was stale.
    pub fn heal_stale_next(&mut self, reg_index: usize) -> bool {
        let Some(next) = self.records[reg_index].status.next else {
            return false;
        };
        if self.buffer(next).is_some() {
            return false;
        }
        tracing::warn!(
            table = %self.records[reg_index].config.name,
            buffer = %next,
            "load in progress refers to a recycled buffer; clearing it"
        );
        self.records[reg_index].status.next = None;
        true
    }

    /// Number of records with a load in progress.
    pub fn loads_pending(&self) -> usize {
        self.records.iter().filter(|r| r.is_used() && r.status.next.is_some()).count()
    }
}
