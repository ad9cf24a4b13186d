//! Validation-result records.
//!
//! A validation request reserves a record. Tables without a validation
//! function complete immediately; otherwise the record stays pending until
//! the owner runs its function. Performed results are delivered into the
//! housekeeping data one per housekeeping cycle, which frees the record.

use flight_tables_types::{IdCategory, ResourceId, ValidationId, find_next};

use crate::registry::Registry;

/// Life-cycle state shared by validation and dump-control records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum RecordState {
    #[default]
    Free,
    Pending,
    Performed,
}

/// Which buffer of a table an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BufferSelect {
    /// The buffer readers see.
    Active,
    /// The load in progress, or the previous buffer of a double-buffered table.
    Inactive,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ValidationRecord {
    pub id: Option<ValidationId>,
    pub state: RecordState,
    pub table_name: String,
    pub crc: u32,
    pub active_buffer: bool,
    pub result: i32,
}

impl Registry {
    /// Reserves a validation record for `table_name`.
    pub fn alloc_validation(&mut self, table_name: &str, active_buffer: bool) -> Option<ValidationId> {
        let size = self.validations.len();
        let records = &self.validations;
        let found = find_next(self.validation_cursor, size, ResourceId::next_serial, |id| {
            id.to_index(IdCategory::Validation, size).map_or(true, |i| records[i].state != RecordState::Free)
        })?;
        let id = ValidationId::new(found)?;
        let index = id.to_index(size)?;
        self.validation_cursor = found;
        self.validations[index] = ValidationRecord {
            id: Some(id),
            state: RecordState::Pending,
            table_name: table_name.to_string(),
            crc: 0,
            active_buffer,
            result: 0,
        };
        Some(id)
    }

    /// Slot index of a live validation record.
    pub fn validation_index(&self, id: ValidationId) -> Option<usize> {
        let index = id.to_index(self.validations.len())?;
        let record = &self.validations[index];
        (record.id == Some(id) && record.state != RecordState::Free).then_some(index)
    }

    pub fn free_validation(&mut self, id: ValidationId) {
        if let Some(index) = self.validation_index(id) {
            self.validations[index] = ValidationRecord::default();
        }
    }

    /// Stores a result and moves the record to performed.
    pub fn complete_validation(&mut self, id: ValidationId, crc: u32, result: i32) -> bool {
        let Some(index) = self.validation_index(id) else {
            return false;
        };
        let record = &mut self.validations[index];
        record.crc = crc;
        record.result = result;
        record.state = RecordState::Performed;
        true
    }

    /// Oldest-slot-first performed record, if any.
    pub fn next_performed_validation(&self) -> Option<usize> {
        self.validations.iter().position(|v| v.state == RecordState::Performed)
    }
}
