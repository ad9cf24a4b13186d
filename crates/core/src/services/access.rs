//! Reader and owner calls on an open handle: addresses, status, in-place
//! modification, validation and the owner's management cycle.

use flight_tables_types::{TableHandle, ValidationId};
use smallvec::SmallVec;
use tracing::debug;

use super::TableServices;
use crate::app::AppId;
use crate::buffer::TableData;
use crate::error::{
    Info, InvalidNameSnafu, NeverLoadedSnafu, Result, UnregisteredSnafu, internal,
};
use crate::events::EventId;
use crate::loader::bounded;
use crate::notify::NotifyDescriptor;
use crate::report::TableInfo;
use crate::txn::{CallerContext, Txn};
use crate::validation::RecordState;

/// Suffix marking contents changed in place since the last load.
const MODIFIED_MARKER: &str = "(*)";

impl TableServices {
    /// Pins the active buffer of the table behind `handle`.
    ///
    /// Returns `Updated` the first time the caller looks after an activation.
    /// The buffer cannot be recycled until [`Self::release_address`].
    ///
    /// # Errors
    ///
    /// `Unregistered` if the owner has gone, `NeverLoaded` if there are no
    /// contents yet.
    pub fn get_address(&self, app: AppId, handle: TableHandle) -> Result<(TableData, Info)> {
        let mut txn = Txn::init(&self.registry, app);
        let result = txn
            .start_from_handle(handle, CallerContext::ANY_APP)
            .and_then(|()| pin_active(&mut txn));
        self.complete_quiet(txn, result)
    }

    /// Releases a pin taken by [`Self::get_address`].
    ///
    /// Returns `Updated` if an activation happened while pinned.
    pub fn release_address(&self, app: AppId, handle: TableHandle) -> Result<Info> {
        let mut txn = Txn::init(&self.registry, app);
        let result = txn
            .start_from_handle(handle, CallerContext::ANY_APP)
            .and_then(|()| unpin(&mut txn));
        self.complete_quiet(txn, result)
    }

    /// [`Self::get_address`] for several handles.
    ///
    /// Every handle is attempted. The first error is returned; otherwise
    /// `Updated` if any handle reported it.
    pub fn get_addresses(&self, app: AppId, handles: &[TableHandle]) -> Result<(Vec<TableData>, Info)> {
        let mut addresses = Vec::with_capacity(handles.len());
        let mut first_error = None;
        let mut info = Info::Success;
        for &handle in handles {
            match self.get_address(app, handle) {
                Ok((data, status)) => {
                    addresses.push(data);
                    if status == Info::Updated {
                        info = Info::Updated;
                    }
                },
                Err(e) => {
                    first_error.get_or_insert(e);
                },
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok((addresses, info)),
        }
    }

    /// [`Self::release_address`] for several handles.
    pub fn release_addresses(&self, app: AppId, handles: &[TableHandle]) -> Result<Info> {
        let mut first_error = None;
        let mut info = Info::Success;
        for &handle in handles {
            match self.release_address(app, handle) {
                Ok(Info::Updated) => info = Info::Updated,
                Ok(_) => {},
                Err(e) => {
                    first_error.get_or_insert(e);
                },
            }
        }
        first_error.map_or(Ok(info), Err)
    }

    /// What the table behind `handle` is waiting for, most urgent first:
    /// `ValidationPending`, `UpdatePending`, `DumpPending`, else `Success`.
    pub fn get_status(&self, app: AppId, handle: TableHandle) -> Result<Info> {
        let mut txn = Txn::init(&self.registry, app);
        let result = txn.start_from_handle(handle, CallerContext::ANY_APP).and_then(|()| {
            let reg_index = txn.reg_index()?;
            let reg = txn.reg()?;
            let record = &reg.records[reg_index];
            let info = if record.validate_active.is_some() || record.validate_inactive.is_some() {
                Info::ValidationPending
            } else if reg.is_pending_activation(reg_index) {
                Info::UpdatePending
            } else if record.dump_control.is_some() {
                Info::DumpPending
            } else {
                Info::Success
            };
            Ok(info)
        });
        self.complete_quiet(txn, result)
    }

    /// Current state of the table called `name`. Needs no handle.
    pub fn get_info(&self, name: &str) -> Result<TableInfo> {
        let reg = self.registry.lock();
        let reg_index = reg.locate_by_name(name).ok_or_else(|| InvalidNameSnafu { name }.build())?;
        let record = &reg.records[reg_index];
        let active = record.status.active.and_then(|id| reg.buffer(id));
        let options = record.config.options;
        Ok(TableInfo {
            size: record.config.size,
            num_users: reg.num_users(reg_index),
            file_time: active.map(|b| b.file_time).unwrap_or_default(),
            crc: active.map_or(0, |b| b.crc),
            time_of_last_update: record.status.time_of_last_update,
            last_file_loaded: record.status.last_file_loaded.clone(),
            table_loaded_once: record.loaded_once(),
            dump_only: options.dump_only(),
            double_buffered: options.double_buffered(),
            user_def_addr: options.user_def_addr(),
            critical: record.is_critical(),
        })
    }

    /// Declares that the owner changed the active contents in place.
    ///
    /// Refreshes the CRC, tells other readers the table was updated, marks
    /// the last-loaded name and mirrors critical tables to the CDS. Readers
    /// holding the address are not waited for.
    pub fn modified(&self, app: AppId, handle: TableHandle) -> Result<()> {
        let mut txn = Txn::init(&self.registry, app);
        let result = txn
            .start_from_handle(handle, CallerContext::OWNER_APP)
            .and_then(|()| self.mark_modified(&mut txn, handle));
        self.complete(txn, result, EventId::AccessError)
    }

    fn mark_modified(&self, txn: &mut Txn<'_>, handle: TableHandle) -> Result<()> {
        let reg_index = txn.reg_index()?;
        let now = self.clock.now();
        let max_path = self.config.max_path_len;
        let reg = txn.reg()?;
        let record = &reg.records[reg_index];
        let Some(active) = record.status.active else {
            return NeverLoadedSnafu { table: record.config.name.clone() }.fail();
        };
        let size = record.config.size;
        let reg_id = record.reg_id;
        let critical = record.is_critical();
        if let Some(buffer) = reg.buffer_mut(active) {
            if let Some(data) = buffer.data.as_ref() {
                buffer.crc = data.crc(size);
            }
        }

        let status = &mut reg.records[reg_index].status;
        status.is_modified = true;
        status.time_of_last_update = now;
        if !status.last_file_loaded.ends_with(MODIFIED_MARKER) {
            let mut marked = bounded(&status.last_file_loaded, max_path.saturating_sub(MODIFIED_MARKER.len()));
            marked.push_str(MODIFIED_MARKER);
            status.last_file_loaded = marked;
        }
        reg.mark_others_updated(reg_index, handle);
        if let (true, Some(reg_id)) = (critical, reg_id) {
            txn.schedule_critical_save(reg_id);
        }
        Ok(())
    }

    /// Asks for a message to be sent to the owner whenever the table needs
    /// validation or activation.
    pub fn notify_by_message(
        &self,
        app: AppId,
        handle: TableHandle,
        msg_id: u32,
        command_code: u16,
        parameter: u32,
    ) -> Result<()> {
        let mut txn = Txn::init(&self.registry, app);
        let result = txn.start_from_handle(handle, CallerContext::OWNER_APP).and_then(|()| {
            txn.record()?.notify = Some(NotifyDescriptor { msg_id, command_code, parameter });
            Ok(())
        });
        self.complete(txn, result, EventId::AccessError)
    }

    /// Runs the validation function for each validation requested on the
    /// caller's table.
    ///
    /// Results are stored for the next housekeeping pass. A successful
    /// validation of the load in progress marks it ready for activation.
    /// Returns `NoValidationPending` if nothing was requested.
    pub fn validate(&self, app: AppId, handle: TableHandle) -> Result<Info> {
        let mut txn = Txn::init(&self.registry, app);
        let result = txn
            .start_from_handle(handle, CallerContext::OWNER_APP)
            .and_then(|()| self.run_requested_validations(&mut txn));
        self.complete(txn, result, EventId::ValidateError)
    }

    fn run_requested_validations(&self, txn: &mut Txn<'_>) -> Result<Info> {
        let reg_index = txn.reg_index()?;
        let record = txn.record()?;
        let requests: SmallVec<[(ValidationId, bool); 2]> = [
            record.validate_active.map(|id| (id, true)),
            record.validate_inactive.map(|id| (id, false)),
        ]
        .into_iter()
        .flatten()
        .collect();
        if requests.is_empty() {
            return Ok(Info::NoValidationPending);
        }
        let validator = record.config.validator.clone();
        let size = record.config.size;

        for (id, active) in requests {
            let reg = txn.reg()?;
            let pending = reg.validation_index(id).is_some_and(|i| reg.validations[i].state == RecordState::Pending);
            let status = &reg.records[reg_index].status;
            let target = if active { status.active } else { status.next };
            let data = target.and_then(|b| reg.buffer(b)).and_then(|b| b.data.clone());
            let (true, Some(target), Some(data)) = (pending, target, data) else {
                debug!(validation = %id, "validation target gone; dropping request");
                reg.free_validation(id);
                clear_request(&mut reg.records[reg_index], id);
                continue;
            };

            txn.unlock_registry();
            let result = validator.as_ref().map_or(0, |validate| {
                let bytes = data.read();
                validate(&bytes[..size.min(bytes.len())])
            });
            let crc = data.crc(size);
            txn.lock_registry();

            txn.record()?;
            let reg = txn.reg()?;
            reg.complete_validation(id, crc, result);
            clear_request(&mut reg.records[reg_index], id);
            if !active && result == 0 && reg.records[reg_index].status.next == Some(target) {
                if let Some(buffer) = reg.buffer_mut(target) {
                    buffer.validated = true;
                }
            }
        }
        Ok(Info::Success)
    }

    /// The owner's periodic management call: validate, activate, then copy
    /// a pending dump.
    ///
    /// Returns `Updated` if new contents became active, `TableLocked` if an
    /// activation is blocked by a reader, else `Success`.
    pub fn manage(&self, app: AppId, handle: TableHandle) -> Result<Info> {
        self.validate(app, handle)?;
        let info = match self.update(app, handle)? {
            Info::Success => Info::Updated,
            Info::TableLocked => Info::TableLocked,
            _ => Info::Success,
        };
        self.dump_to_buffer(app, handle)?;
        Ok(info)
    }

    /// Copies a dump-only table's active contents into its pending dump.
    ///
    /// Returns `NoDumpPending` if no dump was requested.
    pub fn dump_to_buffer(&self, app: AppId, handle: TableHandle) -> Result<Info> {
        let mut txn = Txn::init(&self.registry, app);
        let result = txn.start_from_handle(handle, CallerContext::OWNER_APP).and_then(|()| {
            let reg_index = txn.reg_index()?;
            let reg = txn.reg()?;
            let record = &mut reg.records[reg_index];
            let Some(dump_id) = record.dump_control else {
                return Ok(Info::NoDumpPending);
            };
            let Some(dump_index) =
                reg.dump_index(dump_id).filter(|&i| reg.dumps[i].state == RecordState::Pending)
            else {
                reg.records[reg_index].dump_control = None;
                return Ok(Info::NoDumpPending);
            };
            let source = reg.records[reg_index]
                .status
                .active
                .ok_or_else(|| internal("dump pending on a table with no contents"))?;
            self.take_snapshot(reg, reg_index, dump_index, source)?;
            reg.records[reg_index].dump_control = None;
            Ok(Info::Success)
        });
        self.complete(txn, result, EventId::DumpError)
    }
}

/// Pins the active buffer for the resolved descriptor.
fn pin_active(txn: &mut Txn<'_>) -> Result<(TableData, Info)> {
    let reg_index = txn.reg_index()?;
    let desc_index = txn.desc_index()?;
    let reg = txn.reg()?;
    let record = &reg.records[reg_index];
    let table = record.config.name.clone();
    if record.owner.is_none() {
        return UnregisteredSnafu { table }.fail();
    }
    let Some(active) = record.status.active else {
        return NeverLoadedSnafu { table }.fail();
    };
    let data = reg
        .buffer(active)
        .and_then(|b| b.data.clone())
        .ok_or_else(|| internal("active buffer has no memory"))?;
    let descriptor = &mut reg.descriptors[desc_index];
    descriptor.lock_flag = true;
    descriptor.buffer_index = Some(active);
    let info = if std::mem::take(&mut descriptor.updated) { Info::Updated } else { Info::Success };
    Ok((data, info))
}

fn unpin(txn: &mut Txn<'_>) -> Result<Info> {
    let reg_index = txn.reg_index()?;
    let desc_index = txn.desc_index()?;
    let reg = txn.reg()?;
    let descriptor = &mut reg.descriptors[desc_index];
    descriptor.lock_flag = false;
    let updated = descriptor.updated;
    let record = &reg.records[reg_index];
    if record.owner.is_none() {
        return UnregisteredSnafu { table: record.config.name.clone() }.fail();
    }
    Ok(if updated { Info::Updated } else { Info::Success })
}

fn clear_request(record: &mut crate::registry::RegistryRecord, id: ValidationId) {
    if record.validate_active == Some(id) {
        record.validate_active = None;
    }
    if record.validate_inactive == Some(id) {
        record.validate_inactive = None;
    }
}
