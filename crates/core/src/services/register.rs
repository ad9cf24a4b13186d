//! Registration, sharing and teardown of tables.

use flight_tables_cds::{BlockKind, BlockStatus};
use flight_tables_types::{MissionTime, RegId, TableHandle, TableOptions};
use tracing::{debug, info, warn};

use super::TableServices;
use crate::app::AppId;
use crate::buffer::{next_dedicated_id, TableData};
use crate::critical::CriticalTableEntry;
use crate::error::{
    BadArgumentSnafu, DuplicateDiffSizeSnafu, DuplicateNotOwnedSnafu, HandlesFullSnafu, Info,
    InvalidNameSnafu, InvalidOptionsSnafu, InvalidSizeSnafu, RegistryFullSnafu, Result, internal,
};
use crate::events::EventId;
use crate::registry::{Registry, RegistryRecord, TableConfig, TableValidator};
use crate::txn::{CallerContext, Txn};
use crate::validation::RecordState;

/// Critical-table work left for after the registry lock is released.
struct CriticalRequest {
    reg_id: RegId,
    name: String,
    size: usize,
}

impl TableServices {
    /// Registers table `name` of `size` bytes for `app`.
    ///
    /// Returns the caller's handle and one of `Success`, `WarnDuplicate` (the
    /// same application repeated an identical registration), `WarnNotCritical`
    /// (critical storage was refused) or `RecoveredTable` (contents restored
    /// from the critical data store).
    ///
    /// # Errors
    ///
    /// `InvalidName`, `InvalidOptions`, `InvalidSize`, the codec's
    /// configuration error, `DuplicateNotOwned`, `DuplicateDiffSize`,
    /// `RegistryFull` or `HandlesFull`.
    pub fn register(
        &self,
        app: AppId,
        name: &str,
        size: usize,
        options: TableOptions,
        validator: Option<TableValidator>,
    ) -> Result<(TableHandle, Info)> {
        let mut txn = Txn::init(&self.registry, app);
        txn.table_name = name.to_string();
        let result = self.register_in_txn(&mut txn, name, size, options, validator);
        self.complete(txn, result, EventId::RegisterError)
    }

    fn register_in_txn(
        &self,
        txn: &mut Txn<'_>,
        name: &str,
        size: usize,
        options: TableOptions,
        validator: Option<TableValidator>,
    ) -> Result<(TableHandle, Info)> {
        if name.is_empty() || name.len() > self.config.max_table_name_len || name.contains('.') {
            return InvalidNameSnafu { name }.fail();
        }
        let qualified = self
            .apps
            .qualified_name(txn.caller, name)
            .ok_or_else(|| BadArgumentSnafu { message: format!("unknown application {}", txn.caller) }.build())?;
        txn.table_name.clone_from(&qualified);
        if !options.is_valid() {
            return InvalidOptionsSnafu { options: options.bits() }.fail();
        }
        let max = if options.double_buffered() {
            self.config.max_dbl_table_size
        } else {
            self.config.max_sngl_table_size
        };
        if size == 0 || size > max {
            return InvalidSizeSnafu { size, max }.fail();
        }
        self.codec.validate_config(&qualified, size)?;

        txn.lock_registry();
        let caller = txn.caller;
        let reg = txn.reg()?;
        if let Some(reg_index) = reg.locate_by_name(&qualified) {
            let (handle, info) = claim_existing(reg, reg_index, caller, size, options)?;
            txn.reg_index = Some(reg_index);
            txn.handle = Some(handle);
            if info == Info::Success {
                txn.add_event(EventId::Registered, i64::from(handle.value()), size as i64);
            }
            return Ok((handle, info));
        }
        let (handle, reg_index) = create_record(reg, caller, &qualified, size, options, validator)?;
        let reg_id = reg.records[reg_index].reg_id;
        txn.reg_index = Some(reg_index);
        txn.reg_id = reg_id;
        txn.handle = Some(handle);
        txn.add_event(EventId::Registered, i64::from(handle.value()), size as i64);

        let wants_critical = options.critical() && reg_id.is_some();
        txn.unlock_registry();
        let info = match (wants_critical, reg_id) {
            (true, Some(reg_id)) if self.critical_enabled() => {
                self.attach_critical(txn, CriticalRequest { reg_id, name: qualified, size })?
            },
            (true, Some(_)) => {
                self.drop_critical_option(txn)?;
                Info::WarnNotCritical
            },
            _ => Info::Success,
        };
        Ok((handle, info))
    }

    /// Clears the critical option on a table whose storage was refused.
    fn drop_critical_option(&self, txn: &mut Txn<'_>) -> Result<()> {
        txn.lock_registry();
        let record = txn.record()?;
        record.config.options.remove(TableOptions::CRITICAL);
        record.cds_handle = None;
        txn.unlock_registry();
        txn.add_event(EventId::NotCritical, 0, 0);
        Ok(())
    }

    /// Gives a newly registered critical table its CDS block, restoring
    /// earlier contents when the block already exists.
    fn attach_critical(&self, txn: &mut Txn<'_>, request: CriticalRequest) -> Result<Info> {
        let Some(cds) = self.cds.clone() else {
            return Err(internal("critical table without a critical data store"));
        };
        let (handle, status) = match cds.register_block(&request.name, request.size, BlockKind::Table) {
            Ok(registered) => registered,
            Err(e) => {
                warn!(table = %request.name, error = %e, "CDS refused critical table");
                self.drop_critical_option(txn)?;
                return Ok(Info::WarnNotCritical);
            },
        };

        let mut restored = None;
        if status == BlockStatus::AlreadyExists {
            txn.lock_registry();
            let reg = txn.reg()?;
            let prior = reg.critical_row(&request.name).map(|row| PriorRow::from(&reg.critical[row]));
            txn.unlock_registry();
            if let Some(prior) = prior.filter(|p| p.loaded_once) {
                let mut contents = vec![0u8; request.size];
                match cds.read_block(handle, &mut contents) {
                    Ok(()) => restored = Some((prior, contents)),
                    Err(e) => {
                        warn!(table = %request.name, error = %e, "critical table contents unreadable; registering fresh");
                        txn.add_event(EventId::AccessError, i64::from(crate::error::ErrorCode::CdsAccess.as_i32()), 0);
                    },
                }
            }
        }

        txn.lock_registry();
        let now = self.clock.now();
        let reg_index = txn.reg_index()?;
        txn.record()?;
        let reg = txn.reg()?;
        let Some(row) = reg.claim_critical_row(&request.name, handle) else {
            txn.unlock_registry();
            warn!(table = %request.name, "critical table registry full");
            self.drop_critical_option(txn)?;
            return Ok(Info::WarnNotCritical);
        };
        reg.records[reg_index].cds_handle = Some(handle);
        let info = match restored {
            Some((prior, contents)) => {
                restore_contents(reg, reg_index, request.reg_id, &prior, &contents, now)?;
                txn.add_event(EventId::Recovered, 0, 0);
                info!(table = %request.name, "critical table recovered");
                Info::RecoveredTable
            },
            None => {
                let entry = &mut reg.critical[row];
                entry.loaded_once = false;
                entry.file_time = Default::default();
                entry.time_of_last_update = Default::default();
                entry.last_file_loaded.clear();
                Info::Success
            },
        };
        let rows = self.encode_critical_rows(txn.reg()?);
        txn.unlock_registry();

        let _io = self.cds_io.lock();
        if let Err(e) = rows.and_then(|rows| self.write_critical_registry(&rows)) {
            warn!(table = %request.name, error = %e, "failed to record critical table");
            txn.add_event(EventId::CriticalSaveFailed, 0, 0);
        }
        Ok(info)
    }

    /// Opens a handle on a table registered by any application.
    ///
    /// # Errors
    ///
    /// `InvalidName` if no such table exists, `HandlesFull` if no handle is free.
    pub fn share(&self, app: AppId, name: &str) -> Result<TableHandle> {
        let mut txn = Txn::init(&self.registry, app);
        let result = self.share_in_txn(&mut txn, name);
        self.complete(txn, result, EventId::ShareError)
    }

    fn share_in_txn(&self, txn: &mut Txn<'_>, name: &str) -> Result<TableHandle> {
        if self.apps.name(txn.caller).is_none() {
            return BadArgumentSnafu { message: format!("unknown application {}", txn.caller) }.fail();
        }
        txn.start_from_name(name, CallerContext::all())?;
        let reg_index = txn.reg_index()?;
        let caller = txn.caller;
        let reg = txn.reg()?;
        let handle = reg.alloc_descriptor(caller, reg_index).ok_or_else(|| HandlesFullSnafu.build())?;
        reg.link_descriptor(handle);
        txn.handle = Some(handle);
        txn.add_event(EventId::Shared, i64::from(handle.value()), 0);
        Ok(handle)
    }

    /// Releases `handle`.
    ///
    /// When the owner unregisters, the table loses its owner; the record and
    /// its buffers are freed once no other application holds a handle.
    ///
    /// # Errors
    ///
    /// `InvalidHandle` or `NoAccess` if the handle is not the caller's.
    pub fn unregister(&self, app: AppId, handle: TableHandle) -> Result<()> {
        let mut txn = Txn::init(&self.registry, app);
        let result = self.unregister_in_txn(&mut txn, handle);
        self.complete(txn, result, EventId::UnregisterError)
    }

    fn unregister_in_txn(&self, txn: &mut Txn<'_>, handle: TableHandle) -> Result<()> {
        txn.start_from_handle(handle, CallerContext::ANY_APP | CallerContext::TABLE_SERVICES)?;
        let reg_index = txn.reg_index()?;
        let caller = txn.caller;
        let destroyed = self.release_handle(txn.reg()?, reg_index, handle, caller);
        txn.add_event(EventId::Unregistered, i64::from(handle.value()), i64::from(destroyed));
        Ok(())
    }

    /// Drops one descriptor and frees the record if nobody is left.
    ///
    /// Returns true if the registry record was destroyed.
    fn release_handle(&self, reg: &mut Registry, reg_index: usize, handle: TableHandle, app: AppId) -> bool {
        if reg.records[reg_index].owner == Some(app) {
            reg.records[reg_index].owner = None;
        }
        reg.free_descriptor(handle);
        if reg.num_users(reg_index) == 0 && reg.records[reg_index].owner.is_none() {
            self.destroy_record(reg, reg_index);
            return true;
        }
        false
    }

    /// Frees a registry record and every buffer and record attached to it.
    ///
    /// The critical-table row is kept so the table can be recovered.
    fn destroy_record(&self, reg: &mut Registry, reg_index: usize) {
        let record = std::mem::take(&mut reg.records[reg_index]);
        debug!(table = %record.config.name, "registry record freed");
        if let Some(next) = record.status.next {
            self.pool.release(&mut reg.buffers, next);
        }
        if let Some(dump) = record.dump_control.and_then(|id| reg.dump_index(id)) {
            if let Some(snapshot) = reg.dumps[dump].snapshot {
                self.pool.release(&mut reg.buffers, snapshot);
            }
            reg.free_dump(dump);
        }
        for id in [record.validate_active, record.validate_inactive].into_iter().flatten() {
            reg.free_validation(id);
        }
        for slot in 0..2 {
            let index = reg.dedicated_index(reg_index, slot);
            reg.buffers[index].deallocate();
        }
    }

    /// Releases everything held by an application that is exiting.
    ///
    /// Pending dumps the application owns are dropped, then each of its
    /// handles is unregistered.
    pub fn clean_up_app(&self, app: AppId) {
        let mut reg = self.registry.lock();
        for index in 0..reg.dumps.len() {
            let dump = &reg.dumps[index];
            if dump.state == RecordState::Pending && dump.owner == Some(app) {
                if let Some(snapshot) = dump.snapshot {
                    self.pool.release(&mut reg.buffers, snapshot);
                }
                reg.free_dump(index);
            }
        }
        let handles: Vec<(TableHandle, usize)> = reg
            .descriptors
            .iter()
            .filter(|d| d.app == app)
            .filter_map(|d| d.handle.map(|h| (h, d.reg_index)))
            .collect();
        for (handle, reg_index) in &handles {
            self.release_handle(&mut reg, *reg_index, *handle, app);
        }
        for reg_index in 0..reg.records.len() {
            let record = &reg.records[reg_index];
            if record.is_used() && record.owner == Some(app) {
                reg.records[reg_index].owner = None;
                if reg.num_users(reg_index) == 0 {
                    self.destroy_record(&mut reg, reg_index);
                }
            }
        }
        debug!(%app, handles = handles.len(), "application resources released");
    }
}

/// Prior critical-table state, copied out of its registry row.
struct PriorRow {
    loaded_once: bool,
    file_time: MissionTime,
    time_of_last_update: MissionTime,
    last_file_loaded: String,
}

impl From<&CriticalTableEntry> for PriorRow {
    fn from(entry: &CriticalTableEntry) -> Self {
        Self {
            loaded_once: entry.loaded_once,
            file_time: entry.file_time,
            time_of_last_update: entry.time_of_last_update,
            last_file_loaded: entry.last_file_loaded.clone(),
        }
    }
}

/// Handles a registration of a name that is already in the registry.
fn claim_existing(
    reg: &mut Registry,
    reg_index: usize,
    caller: AppId,
    size: usize,
    options: TableOptions,
) -> Result<(TableHandle, Info)> {
    let record = &reg.records[reg_index];
    let name = record.config.name.clone();
    let registered = record.config.size;
    let same_shape = registered == size && record.config.options == options;
    match record.owner {
        Some(owner) if owner != caller => DuplicateNotOwnedSnafu { name }.fail(),
        _ if !same_shape => {
            DuplicateDiffSizeSnafu { name, registered, requested: size }.fail()
        },
        Some(_) => {
            let handle = match reg.handle_of(reg_index, caller) {
                Some(handle) => handle,
                None => open_descriptor(reg, caller, reg_index)?,
            };
            Ok((handle, Info::WarnDuplicate))
        },
        None => {
            // Abandoned by its previous owner while others still held handles.
            let handle = open_descriptor(reg, caller, reg_index)?;
            reg.records[reg_index].owner = Some(caller);
            Ok((handle, Info::Success))
        },
    }
}

fn open_descriptor(reg: &mut Registry, app: AppId, reg_index: usize) -> Result<TableHandle> {
    let handle = reg.alloc_descriptor(app, reg_index).ok_or_else(|| HandlesFullSnafu.build())?;
    reg.link_descriptor(handle);
    Ok(handle)
}

/// Allocates a registry record, the owner's descriptor and the dedicated buffers.
fn create_record(
    reg: &mut Registry,
    owner: AppId,
    name: &str,
    size: usize,
    options: TableOptions,
    validator: Option<TableValidator>,
) -> Result<(TableHandle, usize)> {
    let reg_index = reg.alloc_next().ok_or_else(|| RegistryFullSnafu.build())?;
    let Some(handle) = reg.alloc_descriptor(owner, reg_index) else {
        reg.records[reg_index] = RegistryRecord::default();
        return HandlesFullSnafu.fail();
    };
    let reg_id = reg.records[reg_index].reg_id.ok_or_else(|| internal("allocated record has no id"))?;
    {
        let record = &mut reg.records[reg_index];
        record.owner = Some(owner);
        record.config = TableConfig { name: name.to_string(), size, options, validator };
    }
    reg.link_descriptor(handle);

    if !options.user_def_addr() {
        let slots = if options.double_buffered() { 2 } else { 1 };
        for slot in 0..slots {
            let index = reg.dedicated_index(reg_index, slot);
            let buffer = &mut reg.buffers[index];
            buffer.set_free();
            buffer.data = Some(TableData::zeroed(size));
            buffer.alloc_size = size;
        }
        if options.dump_only() {
            // Dump-only contents are produced in place by the owner.
            let index = reg.dedicated_index(reg_index, 0);
            let id = next_dedicated_id(&reg.layout, &reg.buffers, index)
                .ok_or_else(|| internal("dedicated buffer id space exhausted"))?;
            let buffer = &mut reg.buffers[index];
            buffer.reset_for(id, reg_id);
            buffer.content_size = size;
            buffer.validated = true;
            reg.records[reg_index].status.active = Some(id);
        }
    }
    Ok((handle, reg_index))
}

/// Installs recovered contents as the active buffer of a freshly registered table.
fn restore_contents(
    reg: &mut Registry,
    reg_index: usize,
    reg_id: RegId,
    prior: &PriorRow,
    contents: &[u8],
    now: MissionTime,
) -> Result<()> {
    let size = reg.records[reg_index].config.size;
    let index = reg.dedicated_index(reg_index, 0);
    let id = next_dedicated_id(&reg.layout, &reg.buffers, index)
        .ok_or_else(|| internal("dedicated buffer id space exhausted"))?;
    let buffer = &mut reg.buffers[index];
    let data = buffer.data.get_or_insert_with(|| TableData::zeroed(size)).clone();
    data.write()[..contents.len().min(size)].copy_from_slice(&contents[..contents.len().min(size)]);
    buffer.reset_for(id, reg_id);
    buffer.content_size = size;
    buffer.crc = data.crc(size);
    buffer.file_time = prior.file_time;
    buffer.validated = true;
    buffer.data_source.clone_from(&prior.last_file_loaded);

    let status = &mut reg.records[reg_index].status;
    status.active = Some(id);
    status.time_of_last_update = if prior.time_of_last_update.is_zero() { now } else { prior.time_of_last_update };
    status.last_file_loaded.clone_from(&prior.last_file_loaded);
    Ok(())
}
