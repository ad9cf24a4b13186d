//! Name-based management operations, run in the table-services context.

use flight_tables_cds::Error as CdsError;
use flight_tables_types::LoadBufferId;
use snafu::ResultExt;
use tracing::{info, warn};

use super::load::Filled;
use super::TableServices;
use crate::app::AppId;
use crate::error::{
    CdsAccessSnafu, CdsInUseSnafu, CdsNotFoundSnafu, CdsWrongTypeSnafu, DumpAlreadyPendingSnafu, DumpOnlySnafu,
    Info, InvalidNameSnafu, NeverLoadedSnafu, NoBufferAvailSnafu, NoInactiveBufferSnafu, NotValidatedSnafu,
    Result, TooManyDumpsSnafu, TooManyValidationsSnafu, internal,
};
use crate::events::EventId;
use crate::loader::{check_filename, peek_table_name};
use crate::notify::PendingNotification;
use crate::registry::Registry;
use crate::report::{NOT_OWNED, RegistryDumpJob, RegistryReport};
use crate::txn::{CallerContext, Txn};
use crate::validation::{BufferSelect, RecordState};

impl TableServices {
    /// Loads a table image into the working buffer of the table it names.
    ///
    /// An unactivated load already in progress is loaded over. Tables
    /// without a validation function are ready for activation at once;
    /// others wait for [`Self::validate_cmd`].
    pub fn load_file_cmd(&self, path: &str) -> Result<Info> {
        let mut txn = Txn::init(&self.registry, AppId::TABLE_SERVICES);
        let result = self.load_file_in_txn(&mut txn, path);
        self.complete(txn, result, EventId::LoadError)
    }

    fn load_file_in_txn(&self, txn: &mut Txn<'_>, path: &str) -> Result<Info> {
        check_filename(path, self.config.max_path_len)?;
        let name = peek_table_name(path, &self.config, self.codec.as_ref())?;
        txn.start_from_name(&name, CallerContext::TABLE_SERVICES)?;
        let target = self.load_target(txn)?;
        if target.options.dump_only() {
            return DumpOnlySnafu { table: target.name }.fail();
        }
        let work = self.begin_load(txn, true, self.codec.needs_scratch_buffer())?;
        txn.unlock_registry();
        let filled = self
            .fill_from_file(&work, &target, path)
            .map(|filled| Filled { crc: work.data.crc(target.size), ..filled });
        let filled = self.finish_load(txn, &work, &target, filled, target.validator.is_none())?;
        info!(table = %target.name, path, crc = filled.crc, "table image loaded");
        txn.add_event(EventId::LoadSuccess, i64::from(filled.crc), 0);
        Ok(filled.info)
    }

    /// Requests validation of a table's active or inactive buffer.
    ///
    /// Always answers `ValidationPending`: the result arrives through the
    /// next housekeeping pass. Without a validation function the request
    /// completes on the spot; otherwise the owner runs it from `validate`.
    pub fn validate_cmd(&self, name: &str, select: BufferSelect) -> Result<Info> {
        let mut txn = Txn::init(&self.registry, AppId::TABLE_SERVICES);
        let result = txn
            .start_from_name(name, CallerContext::TABLE_SERVICES)
            .and_then(|()| request_validation(&mut txn, name, select));
        self.complete(txn, result, EventId::ValidateError)
    }

    /// Asks the owner to activate a validated load.
    ///
    /// Returns `NoUpdatePending` when nothing is loading, otherwise
    /// `UpdatePending`; the owner's `update` or `manage` does the switch.
    pub fn activate_cmd(&self, name: &str) -> Result<Info> {
        let mut txn = Txn::init(&self.registry, AppId::TABLE_SERVICES);
        let result = txn.start_from_name(name, CallerContext::TABLE_SERVICES).and_then(|()| {
            let reg_index = txn.reg_index()?;
            let reg = txn.reg()?;
            reg.heal_stale_next(reg_index);
            let record = &reg.records[reg_index];
            let table = record.config.name.clone();
            if record.config.options.dump_only() {
                return DumpOnlySnafu { table }.fail();
            }
            if record.status.next.is_none() {
                return Ok(Info::NoUpdatePending);
            }
            if !reg.is_pending_activation(reg_index) {
                return NotValidatedSnafu { table }.fail();
            }
            notify_owner(&mut txn, reg_index)?;
            txn.add_event(EventId::LoadPending, 0, 0);
            Ok(Info::UpdatePending)
        });
        self.complete(txn, result, EventId::ActivateError)
    }

    /// Discards a table's load in progress.
    pub fn abort_load_cmd(&self, name: &str) -> Result<()> {
        let mut txn = Txn::init(&self.registry, AppId::TABLE_SERVICES);
        let result = txn
            .start_from_name(name, CallerContext::TABLE_SERVICES)
            .and_then(|()| self.abort_locked(&mut txn));
        self.complete(txn, result, EventId::AbortError)
    }

    /// Snapshots a table buffer for writing to `path`.
    ///
    /// Returns `Success` once the snapshot is taken, or `DumpPending` for a
    /// dump-only table, whose owner copies the data during its next
    /// management call. The file is written by the next housekeeping pass.
    pub fn dump_cmd(&self, name: &str, select: BufferSelect, path: &str) -> Result<Info> {
        let mut txn = Txn::init(&self.registry, AppId::TABLE_SERVICES);
        let result = check_filename(path, self.config.max_path_len)
            .and_then(|()| txn.start_from_name(name, CallerContext::TABLE_SERVICES))
            .and_then(|()| self.prepare_dump(&mut txn, select, path));
        self.complete(txn, result, EventId::DumpError)
    }

    fn prepare_dump(&self, txn: &mut Txn<'_>, select: BufferSelect, path: &str) -> Result<Info> {
        let reg_index = txn.reg_index()?;
        let reg = txn.reg()?;
        reg.heal_stale_next(reg_index);
        let record = &reg.records[reg_index];
        let table = record.config.name.clone();
        if record.dump_control.is_some() {
            return DumpAlreadyPendingSnafu { table }.fail();
        }
        let source = match select {
            BufferSelect::Active => record.status.active.ok_or_else(|| NeverLoadedSnafu { table: &table }.build())?,
            BufferSelect::Inactive => record
                .status
                .next
                .or_else(|| record.config.options.double_buffered().then_some(record.status.prev).flatten())
                .ok_or_else(|| NoInactiveBufferSnafu { table: &table }.build())?,
        };
        let owner = record.owner;
        let deferred = record.config.options.dump_only() && select == BufferSelect::Active;
        let reg_id = record.reg_id.ok_or_else(|| internal("dump of a free record"))?;

        let dump_id = reg.alloc_dump().ok_or_else(|| TooManyDumpsSnafu.build())?;
        let dump_index = reg.dump_index(dump_id).ok_or_else(|| internal("dump record vanished"))?;
        let Some(snapshot) = self.pool.acquire(&mut reg.buffers, reg_id) else {
            reg.free_dump(dump_index);
            return NoBufferAvailSnafu.fail();
        };
        let dump = &mut reg.dumps[dump_index];
        dump.source = Some(source);
        dump.snapshot = Some(snapshot);
        dump.table_name.clone_from(&table);
        dump.file_name = path.to_string();
        dump.reg_index = reg_index;
        dump.owner = owner;

        if deferred {
            reg.records[reg_index].dump_control = Some(dump_id);
            notify_owner(txn, reg_index)?;
            txn.add_event(EventId::DumpRequested, 0, 0);
            return Ok(Info::DumpPending);
        }
        if let Err(e) = self.take_snapshot(reg, reg_index, dump_index, source) {
            self.pool.release(&mut reg.buffers, snapshot);
            reg.free_dump(dump_index);
            return Err(e);
        }
        Ok(Info::Success)
    }

    /// Encodes buffer `source` into the dump's snapshot and marks it performed.
    pub(crate) fn take_snapshot(
        &self,
        reg: &mut Registry,
        reg_index: usize,
        dump_index: usize,
        source: LoadBufferId,
    ) -> Result<()> {
        let snapshot = reg.dumps[dump_index].snapshot.ok_or_else(|| internal("dump has no snapshot buffer"))?;
        let record = &reg.records[reg_index];
        let size = record.config.size;
        let name = record.config.name.clone();
        let src = reg.buffer(source).and_then(|b| b.data.clone()).ok_or_else(|| internal("dump source missing"))?;
        let dst = reg
            .buffer(snapshot)
            .and_then(|b| b.data.clone())
            .ok_or_else(|| internal("snapshot buffer missing"))?;
        let written = {
            let src = src.read();
            let mut dst = dst.write();
            let src = src.get(..size).ok_or_else(|| internal("dump source smaller than table"))?;
            self.codec.encode_output(&name, src, &mut dst)?
        };
        let crc = dst.crc(written);
        if let Some(buffer) = reg.buffer_mut(snapshot) {
            buffer.content_size = written;
            buffer.crc = crc;
        }
        reg.dumps[dump_index].state = RecordState::Performed;
        Ok(())
    }

    /// Writes one record per registered table to `path`, or to the
    /// configured default file, through the file writer.
    pub fn dump_registry_cmd(&self, path: Option<&str>) -> Result<()> {
        let txn = Txn::init(&self.registry, AppId::TABLE_SERVICES);
        let path = path.unwrap_or(self.config.default_registry_dump_file.as_str());
        let result = check_filename(path, self.config.max_path_len).and_then(|()| {
            let reports: Vec<RegistryReport> = {
                let reg = self.registry.lock();
                (0..reg.records.len())
                    .filter(|&i| reg.records[i].is_used())
                    .map(|i| self.report_for(&reg, i))
                    .collect()
            };
            let job = RegistryDumpJob::new(path.to_string(), &self.config, self.clock.now(), &reports, self.events.clone());
            self.writer.submit(Box::new(job))
        });
        self.complete(txn, result, EventId::RegistryDumpError)
    }

    /// Deletes the CDS block left behind by an unregistered critical table.
    pub fn delete_cds_cmd(&self, name: &str) -> Result<()> {
        let mut txn = Txn::init(&self.registry, AppId::TABLE_SERVICES);
        txn.table_name = name.to_string();
        let result = self.delete_cds_block(name);
        if result.is_ok() {
            txn.add_event(EventId::CdsDeleted, 0, 0);
        }
        self.complete(txn, result, EventId::CdsDeleteError)
    }

    fn delete_cds_block(&self, name: &str) -> Result<()> {
        let (Some(cds), true) = (self.cds.as_ref(), self.critical_enabled()) else {
            return CdsNotFoundSnafu { name }.fail();
        };
        if self.registry.lock().locate_by_name(name).is_some() {
            return CdsInUseSnafu { name }.fail();
        }
        let _io = self.cds_io.lock();
        match cds.delete_block(name, true) {
            Ok(()) => {},
            Err(CdsError::NotFound { .. }) => return CdsNotFoundSnafu { name }.fail(),
            Err(CdsError::WrongType { .. }) => return CdsWrongTypeSnafu { name }.fail(),
            Err(source) => return Err(source).context(CdsAccessSnafu),
        }
        let rows = {
            let mut reg = self.registry.lock();
            if let Some(row) = reg.critical_row(name) {
                reg.critical[row] = Default::default();
            }
            self.encode_critical_rows(&reg)
        };
        if let Err(e) = rows.and_then(|rows| self.write_critical_registry(&rows)) {
            warn!(table = name, error = %e, "critical table registry not updated after delete");
        }
        Ok(())
    }

    /// Registry entry for the table called `name`, as downlinked.
    pub fn registry_report(&self, name: &str) -> Result<RegistryReport> {
        let reg = self.registry.lock();
        let reg_index = reg.locate_by_name(name).ok_or_else(|| InvalidNameSnafu { name }.build())?;
        Ok(self.report_for(&reg, reg_index))
    }

    fn report_for(&self, reg: &Registry, reg_index: usize) -> RegistryReport {
        let record = &reg.records[reg_index];
        let options = record.config.options;
        let legacy = |id: Option<LoadBufferId>| id.map_or(-1, |id| reg.layout.legacy_index(id));
        let inactive = record.status.next.or(if options.double_buffered() { record.status.prev } else { None });
        let active = record.status.active.and_then(|id| reg.buffer(id));
        RegistryReport {
            name: record.config.name.clone(),
            owner: record.owner,
            owner_name: record
                .owner
                .and_then(|owner| self.apps.name(owner))
                .unwrap_or_else(|| NOT_OWNED.to_string()),
            size: record.config.size,
            crc: active.map_or(0, |b| b.crc),
            active_buffer: legacy(record.status.active),
            inactive_buffer: legacy(inactive),
            num_users: reg.num_users(reg_index),
            has_validator: record.config.validator.is_some(),
            table_loaded_once: record.loaded_once(),
            load_pending: reg.is_pending_activation(reg_index),
            dump_only: options.dump_only(),
            double_buffered: options.double_buffered(),
            user_def_addr: options.user_def_addr(),
            critical: record.is_critical(),
            file_time: active.map(|b| b.file_time).unwrap_or_default(),
            time_of_last_update: record.status.time_of_last_update,
            last_file_loaded: record.status.last_file_loaded.clone(),
        }
    }
}

/// Reserves a validation record and either completes it or hands it to the owner.
fn request_validation(txn: &mut Txn<'_>, name: &str, select: BufferSelect) -> Result<Info> {
    let reg_index = txn.reg_index()?;
    let active = select == BufferSelect::Active;
    let reg = txn.reg()?;
    let record = &reg.records[reg_index];
    let table = record.config.name.clone();
    let target = if active {
        record.status.active.ok_or_else(|| NeverLoadedSnafu { table: &table }.build())?
    } else {
        record.status.next.ok_or_else(|| NoInactiveBufferSnafu { table: &table }.build())?
    };
    let outstanding = if active { record.validate_active } else { record.validate_inactive };
    if outstanding.is_some() {
        return Ok(Info::ValidationPending);
    }
    let has_validator = record.config.validator.is_some();
    let size = record.config.size;

    let id = reg.alloc_validation(name, active).ok_or_else(|| TooManyValidationsSnafu.build())?;
    reg.hk.validation_request_count += 1;
    if !has_validator {
        let crc = reg.buffer(target).and_then(|b| b.data.as_ref()).map_or(0, |d| d.crc(size));
        reg.complete_validation(id, crc, 0);
        if !active {
            if let Some(buffer) = reg.buffer_mut(target) {
                buffer.validated = true;
            }
        }
        return Ok(Info::ValidationPending);
    }

    let record = &mut reg.records[reg_index];
    if active {
        record.validate_active = Some(id);
    } else {
        record.validate_inactive = Some(id);
    }
    notify_owner(txn, reg_index)?;
    txn.add_event(EventId::ValidationRequested, 0, 0);
    Ok(Info::ValidationPending)
}

/// Queues the owner's management notification, if it asked for one.
fn notify_owner(txn: &mut Txn<'_>, reg_index: usize) -> Result<()> {
    let record = &txn.reg()?.records[reg_index];
    if let (Some(owner), Some(notify)) = (record.owner, record.notify) {
        let table = record.config.name.clone();
        txn.notify(PendingNotification { owner, table, notify });
    }
    Ok(())
}
