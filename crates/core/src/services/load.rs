//! Load, activate and abort.
//!
//! A load reserves a working buffer under the registry lock, fills it with
//! the lock released (file or memory, through the codec), validates it, and
//! relocks to record the result. Activation then makes the working buffer
//! visible: the first load simply adopts it, later single-buffered loads copy
//! it into the active buffer, and double-buffered loads swap roles.

use flight_tables_types::{LoadBufferId, MissionTime, RegId, TableHandle, TableOptions};
use tracing::{debug, warn};

use super::TableServices;
use crate::app::AppId;
use crate::buffer::{next_dedicated_id, TableData};
use crate::error::{
    BadArgumentSnafu, DumpOnlySnafu, FileTooLargeSnafu, IllegalSrcTypeSnafu, Info, LoadInProgressSnafu,
    NoBufferAvailSnafu, NoLoadInProgressSnafu, Result, TableLockedSnafu, ValidationBadReturnSnafu,
    ValidationFailedSnafu, ZeroLengthLoadSnafu, internal,
};
use crate::events::EventId;
use crate::loader::{bounded, check_filename, TableImageFile};
use crate::registry::{Registry, TableValidator};
use crate::txn::{CallerContext, Txn};

/// Where a load takes its contents from.
#[derive(Debug, Clone, Copy)]
pub enum LoadSource<'a> {
    /// A table image file.
    File(&'a str),
    /// Caller-owned memory.
    ///
    /// Tables registered with a user-defined address adopt this memory
    /// without copying; any other table copies from it. The caller must not
    /// hold a lock guard on it during the call.
    Address(&'a TableData),
    /// Caller bytes, copied into the table.
    Bytes(&'a [u8]),
}

/// What a load needs to know about its table.
pub(crate) struct LoadTarget {
    pub name: String,
    pub size: usize,
    pub options: TableOptions,
    pub loaded_once: bool,
    pub validator: Option<TableValidator>,
}

/// A reserved working buffer and, for codecs that need one, a scratch buffer.
pub(crate) struct WorkingBuffer {
    pub id: LoadBufferId,
    pub data: TableData,
    pub scratch: Option<(LoadBufferId, TableData)>,
}

/// Result of filling a working buffer.
pub(crate) struct Filled {
    pub info: Info,
    pub source: String,
    pub file_time: MissionTime,
    pub crc: u32,
}

impl TableServices {
    /// Loads new contents into the caller's table and activates them.
    ///
    /// Returns the load classification (`Success`, `WarnPartialLoad`,
    /// `WarnShortFile`) or `TableLocked` if a reader pins the active buffer;
    /// in that case the validated contents stay pending until `update`.
    ///
    /// # Errors
    ///
    /// `LoadInProgress`, `DumpOnly`, `IllegalSrcType`, `TableLocked`,
    /// `NoBufferAvail`, any file or codec error, or the validation function's
    /// rejection (`ValidationFailed`, `ValidationBadReturn`). On error the
    /// table is unchanged.
    pub fn load(&self, app: AppId, handle: TableHandle, source: LoadSource<'_>) -> Result<Info> {
        let mut txn = Txn::init(&self.registry, app);
        let result = self.load_in_txn(&mut txn, handle, source);
        self.complete(txn, result, EventId::LoadError)
    }

    fn load_in_txn(&self, txn: &mut Txn<'_>, handle: TableHandle, source: LoadSource<'_>) -> Result<Info> {
        txn.start_from_handle(handle, CallerContext::OWNER_APP)?;
        let target = self.load_target(txn)?;
        let reg_index = txn.reg_index()?;
        let reg = txn.reg()?;
        reg.heal_stale_next(reg_index);
        if reg.records[reg_index].status.next.is_some() {
            return LoadInProgressSnafu { table: target.name }.fail();
        }
        if target.options.dump_only() && (!target.options.user_def_addr() || target.loaded_once) {
            return DumpOnlySnafu { table: target.name }.fail();
        }
        if target.options.user_def_addr() {
            let LoadSource::Address(data) = source else {
                return IllegalSrcTypeSnafu { table: target.name }.fail();
            };
            return self.adopt_user_address(txn, &target, data);
        }

        let needs_scratch = matches!(source, LoadSource::File(_)) && self.codec.needs_scratch_buffer();
        let work = self.begin_load(txn, false, needs_scratch)?;
        txn.unlock_registry();
        let filled = match source {
            LoadSource::File(path) => self.fill_from_file(&work, &target, path),
            LoadSource::Address(data) => {
                let label = data.address_label();
                let bytes = data.read();
                self.fill_from_memory(&work, &target, &bytes, label)
            },
            LoadSource::Bytes(bytes) => {
                self.fill_from_memory(&work, &target, bytes, format!("Addr {:p}", bytes.as_ptr()))
            },
        }
        .and_then(|filled| self.check_contents(&work, &target, filled));
        let filled = self.finish_load(txn, &work, &target, filled, true)?;
        txn.add_event(EventId::LoadSuccess, i64::from(filled.crc), 0);

        match self.update_locked(txn)? {
            Info::TableLocked => Ok(Info::TableLocked),
            _ => Ok(filled.info),
        }
    }

    /// Copies what a load needs out of the resolved record.
    pub(crate) fn load_target(&self, txn: &mut Txn<'_>) -> Result<LoadTarget> {
        let record = txn.record()?;
        Ok(LoadTarget {
            name: record.config.name.clone(),
            size: record.config.size,
            options: record.config.options,
            loaded_once: record.loaded_once(),
            validator: record.config.validator.clone(),
        })
    }

    /// Points a user-defined-address table at caller memory.
    fn adopt_user_address(&self, txn: &mut Txn<'_>, target: &LoadTarget, data: &TableData) -> Result<Info> {
        if data.len() < target.size {
            return BadArgumentSnafu {
                message: format!("address holds {} bytes, table needs {}", data.len(), target.size),
            }
            .fail();
        }
        let now = self.clock.now();
        let reg_index = txn.reg_index()?;
        let reg_id = txn.reg_id.ok_or_else(|| internal("transaction has no registry id"))?;
        let max_path = self.config.max_path_len;
        let label = data.address_label();
        let crc = data.crc(target.size);
        let reg = txn.reg()?;
        let index = reg.dedicated_index(reg_index, 0);
        let id = next_dedicated_id(&reg.layout, &reg.buffers, index)
            .ok_or_else(|| internal("dedicated buffer id space exhausted"))?;
        let buffer = &mut reg.buffers[index];
        buffer.data = Some(data.clone());
        buffer.alloc_size = 0;
        buffer.reset_for(id, reg_id);
        buffer.content_size = target.size;
        buffer.crc = crc;
        buffer.file_time = now;
        buffer.validated = true;
        buffer.data_source = bounded(&label, max_path);

        let status = &mut reg.records[reg_index].status;
        status.active = Some(id);
        status.time_of_last_update = now;
        status.last_file_loaded = bounded(&label, max_path);
        reg.mark_all_updated(reg_index);
        reg.hk.last_table_loaded.clone_from(&target.name);
        reg.hk.last_file_loaded = bounded(&label, max_path);
        txn.add_event(EventId::LoadSuccess, i64::from(crc), 0);
        Ok(Info::Success)
    }

    /// Reserves the working buffer and marks the load in progress.
    ///
    /// With `reuse`, an existing unactivated working buffer is loaded over
    /// instead of rejecting the request. Caller holds the registry lock.
    pub(crate) fn begin_load(&self, txn: &mut Txn<'_>, reuse: bool, needs_scratch: bool) -> Result<WorkingBuffer> {
        let reg_index = txn.reg_index()?;
        let reg_id = txn.reg_id.ok_or_else(|| internal("transaction has no registry id"))?;
        let reg = txn.reg()?;
        reg.heal_stale_next(reg_index);
        let table = reg.records[reg_index].config.name.clone();

        let id = match reg.records[reg_index].status.next {
            Some(next) if reuse => {
                let buffer = reg.buffer_mut(next).ok_or_else(|| internal("working buffer missing"))?;
                buffer.validated = false;
                if let Some(stale) = reg.records[reg_index].validate_inactive.take() {
                    reg.free_validation(stale);
                }
                next
            },
            Some(_) => return LoadInProgressSnafu { table }.fail(),
            None => self.reserve_working(reg, reg_index, reg_id)?,
        };
        let data = reg
            .buffer(id)
            .and_then(|b| b.data.clone())
            .ok_or_else(|| internal("working buffer has no memory"))?;

        let scratch = if needs_scratch {
            match self.pool.acquire(&mut reg.buffers, reg_id) {
                Some(scratch_id) => {
                    let scratch_data = reg
                        .buffer(scratch_id)
                        .and_then(|b| b.data.clone())
                        .ok_or_else(|| internal("shared buffer has no memory"))?;
                    Some((scratch_id, scratch_data))
                },
                None => {
                    self.discard_working(reg, reg_index, id);
                    return NoBufferAvailSnafu.fail();
                },
            }
        } else {
            None
        };
        reg.records[reg_index].status.next = Some(id);
        Ok(WorkingBuffer { id, data, scratch })
    }

    /// Picks and seeds a fresh working buffer for `reg_index`.
    fn reserve_working(&self, reg: &mut Registry, reg_index: usize, reg_id: RegId) -> Result<LoadBufferId> {
        let record = &reg.records[reg_index];
        let size = record.config.size;
        let double = record.config.options.double_buffered();
        let table = record.config.name.clone();

        let Some(active) = record.status.active else {
            let index = reg.dedicated_index(reg_index, 0);
            let id = next_dedicated_id(&reg.layout, &reg.buffers, index)
                .ok_or_else(|| internal("dedicated buffer id space exhausted"))?;
            let buffer = &mut reg.buffers[index];
            buffer.reset_for(id, reg_id);
            buffer.data.get_or_insert_with(|| TableData::zeroed(size)).clear_prefix(size);
            return Ok(id);
        };
        let active_index = reg.buffer_index(active).ok_or_else(|| internal("active buffer missing"))?;
        let active_data = reg.buffers[active_index]
            .data
            .clone()
            .ok_or_else(|| internal("active buffer has no memory"))?;

        let id = if double {
            let other = (0..2)
                .map(|slot| reg.dedicated_index(reg_index, slot))
                .find(|index| *index != active_index)
                .ok_or_else(|| internal("no inactive dedicated slot"))?;
            if reg.is_buffer_pinned(reg_index, other) {
                return TableLockedSnafu { table }.fail();
            }
            if reg.records[reg_index].status.prev.and_then(|p| reg.buffer_index(p)) == Some(other) {
                reg.records[reg_index].status.prev = None;
            }
            let id = next_dedicated_id(&reg.layout, &reg.buffers, other)
                .ok_or_else(|| internal("dedicated buffer id space exhausted"))?;
            let buffer = &mut reg.buffers[other];
            buffer.reset_for(id, reg_id);
            buffer.data.get_or_insert_with(|| TableData::zeroed(size));
            id
        } else {
            self.pool.acquire(&mut reg.buffers, reg_id).ok_or_else(|| NoBufferAvailSnafu.build())?
        };
        if let Some(data) = reg.buffer(id).and_then(|b| b.data.as_ref()) {
            data.copy_prefix_from(&active_data, size);
        }
        Ok(id)
    }

    /// Frees a working buffer and clears the load in progress.
    pub(crate) fn discard_working(&self, reg: &mut Registry, reg_index: usize, id: LoadBufferId) {
        if self.pool.is_shared(id) {
            self.pool.release(&mut reg.buffers, id);
        } else if let Some(buffer) = reg.buffer_mut(id) {
            buffer.set_free();
        }
        if reg.records[reg_index].status.next == Some(id) {
            reg.records[reg_index].status.next = None;
        }
    }

    /// Reads a table image into the working buffer. Runs unlocked.
    pub(crate) fn fill_from_file(&self, work: &WorkingBuffer, target: &LoadTarget, path: &str) -> Result<Filled> {
        check_filename(path, self.config.max_path_len)?;
        let codec = self.codec.as_ref();
        let mut image = TableImageFile::open(path, &self.config, codec)?;
        let encoded_size = codec.encoded_size(&target.name, target.size);
        image.check_target(&target.name, target.loaded_once, encoded_size, codec)?;
        let header = image.header.clone();
        let range = header.offset as usize..header.end() as usize;
        let out_of_range = || internal(format!("payload range {range:?} outside buffer", range = range.clone()));

        match &work.scratch {
            Some((_, scratch)) => {
                {
                    let src = work.data.read();
                    let mut dst = scratch.write();
                    let src = src.get(..target.size).ok_or_else(out_of_range)?;
                    let dst = dst.get_mut(..encoded_size).ok_or_else(out_of_range)?;
                    codec.encode_output(&target.name, src, dst)?;
                }
                {
                    let mut dst = scratch.write();
                    image.read_payload(dst.get_mut(range.clone()).ok_or_else(out_of_range)?)?;
                }
                let src = scratch.read();
                let mut dst = work.data.write();
                let src = src.get(..encoded_size).ok_or_else(out_of_range)?;
                let dst = dst.get_mut(..target.size).ok_or_else(out_of_range)?;
                codec.decode_input(&target.name, src, dst)?;
            },
            None => {
                let mut dst = work.data.write();
                image.read_payload(dst.get_mut(range.clone()).ok_or_else(out_of_range)?)?;
            },
        }
        Ok(Filled {
            info: codec.final_status(&header, encoded_size),
            source: path.to_string(),
            file_time: image.std_header.time,
            crc: 0,
        })
    }

    /// Copies caller bytes into the working buffer. Runs unlocked.
    fn fill_from_memory(
        &self,
        work: &WorkingBuffer,
        target: &LoadTarget,
        bytes: &[u8],
        source: String,
    ) -> Result<Filled> {
        if bytes.is_empty() {
            return ZeroLengthLoadSnafu { table: target.name.clone() }.fail();
        }
        if bytes.len() > target.size {
            return FileTooLargeSnafu {
                table: target.name.clone(),
                reason: format!("{} bytes exceeds table size {}", bytes.len(), target.size),
            }
            .fail();
        }
        let mut dst = work.data.write();
        dst.get_mut(..bytes.len())
            .ok_or_else(|| internal("working buffer smaller than table"))?
            .copy_from_slice(bytes);
        let info = if bytes.len() < target.size { Info::WarnShortFile } else { Info::Success };
        Ok(Filled { info, source, file_time: self.clock.now(), crc: 0 })
    }

    /// Computes the CRC and runs the validation function, zeroing rejected contents.
    pub(crate) fn check_contents(&self, work: &WorkingBuffer, target: &LoadTarget, filled: Filled) -> Result<Filled> {
        let crc = work.data.crc(target.size);
        if let Some(validator) = &target.validator {
            let code = {
                let bytes = work.data.read();
                validator(&bytes[..target.size.min(bytes.len())])
            };
            if code != 0 {
                work.data.clear_prefix(target.size);
                debug!(table = %target.name, code, "validation function rejected load");
                return if code < 0 {
                    ValidationFailedSnafu { code }.fail()
                } else {
                    ValidationBadReturnSnafu { code }.fail()
                };
            }
        }
        Ok(Filled { crc, ..filled })
    }

    /// Relocks and records a load's outcome on its working buffer.
    ///
    /// A failed load discards the working buffer. `validated` marks a
    /// successful load ready for activation.
    pub(crate) fn finish_load(
        &self,
        txn: &mut Txn<'_>,
        work: &WorkingBuffer,
        target: &LoadTarget,
        outcome: Result<Filled>,
        validated: bool,
    ) -> Result<Filled> {
        txn.lock_registry();
        if let Some((scratch, _)) = work.scratch {
            let reg = txn.reg()?;
            self.pool.release(&mut reg.buffers, scratch);
        }
        let reg_index = txn.reg_index()?;
        txn.record()?;
        let max_path = self.config.max_path_len;
        let reg = txn.reg()?;
        let still_ours = reg.records[reg_index].status.next == Some(work.id) && reg.buffer(work.id).is_some();
        if !still_ours {
            warn!(table = %target.name, buffer = %work.id, "working buffer released during load");
            return outcome.and_then(|_| NoLoadInProgressSnafu { table: target.name.clone() }.fail());
        }
        let filled = match outcome {
            Ok(filled) => filled,
            Err(e) => {
                self.discard_working(reg, reg_index, work.id);
                return Err(e);
            },
        };
        let source = bounded(&filled.source, max_path);
        let buffer = reg.buffer_mut(work.id).ok_or_else(|| internal("working buffer missing"))?;
        buffer.content_size = target.size;
        buffer.crc = filled.crc;
        buffer.file_time = filled.file_time;
        buffer.data_source.clone_from(&source);
        buffer.validated = validated;
        reg.hk.last_file_loaded = source;
        reg.hk.last_table_loaded.clone_from(&target.name);
        Ok(filled)
    }

    /// Makes the caller's pending load active.
    ///
    /// Returns `Success` once activated, `NoUpdatePending` if nothing
    /// validated is waiting, or `TableLocked` if a reader pins the buffer the
    /// new contents must be copied into.
    ///
    /// # Errors
    ///
    /// `InvalidHandle` or `NoAccess` if the caller does not own the table.
    pub fn update(&self, app: AppId, handle: TableHandle) -> Result<Info> {
        let mut txn = Txn::init(&self.registry, app);
        let result = txn
            .start_from_handle(handle, CallerContext::OWNER_APP)
            .and_then(|()| self.update_locked(&mut txn));
        self.complete(txn, result, EventId::UpdateError)
    }

    /// Activates the validated working buffer. Caller holds the registry lock.
    pub(crate) fn update_locked(&self, txn: &mut Txn<'_>) -> Result<Info> {
        let reg_index = txn.reg_index()?;
        let now = self.clock.now();
        let reg = txn.reg()?;
        reg.heal_stale_next(reg_index);
        if !reg.is_pending_activation(reg_index) {
            return Ok(Info::NoUpdatePending);
        }
        let record = &reg.records[reg_index];
        let (Some(next), Some(reg_id)) = (record.status.next, record.reg_id) else {
            return Ok(Info::NoUpdatePending);
        };
        let size = record.config.size;
        let double = record.config.options.double_buffered();
        let name = record.config.name.clone();

        let active = record.status.active;
        let new_active = match active {
            None => next,
            Some(active) if double => {
                reg.records[reg_index].status.prev = Some(active);
                next
            },
            Some(active) => {
                let active_index = reg.buffer_index(active).ok_or_else(|| internal("active buffer missing"))?;
                if reg.is_buffer_pinned(reg_index, active_index) {
                    debug!(table = %name, "activation deferred; active buffer in use");
                    return Ok(Info::TableLocked);
                }
                let next_buffer = reg.buffer(next).cloned().ok_or_else(|| internal("working buffer missing"))?;
                let target = &mut reg.buffers[active_index];
                if let (Some(dst), Some(src)) = (target.data.as_ref(), next_buffer.data.as_ref()) {
                    dst.copy_prefix_from(src, size);
                }
                target.crc = next_buffer.crc;
                target.file_time = next_buffer.file_time;
                target.content_size = next_buffer.content_size;
                target.data_source.clone_from(&next_buffer.data_source);
                target.validated = true;
                self.pool.release(&mut reg.buffers, next);
                active
            },
        };

        let data_source = reg.buffer(new_active).map(|b| b.data_source.clone()).unwrap_or_default();
        let record = &mut reg.records[reg_index];
        record.status.active = Some(new_active);
        record.status.next = None;
        record.status.time_of_last_update = now;
        record.status.last_file_loaded = data_source;
        record.status.is_modified = false;
        let critical = record.is_critical();
        reg.mark_all_updated(reg_index);
        reg.hk.last_updated_table = name;
        reg.hk.last_update_time = now;
        if critical {
            txn.schedule_critical_save(reg_id);
        }
        txn.add_event(EventId::UpdateSuccess, 0, 0);
        Ok(Info::Success)
    }

    /// Discards the caller's load in progress.
    ///
    /// # Errors
    ///
    /// `NoLoadInProgress` if there is nothing to abort.
    pub fn abort_load(&self, app: AppId, handle: TableHandle) -> Result<()> {
        let mut txn = Txn::init(&self.registry, app);
        let result = txn
            .start_from_handle(handle, CallerContext::OWNER_APP)
            .and_then(|()| self.abort_locked(&mut txn));
        self.complete(txn, result, EventId::AbortError)
    }

    /// Discards the working buffer and any pending inactive validation.
    pub(crate) fn abort_locked(&self, txn: &mut Txn<'_>) -> Result<()> {
        let reg_index = txn.reg_index()?;
        let reg = txn.reg()?;
        reg.heal_stale_next(reg_index);
        let record = &mut reg.records[reg_index];
        let Some(next) = record.status.next else {
            return NoLoadInProgressSnafu { table: record.config.name.clone() }.fail();
        };
        if let Some(validation) = record.validate_inactive.take() {
            reg.free_validation(validation);
        }
        self.discard_working(reg, reg_index, next);
        txn.add_event(EventId::LoadAborted, 0, 0);
        Ok(())
    }
}
