//! Housekeeping data and the periodic housekeeping pass.
//!
//! Each pass writes at most one completed dump snapshot to its file and
//! delivers at most one completed validation result, then reports the
//! counters that telemetry downlinks.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use flight_tables_types::{MissionTime, StdFileHeader, SUBTYPE_TBL_IMG};
use serde::Serialize;
use tracing::{debug, warn};

use crate::app::AppId;
use crate::events::EventId;
use crate::services::TableServices;
use crate::validation::RecordState;

/// Running counters kept under the registry lock.
#[derive(Debug, Clone, Default)]
pub(crate) struct HousekeepingCounters {
    pub validation_success_count: u32,
    pub validation_failure_count: u32,
    pub validation_request_count: u32,
    pub last_validated_table: String,
    pub last_validated_crc: u32,
    pub last_validation_result: i32,
    pub last_updated_table: String,
    pub last_update_time: MissionTime,
    pub last_file_loaded: String,
    pub last_file_dumped: String,
    pub last_table_loaded: String,
}

/// Snapshot of table-services state for telemetry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HousekeepingData {
    /// Registered tables.
    pub num_tables: usize,
    /// Tables with a load in progress.
    pub num_load_pending: usize,
    /// Shared buffers not currently lent out.
    pub num_free_shared_bufs: usize,
    /// Validation results delivered with result 0.
    pub validation_success_count: u32,
    /// Validation results delivered with a non-zero result.
    pub validation_failure_count: u32,
    /// Validation requests accepted.
    pub validation_request_count: u32,
    /// Table of the most recently delivered validation.
    pub last_validated_table: String,
    /// CRC reported with the most recently delivered validation.
    pub last_validated_crc: u32,
    /// Result of the most recently delivered validation.
    pub last_validation_result: i32,
    /// Most recently activated table.
    pub last_updated_table: String,
    /// Time of the most recent activation.
    pub last_update_time: MissionTime,
    /// Source of the most recent successful load.
    pub last_file_loaded: String,
    /// Destination of the most recently written dump.
    pub last_file_dumped: String,
    /// Table of the most recent successful load.
    pub last_table_loaded: String,
}

struct SnapshotFile {
    table: String,
    path: String,
    owner: AppId,
    contents: Vec<u8>,
}

impl TableServices {
    /// Runs one housekeeping pass and returns the resulting telemetry data.
    pub fn housekeeping(&self) -> HousekeepingData {
        if let Some(snapshot) = self.take_performed_dump() {
            self.write_snapshot_file(snapshot);
        }
        self.deliver_validation_result();

        let reg = self.registry.lock();
        let hk = &reg.hk;
        HousekeepingData {
            num_tables: reg.used_count(),
            num_load_pending: reg.loads_pending(),
            num_free_shared_bufs: self.pool.free_count(),
            validation_success_count: hk.validation_success_count,
            validation_failure_count: hk.validation_failure_count,
            validation_request_count: hk.validation_request_count,
            last_validated_table: hk.last_validated_table.clone(),
            last_validated_crc: hk.last_validated_crc,
            last_validation_result: hk.last_validation_result,
            last_updated_table: hk.last_updated_table.clone(),
            last_update_time: hk.last_update_time,
            last_file_loaded: hk.last_file_loaded.clone(),
            last_file_dumped: hk.last_file_dumped.clone(),
            last_table_loaded: hk.last_table_loaded.clone(),
        }
    }

    /// Copies out the first performed dump and frees its record and buffer.
    fn take_performed_dump(&self) -> Option<SnapshotFile> {
        let mut reg = self.registry.lock();
        let index = reg.dumps.iter().position(|d| d.state == RecordState::Performed)?;
        let dump = reg.dumps[index].clone();
        let contents = dump
            .snapshot
            .and_then(|id| reg.buffer(id))
            .and_then(|b| {
                b.data.as_ref().map(|d| {
                    let bytes = d.read();
                    bytes[..b.content_size.min(bytes.len())].to_vec()
                })
            })
            .unwrap_or_default();
        if let Some(snapshot) = dump.snapshot {
            self.pool.release(&mut reg.buffers, snapshot);
        }
        reg.free_dump(index);
        Some(SnapshotFile {
            table: dump.table_name,
            path: dump.file_name,
            owner: dump.owner.unwrap_or(AppId::TABLE_SERVICES),
            contents,
        })
    }

    fn write_snapshot_file(&self, snapshot: SnapshotFile) {
        let overwritten = Path::new(&snapshot.path).exists();
        let mut header = StdFileHeader::new(SUBTYPE_TBL_IMG, "Table Dump Image");
        header.spacecraft_id = self.config.spacecraft_id;
        header.processor_id = self.config.processor_id;
        header.application_id = snapshot.owner.value();
        header.time = self.clock.now();
        let table_header = self.codec.encode_header(&snapshot.table, 0, snapshot.contents.len() as u32);

        let written = File::create(&snapshot.path).and_then(|mut file| {
            file.write_all(&header.to_bytes())?;
            file.write_all(&table_header)?;
            file.write_all(&snapshot.contents)?;
            file.sync_all()
        });
        match written {
            Ok(()) => {
                debug!(table = %snapshot.table, path = %snapshot.path, overwritten, "dump file written");
                self.registry.lock().hk.last_file_dumped = snapshot.path.clone();
                let id = if overwritten { EventId::DumpOverwritten } else { EventId::DumpWritten };
                self.emit_event(AppId::TABLE_SERVICES, &snapshot.table, id, snapshot.contents.len() as i64, 0);
            },
            Err(e) => {
                warn!(table = %snapshot.table, path = %snapshot.path, error = %e, "dump file write failed");
                let code = e.raw_os_error().map_or(-1, i64::from);
                self.emit_event(AppId::TABLE_SERVICES, &snapshot.table, EventId::DumpFileError, code, 0);
            },
        }
    }

    /// Moves the first performed validation result into the counters.
    fn deliver_validation_result(&self) {
        let delivered = {
            let mut reg = self.registry.lock();
            let Some(index) = reg.next_performed_validation() else {
                return;
            };
            let record = std::mem::take(&mut reg.validations[index]);
            let hk = &mut reg.hk;
            if record.result == 0 {
                hk.validation_success_count += 1;
            } else {
                hk.validation_failure_count += 1;
            }
            hk.last_validated_table = record.table_name.clone();
            hk.last_validated_crc = record.crc;
            hk.last_validation_result = record.result;
            record
        };
        let (id, data) = if delivered.result == 0 {
            (EventId::ValidationSuccess, i64::from(delivered.crc))
        } else {
            (EventId::ValidationFailure, i64::from(delivered.result))
        };
        self.emit_event(
            AppId::TABLE_SERVICES,
            &delivered.table_name,
            id,
            data,
            i64::from(delivered.active_buffer),
        );
    }
}
