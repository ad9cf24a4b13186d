//! Per-table reports and the registry dump file.

use std::sync::Arc;

use flight_tables_types::{MissionTime, StdFileHeader, SUBTYPE_TBL_REG, TableServicesConfig};
use serde::Serialize;
use tracing::{info, warn};

use crate::app::AppId;
use crate::events::{EventId, EventSink, TableEvent};
use crate::writer::{FileJob, JobSummary};

/// Current state of one table, as returned by `get_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableInfo {
    pub size: usize,
    pub num_users: usize,
    pub file_time: MissionTime,
    pub crc: u32,
    pub time_of_last_update: MissionTime,
    pub last_file_loaded: String,
    pub table_loaded_once: bool,
    pub dump_only: bool,
    pub double_buffered: bool,
    pub user_def_addr: bool,
    pub critical: bool,
}

/// Registry entry as reported to the ground.
///
/// Buffer references use the legacy downlink numbering: shared buffers are
/// their pool slot, dedicated buffers are `-3` and `-2`, and `-1` means none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryReport {
    pub name: String,
    pub owner: Option<AppId>,
    pub owner_name: String,
    pub size: usize,
    pub crc: u32,
    pub active_buffer: i32,
    pub inactive_buffer: i32,
    pub num_users: usize,
    pub has_validator: bool,
    pub table_loaded_once: bool,
    pub load_pending: bool,
    pub dump_only: bool,
    pub double_buffered: bool,
    pub user_def_addr: bool,
    pub critical: bool,
    pub file_time: MissionTime,
    pub time_of_last_update: MissionTime,
    pub last_file_loaded: String,
}

/// Owner name written for tables whose owner has unregistered.
pub const NOT_OWNED: &str = "--UNOWNED--";

impl RegistryReport {
    /// Fixed-layout, big-endian record used in registry dump files.
    pub fn to_record(&self, config: &TableServicesConfig) -> Vec<u8> {
        let mut out = Vec::with_capacity(record_len(config));
        out.extend_from_slice(&(self.size as u32).to_be_bytes());
        out.extend_from_slice(&self.crc.to_be_bytes());
        out.extend_from_slice(&self.active_buffer.to_be_bytes());
        out.extend_from_slice(&self.inactive_buffer.to_be_bytes());
        out.extend_from_slice(&(self.num_users as u32).to_be_bytes());
        out.extend_from_slice(&self.time_of_last_update.seconds.to_be_bytes());
        out.extend_from_slice(&self.time_of_last_update.subseconds.to_be_bytes());
        out.extend_from_slice(&self.file_time.seconds.to_be_bytes());
        out.extend_from_slice(&self.file_time.subseconds.to_be_bytes());
        out.extend_from_slice(&[
            u8::from(self.has_validator),
            u8::from(self.table_loaded_once),
            u8::from(self.load_pending),
            u8::from(self.dump_only),
            u8::from(self.double_buffered),
            u8::from(self.user_def_addr),
            u8::from(self.critical),
            0,
        ]);
        put_padded(&mut out, &self.name, config.max_full_name_len() + 1);
        put_padded(&mut out, &self.last_file_loaded, config.max_path_len);
        put_padded(&mut out, &self.owner_name, config.max_app_name_len + 1);
        out
    }
}

/// Length of one registry dump record.
pub fn record_len(config: &TableServicesConfig) -> usize {
    44 + config.max_full_name_len() + 1 + config.max_path_len + config.max_app_name_len + 1
}

/// Writes `text` NUL-padded into a `width`-byte field, truncating so a NUL remains.
fn put_padded(out: &mut Vec<u8>, text: &str, width: usize) {
    let n = text.len().min(width.saturating_sub(1));
    out.extend_from_slice(&text.as_bytes()[..n]);
    out.resize(out.len() + (width - n), 0);
}

/// Background-writer job producing a registry dump file.
pub(crate) struct RegistryDumpJob {
    path: String,
    header: StdFileHeader,
    records: Vec<Vec<u8>>,
    events: Arc<dyn EventSink>,
}

impl RegistryDumpJob {
    pub fn new(
        path: String,
        config: &TableServicesConfig,
        time: MissionTime,
        reports: &[RegistryReport],
        events: Arc<dyn EventSink>,
    ) -> Self {
        let mut header = StdFileHeader::new(SUBTYPE_TBL_REG, "Table Registry");
        header.spacecraft_id = config.spacecraft_id;
        header.processor_id = config.processor_id;
        header.time = time;
        let records = reports.iter().map(|r| r.to_record(config)).collect();
        Self { path, header, records, events }
    }

    fn emit(&self, id: EventId, d1: i64, d2: i64) {
        self.events.send_event(&TableEvent {
            id,
            severity: id.severity(),
            app: AppId::TABLE_SERVICES,
            table: String::new(),
            data: [d1, d2],
        });
    }
}

impl FileJob for RegistryDumpJob {
    fn path(&self) -> &str {
        &self.path
    }

    fn header(&mut self) -> Vec<u8> {
        self.header.to_bytes().to_vec()
    }

    fn next_record(&mut self, index: usize) -> Option<Vec<u8>> {
        self.records.get(index).cloned()
    }

    fn complete(&mut self, result: std::io::Result<JobSummary>) {
        match result {
            Ok(summary) => {
                info!(path = %self.path, records = summary.records, overwritten = summary.overwritten, "registry dumped");
                self.emit(EventId::RegistryDumped, summary.records as i64, i64::from(summary.overwritten));
            },
            Err(e) => {
                warn!(path = %self.path, error = %e, "registry dump failed");
                self.emit(EventId::RegistryDumpFailed, e.raw_os_error().map_or(-1, i64::from), 0);
            },
        }
    }
}
