//! The table-services facade.
//!
//! [`TableServices`] owns the registry mutex, the shared buffer pool and the
//! external collaborators (critical data store, codec, event and message
//! sinks, file writer, clock). Every public operation follows the same shape:
//! open a [`Txn`], do the work with the registry locked (dropping the lock
//! around file I/O and validation functions), finish the transaction, then
//! perform the queued critical-table saves, notifications and events with no
//! lock held.

use std::sync::Arc;

use flight_tables_cds::{BlockKind, BlockStatus, CdsHandle, CriticalDataStore};
use flight_tables_types::{RegId, SystemTimeSource, TableServicesConfig, TimeSource};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::app::{AppDirectory, AppId};
use crate::buffer::SharedPool;
use crate::codec::{PassThroughCodec, TableCodec};
use crate::critical::{decode_rows, encode_rows, registry_block_size, CriticalTableEntry};
use crate::error::{BadArgumentSnafu, Result};
use crate::events::{EventId, EventSink, TableEvent, TracingEventSink};
use crate::notify::{MessageSink, TracingMessageSink};
use crate::registry::Registry;
use crate::txn::Txn;
use crate::writer::{FileWriter, InlineFileWriter};

mod access;
mod commands;
mod load;
mod register;

pub use load::LoadSource;

/// Table services for one processor.
///
/// All operations take `&self`; share the value between application threads
/// with an `Arc`.
pub struct TableServices {
    pub(crate) config: TableServicesConfig,
    pub(crate) registry: Mutex<Registry>,
    pub(crate) pool: SharedPool,
    pub(crate) apps: AppDirectory,
    pub(crate) cds: Option<Arc<dyn CriticalDataStore>>,
    /// Block holding the critical-table registry; `None` disables critical tables.
    pub(crate) critical_block: Option<CdsHandle>,
    /// Serializes CDS writes so table and registry blocks stay in step.
    pub(crate) cds_io: Mutex<()>,
    pub(crate) codec: Arc<dyn TableCodec>,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) messages: Arc<dyn MessageSink>,
    pub(crate) writer: Arc<dyn FileWriter>,
    pub(crate) clock: Arc<dyn TimeSource>,
}

#[bon::bon]
impl TableServices {
    /// Initializes table services.
    ///
    /// Builds the fixed-capacity arrays, preallocates the shared buffers and,
    /// when a critical data store is supplied, restores the critical-table
    /// registry from it.
    ///
    /// # Errors
    ///
    /// Returns `BadArgument` if the configuration does not validate.
    #[builder]
    pub fn new(
        #[builder(default)] config: TableServicesConfig,
        cds: Option<Arc<dyn CriticalDataStore>>,
        #[builder(default = Arc::new(PassThroughCodec) as Arc<dyn TableCodec>)] codec: Arc<dyn TableCodec>,
        #[builder(default = Arc::new(TracingEventSink) as Arc<dyn EventSink>)] events: Arc<dyn EventSink>,
        #[builder(default = Arc::new(TracingMessageSink) as Arc<dyn MessageSink>)] messages: Arc<
            dyn MessageSink,
        >,
        #[builder(default = Arc::new(InlineFileWriter) as Arc<dyn FileWriter>)] writer: Arc<dyn FileWriter>,
        #[builder(default = Arc::new(SystemTimeSource) as Arc<dyn TimeSource>)] clock: Arc<dyn TimeSource>,
    ) -> Result<Self> {
        config.validate().map_err(|e| BadArgumentSnafu { message: e.to_string() }.build())?;
        let mut registry = Registry::new(&config);
        let pool = SharedPool::new(registry.layout);
        let critical_block = match &cds {
            Some(store) => restore_critical_registry(store.as_ref(), &config, &mut registry.critical),
            None => None,
        };

        let services = Self {
            apps: AppDirectory::new(config.max_app_name_len),
            registry: Mutex::new(registry),
            pool,
            cds,
            critical_block,
            cds_io: Mutex::new(()),
            codec,
            events,
            messages,
            writer,
            clock,
            config,
        };
        info!(
            tables = services.config.max_num_tables,
            handles = services.config.max_num_handles,
            shared_buffers = services.config.max_simultaneous_loads,
            codec = services.codec.name(),
            critical = services.critical_block.is_some(),
            "table services initialized"
        );
        services.emit_event(AppId::TABLE_SERVICES, "", EventId::Initialized, 0, 0);
        Ok(services)
    }
}

/// Registers, restores or initializes the critical-table registry block.
fn restore_critical_registry(
    store: &dyn CriticalDataStore,
    config: &TableServicesConfig,
    rows: &mut Vec<CriticalTableEntry>,
) -> Option<CdsHandle> {
    let size = registry_block_size(config);
    let (handle, status) = match store.register_block(&config.critical_registry_name, size, BlockKind::Other) {
        Ok(registered) => registered,
        Err(e) => {
            warn!(error = %e, "critical table registry unavailable; critical tables disabled");
            return None;
        },
    };
    if status == BlockStatus::AlreadyExists {
        let mut block = vec![0u8; size];
        match store.read_block(handle, &mut block).map_err(|e| e.to_string()).and_then(|()| {
            decode_rows(&block, config.max_critical_tables).map_err(|e| e.to_string())
        }) {
            Ok(restored) => {
                let recovered = restored.iter().filter(|r| !r.is_free()).count();
                debug!(rows = recovered, "critical table registry restored");
                *rows = restored;
                return Some(handle);
            },
            Err(e) => warn!(error = %e, "critical table registry unreadable; starting fresh"),
        }
    }
    let written = encode_rows(rows, size).map_err(|e| e.to_string()).and_then(|bytes| {
        store.write_block(handle, &bytes).map_err(|e| e.to_string())
    });
    if let Err(e) = written {
        warn!(error = %e, "failed to initialize critical table registry");
    }
    Some(handle)
}

impl TableServices {
    /// Active configuration.
    pub fn config(&self) -> &TableServicesConfig {
        &self.config
    }

    /// Registers an application name and returns its id.
    ///
    /// Registering a known name returns the id it already has.
    ///
    /// # Errors
    ///
    /// Returns `BadArgument` for empty, over-long or dotted names.
    pub fn register_app(&self, name: &str) -> Result<AppId> {
        self.apps.register(name)
    }

    /// Name of a registered application.
    pub fn app_name(&self, app: AppId) -> Option<String> {
        self.apps.name(app)
    }

    /// Sends one event straight to the sink.
    pub(crate) fn emit_event(&self, app: AppId, table: &str, id: EventId, d1: i64, d2: i64) {
        self.events.send_event(&TableEvent {
            id,
            severity: id.severity(),
            app,
            table: table.to_string(),
            data: [d1, d2],
        });
    }

    /// Finishes a transaction and carries out everything it queued.
    ///
    /// An error result adds `error_event` carrying the error code.
    pub(crate) fn complete<T>(&self, mut txn: Txn<'_>, result: Result<T>, error_event: EventId) -> Result<T> {
        if let Err(e) = &result {
            txn.add_event(error_event, i64::from(e.code().as_i32()), 0);
        }
        self.complete_quiet(txn, result)
    }

    /// Like [`Self::complete`], without an error event. Used by polling calls.
    pub(crate) fn complete_quiet<T>(&self, mut txn: Txn<'_>, result: Result<T>) -> Result<T> {
        txn.finish();
        if let Err(e) = &result {
            debug!(app = %txn.caller, table = %txn.table_name, error = %e, "table operation failed");
        }
        for reg_id in txn.take_critical_saves() {
            self.save_critical(reg_id);
        }
        for pending in txn.take_notifications() {
            self.messages.send_notification(pending.owner, &pending.table, &pending.notify);
        }
        for event in txn.take_events() {
            self.events.send_event(&TableEvent {
                id: event.id,
                severity: event.id.severity(),
                app: txn.caller,
                table: txn.table_name.clone(),
                data: event.data,
            });
        }
        result
    }

    /// True if critical tables can be mirrored.
    pub(crate) fn critical_enabled(&self) -> bool {
        self.cds.is_some() && self.critical_block.is_some()
    }

    /// Writes the critical-table registry rows to their block.
    pub(crate) fn write_critical_registry(&self, rows: &[u8]) -> Result<(), String> {
        let (Some(cds), Some(block)) = (self.cds.as_ref(), self.critical_block) else {
            return Ok(());
        };
        cds.write_block(block, rows).map_err(|e| e.to_string())
    }

    /// Encodes the current critical-table rows. Caller holds the registry lock.
    pub(crate) fn encode_critical_rows(&self, reg: &Registry) -> Result<Vec<u8>, String> {
        encode_rows(&reg.critical, registry_block_size(&self.config)).map_err(|e| e.to_string())
    }

    /// Mirrors a critical table's active contents and registry row to the CDS.
    ///
    /// Failures are logged and reported as events; the in-memory table is
    /// never rolled back.
    pub(crate) fn save_critical(&self, reg_id: RegId) {
        let Some(cds) = self.cds.as_ref() else {
            return;
        };
        let _io = self.cds_io.lock();
        let snapshot = {
            let mut reg = self.registry.lock();
            let Some(index) = reg.locate_by_id(reg_id) else {
                return;
            };
            let record = &reg.records[index];
            let (Some(handle), true) = (record.cds_handle, record.is_critical()) else {
                return;
            };
            let Some(active) = record.status.active.and_then(|id| reg.buffer(id)) else {
                return;
            };
            let Some(data) = active.data.as_ref() else {
                return;
            };
            let size = record.config.size;
            let contents = {
                let bytes = data.read();
                bytes[..size.min(bytes.len())].to_vec()
            };
            let name = record.config.name.clone();
            let file_time = active.file_time;
            let time_of_last_update = record.status.time_of_last_update;
            let last_file_loaded = record.status.last_file_loaded.clone();
            if let Some(row) = reg.critical_row(&name) {
                let entry = &mut reg.critical[row];
                entry.file_time = file_time;
                entry.time_of_last_update = time_of_last_update;
                entry.last_file_loaded = last_file_loaded;
                entry.loaded_once = true;
            }
            (name, handle, contents, self.encode_critical_rows(&reg))
        };
        let (name, handle, contents, rows) = snapshot;
        let result = cds
            .write_block(handle, &contents)
            .map_err(|e| e.to_string())
            .and_then(|()| rows)
            .and_then(|rows| self.write_critical_registry(&rows));
        if let Err(e) = result {
            warn!(table = %name, error = %e, "failed to save critical table");
            self.emit_event(AppId::TABLE_SERVICES, &name, EventId::CriticalSaveFailed, 0, 0);
        }
    }
}

impl std::fmt::Debug for TableServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableServices")
            .field("config", &self.config)
            .field("codec", &self.codec.name())
            .field("critical_block", &self.critical_block)
            .finish_non_exhaustive()
    }
}
