//! Shared harness for table-services integration tests.
//!
//! Wires a [`TableServices`] instance to recording event and message sinks
//! and a hand-driven clock, inside its own temporary directory.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::path::PathBuf;
use std::sync::Arc;

use flight_tables_cds::{CdsStore, CriticalDataStore, InMemoryBackend};
use flight_tables_core::{
    AppId, EventId, EventSink, MessageSink, NotifyDescriptor, TableEvent, TableServices,
};
use flight_tables_test_utils::{TableImage, TestDir};
use flight_tables_types::{MissionTime, TableServicesConfig, TimeSource};
use parking_lot::Mutex;

/// Event sink that keeps everything it is sent.
#[derive(Default)]
pub struct RecordingEvents(Mutex<Vec<TableEvent>>);

impl EventSink for RecordingEvents {
    fn send_event(&self, event: &TableEvent) {
        self.0.lock().push(event.clone());
    }
}

impl RecordingEvents {
    pub fn ids(&self) -> Vec<EventId> {
        self.0.lock().iter().map(|e| e.id).collect()
    }

    pub fn count(&self, id: EventId) -> usize {
        self.0.lock().iter().filter(|e| e.id == id).count()
    }

    pub fn last(&self, id: EventId) -> Option<TableEvent> {
        self.0.lock().iter().rev().find(|e| e.id == id).cloned()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// Message sink that keeps every notification.
#[derive(Default)]
pub struct RecordingMessages(Mutex<Vec<(AppId, String, NotifyDescriptor)>>);

impl MessageSink for RecordingMessages {
    fn send_notification(&self, owner: AppId, table: &str, notify: &NotifyDescriptor) {
        self.0.lock().push((owner, table.to_string(), *notify));
    }
}

impl RecordingMessages {
    pub fn sent(&self) -> Vec<(AppId, String, NotifyDescriptor)> {
        self.0.lock().clone()
    }
}

/// Clock that only moves when told to.
pub struct ManualClock(Mutex<MissionTime>);

impl ManualClock {
    pub fn new(seconds: u32) -> Self {
        Self(Mutex::new(MissionTime::new(seconds, 0)))
    }

    pub fn set(&self, seconds: u32) {
        *self.0.lock() = MissionTime::new(seconds, 0);
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> MissionTime {
        *self.0.lock()
    }
}

/// Table services with recording collaborators.
pub struct Harness {
    pub services: TableServices,
    pub events: Arc<RecordingEvents>,
    pub messages: Arc<RecordingMessages>,
    pub clock: Arc<ManualClock>,
    pub dir: TestDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(config(), None)
    }

    pub fn with_config(config: TableServicesConfig) -> Self {
        Self::build(config, None)
    }

    pub fn with_cds(config: TableServicesConfig, cds: Arc<dyn CriticalDataStore>) -> Self {
        Self::build(config, Some(cds))
    }

    fn build(config: TableServicesConfig, cds: Option<Arc<dyn CriticalDataStore>>) -> Self {
        let events = Arc::new(RecordingEvents::default());
        let messages = Arc::new(RecordingMessages::default());
        let clock = Arc::new(ManualClock::new(5000));
        let services = TableServices::builder()
            .config(config)
            .maybe_cds(cds)
            .events(events.clone() as Arc<dyn EventSink>)
            .messages(messages.clone() as Arc<dyn MessageSink>)
            .clock(clock.clone() as Arc<dyn TimeSource>)
            .build()
            .expect("table services should initialize");
        Self { services, events, messages, clock, dir: TestDir::new() }
    }

    pub fn app(&self, name: &str) -> AppId {
        self.services.register_app(name).expect("application name should be valid")
    }

    /// Writes a whole-table image for `table` and returns its path.
    pub fn image(&self, file: &str, table: &str, payload: &[u8]) -> String {
        let path: PathBuf = TableImage::builder()
            .table_name(table)
            .payload(payload.to_vec())
            .build()
            .write_to(&self.dir, file);
        path.display().to_string()
    }

    /// Writes a partial image covering `offset..offset + payload.len()`.
    pub fn partial_image(&self, file: &str, table: &str, offset: u32, payload: &[u8]) -> String {
        let path: PathBuf = TableImage::builder()
            .table_name(table)
            .payload(payload.to_vec())
            .offset(offset)
            .build()
            .write_to(&self.dir, file);
        path.display().to_string()
    }

    /// Copy of the active contents, pinned and released around the read.
    pub fn contents(&self, app: AppId, handle: flight_tables_types::TableHandle) -> Vec<u8> {
        let (data, _) = self.services.get_address(app, handle).expect("table should be readable");
        let bytes = data.to_vec();
        self.services.release_address(app, handle).expect("release should succeed");
        bytes
    }
}

/// Default limits, with room for temporary-directory paths.
pub fn config() -> TableServicesConfig {
    TableServicesConfig::builder().max_path_len(256).build().expect("valid test config")
}

/// A critical data store over an in-memory image that outlives any one store.
pub fn memory_cds(backend: &InMemoryBackend) -> Arc<dyn CriticalDataStore> {
    Arc::new(CdsStore::open(backend.clone(), 32).expect("CDS image should open"))
}
