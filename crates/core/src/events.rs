//! Table-service events.
//!
//! Operations queue [`DeferredEvent`]s on their transaction while the registry
//! lock is held. After the lock is released each one becomes a [`TableEvent`]
//! and is handed to the configured [`EventSink`]. The core supplies only the
//! numeric id and two integers of data; formatting is the sink's business.

use std::fmt;

use tracing::{debug, error, info};

use crate::app::AppId;

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Routine, high-volume.
    Debug,
    /// Noteworthy success.
    Info,
    /// Failed operation.
    Error,
}

/// Closed set of event ids with stable numeric values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum EventId {
    /// Table services finished initialization.
    Initialized = 1,
    /// Table registered.
    Registered = 10,
    /// Handle opened on an existing table.
    Shared = 11,
    /// Handle released.
    Unregistered = 12,
    /// Register failed.
    RegisterError = 13,
    /// Share failed.
    ShareError = 14,
    /// Unregister failed.
    UnregisterError = 15,
    /// Table contents loaded into a working buffer.
    LoadSuccess = 20,
    /// Load failed.
    LoadError = 21,
    /// Working buffer became active.
    UpdateSuccess = 22,
    /// Update failed.
    UpdateError = 23,
    /// Activation requested; the owner will perform the update.
    LoadPending = 24,
    /// Load in progress discarded.
    LoadAborted = 25,
    /// Abort failed.
    AbortError = 26,
    /// Activate command failed.
    ActivateError = 27,
    /// Validation queued for the owner.
    ValidationRequested = 30,
    /// Validation function accepted the contents.
    ValidationSuccess = 31,
    /// Validation function rejected the contents.
    ValidationFailure = 32,
    /// Validate request failed.
    ValidateError = 33,
    /// Dump queued for a dump-only table's owner.
    DumpRequested = 40,
    /// Dump file created.
    DumpWritten = 41,
    /// Dump file replaced an existing file.
    DumpOverwritten = 42,
    /// Dump request failed.
    DumpError = 43,
    /// Dump file could not be written.
    DumpFileError = 44,
    /// Registry dump file written.
    RegistryDumped = 50,
    /// Registry dump file could not be written.
    RegistryDumpFailed = 51,
    /// Registry dump request failed.
    RegistryDumpError = 52,
    /// Critical table CDS block deleted.
    CdsDeleted = 60,
    /// Delete-CDS request failed.
    CdsDeleteError = 61,
    /// Critical table restored from the CDS.
    Recovered = 62,
    /// Critical table registered without CDS backing.
    NotCritical = 63,
    /// Critical table could not be saved to the CDS.
    CriticalSaveFailed = 64,
    /// Address, status or in-place modification request failed.
    AccessError = 70,
}

impl EventId {
    /// Stable numeric id.
    pub const fn number(self) -> u16 {
        self as u16
    }

    /// Severity of this event.
    pub const fn severity(self) -> Severity {
        match self {
            Self::Registered
            | Self::Shared
            | Self::Unregistered
            | Self::ValidationRequested
            | Self::DumpRequested => Severity::Debug,
            Self::Initialized
            | Self::LoadSuccess
            | Self::UpdateSuccess
            | Self::LoadPending
            | Self::LoadAborted
            | Self::ValidationSuccess
            | Self::DumpWritten
            | Self::DumpOverwritten
            | Self::RegistryDumped
            | Self::CdsDeleted
            | Self::Recovered => Severity::Info,
            Self::RegisterError
            | Self::ShareError
            | Self::UnregisterError
            | Self::LoadError
            | Self::UpdateError
            | Self::AbortError
            | Self::ActivateError
            | Self::ValidationFailure
            | Self::ValidateError
            | Self::DumpError
            | Self::DumpFileError
            | Self::RegistryDumpFailed
            | Self::RegistryDumpError
            | Self::CdsDeleteError
            | Self::NotCritical
            | Self::CriticalSaveFailed
            | Self::AccessError => Severity::Error,
        }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}({})", self.number())
    }
}

/// One emitted event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEvent {
    /// Event id.
    pub id: EventId,
    /// Severity, from [`EventId::severity`].
    pub severity: Severity,
    /// Application that made the call.
    pub app: AppId,
    /// Qualified table name, empty when the call did not resolve a table.
    pub table: String,
    /// Event data. Error events carry the error code in `data[0]`.
    pub data: [i64; 2],
}

/// Receives events once the registry lock has been released.
pub trait EventSink: Send + Sync {
    /// Delivers one event.
    fn send_event(&self, event: &TableEvent);
}

/// Logs events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn send_event(&self, event: &TableEvent) {
        let id = event.id.number();
        match event.severity {
            Severity::Debug => debug!(
                event = id,
                kind = ?event.id,
                app = event.app.value(),
                table = %event.table,
                d1 = event.data[0],
                d2 = event.data[1],
                "table event"
            ),
            Severity::Info => info!(
                event = id,
                kind = ?event.id,
                app = event.app.value(),
                table = %event.table,
                d1 = event.data[0],
                d2 = event.data[1],
                "table event"
            ),
            Severity::Error => error!(
                event = id,
                kind = ?event.id,
                app = event.app.value(),
                table = %event.table,
                d1 = event.data[0],
                d2 = event.data[1],
                "table event"
            ),
        }
    }
}

/// Event queued inside a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DeferredEvent {
    pub id: EventId,
    pub data: [i64; 2],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_events_are_error_severity() {
        for id in [EventId::LoadError, EventId::CriticalSaveFailed, EventId::AccessError] {
            assert_eq!(id.severity(), Severity::Error);
        }
        assert_eq!(EventId::Registered.severity(), Severity::Debug);
        assert_eq!(EventId::Recovered.severity(), Severity::Info);
    }

    #[test]
    fn test_display_includes_number() {
        assert_eq!(EventId::DumpWritten.to_string(), "DumpWritten(41)");
    }

    #[test]
    fn test_tracing_sink_accepts_all_severities() {
        let sink = TracingEventSink;
        for id in [EventId::Registered, EventId::LoadSuccess, EventId::LoadError] {
            sink.send_event(&TableEvent {
                id,
                severity: id.severity(),
                app: AppId::TABLE_SERVICES,
                table: "TBL.T".into(),
                data: [1, 2],
            });
        }
    }
}
