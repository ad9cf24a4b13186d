//! Table services core for flight software.
//!
//! Cooperating applications publish named, fixed-size configuration tables
//! through [`TableServices`]. Contents are replaced from table image files or
//! memory through a load, validate and activate cycle that never exposes a
//! half-written table to readers. Snapshots of any buffer can be dumped to
//! file, and tables registered as critical are mirrored to a critical data
//! store so they survive a processor reset.
//!
//! ## Life of a table
//!
//! ```text
//!   register ──► load ──► (validate) ──► update ──► get_address / release_address
//!                 │                        ▲
//!                 └── working buffer ──────┘   readers keep the old buffer
//!                                               until they release it
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use flight_tables_core::{LoadSource, TableServices};
//! use flight_tables_types::TableOptions;
//!
//! let services = TableServices::builder().build()?;
//! let app = services.register_app("NAV")?;
//! let (handle, _) = services.register(app, "Gains", 16, TableOptions::empty(), None)?;
//! services.load(app, handle, LoadSource::Bytes(&[1u8; 16]))?;
//! let (data, _) = services.get_address(app, handle)?;
//! assert_eq!(data.read()[0], 1);
//! services.release_address(app, handle)?;
//! # Ok::<(), flight_tables_core::TableError>(())
//! ```

#![deny(unsafe_code)]

pub mod app;
pub mod codec;
pub mod error;
pub mod events;
pub mod housekeeping;
pub mod notify;
pub mod report;
pub mod writer;

mod access;
mod buffer;
mod critical;
mod dump;
mod loader;
mod registry;
mod services;
mod txn;
mod validation;

pub use app::AppId;
pub use buffer::TableData;
pub use error::{ErrorCode, Info, Result, TableError};
pub use events::{EventId, EventSink, Severity, TableEvent, TracingEventSink};
pub use housekeeping::HousekeepingData;
pub use notify::{MessageSink, NotifyDescriptor, TracingMessageSink};
pub use registry::TableValidator;
pub use report::{RegistryReport, TableInfo};
pub use services::{LoadSource, TableServices};
pub use validation::BufferSelect;
pub use writer::{BackgroundFileWriter, FileWriter, InlineFileWriter};
