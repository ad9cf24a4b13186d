//! Critical data store for flight table services.
//!
//! The critical data store (CDS) keeps named blocks of bytes that survive a
//! processor reset. Table services mirrors critical tables and its own
//! critical-table registry into it, and restores them when the same block is
//! registered again after a restart.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │        CriticalDataStore (contract)          │
//! │  register_block / read / write / delete      │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │                 CdsStore                     │
//! │  (header, block directory, xxh3 checksums)   │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │               CdsBackend                     │
//! │      (FileBackend / InMemoryBackend)         │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use flight_tables_cds::{BlockKind, BlockStatus, CdsStore, CriticalDataStore, InMemoryBackend};
//!
//! let store = CdsStore::open(InMemoryBackend::new(64 * 1024), 16)?;
//! let (handle, status) = store.register_block("APP.Table", 32, BlockKind::Table)?;
//! assert_eq!(status, BlockStatus::Created);
//! store.write_block(handle, &[7u8; 32])?;
//! # Ok::<(), flight_tables_cds::Error>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod error;
pub mod store;

pub use backend::{CdsBackend, FileBackend, InMemoryBackend};
pub use error::{Error, Result};
pub use store::{BlockKind, BlockStatus, CdsHandle, CdsStore, CriticalDataStore, MAX_BLOCK_NAME_LEN};
