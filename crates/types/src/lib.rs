//! Foundational types for flight table services.
//!
//! This crate provides the pieces shared by the table-services core, the
//! critical data store and the test tooling:
//! - Resource identifiers with category bases and slot-reusing allocation
//! - Table option flags
//! - Fixed-layout, big-endian standard file and table headers
//! - Mission time and the time source abstraction
//! - Service configuration with validation

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod file_header;
pub mod ids;
pub mod options;
pub mod time;

pub use config::{ConfigError, TableServicesConfig};
pub use file_header::{
    CONTENT_TYPE_CFE1, FS_DESCRIPTION_LEN, FS_HEADER_SIZE, StdFileHeader, SUBTYPE_TBL_IMG,
    SUBTYPE_TBL_REG, TABLE_NAME_FIELD_LEN, TBL_HEADER_SIZE, TableFileHeader,
};
pub use ids::{
    DumpControlId, IdCategory, LoadBufferId, LoadBufferLayout, MAX_SERIAL, RegId, ResourceId,
    TableHandle, ValidationId, find_next,
};
pub use options::TableOptions;
pub use time::{MissionTime, SystemTimeSource, TimeSource};
