//! Error taxonomy and in-band status codes for table services.
//!
//! Terminal failures are [`TableError`] variants. Outcomes that are not errors
//! but still tell the caller something ("nothing to do", "updated", "partial
//! load") are [`Info`] values returned inside `Ok`. Both carry stable numeric
//! codes for downlinked telemetry; see [`ErrorCode`] and [`Info::code`].

use core::fmt;

use snafu::{Location, Snafu};

/// Result type for table-services operations.
pub type Result<T, E = TableError> = std::result::Result<T, E>;

/// Machine-readable error codes.
///
/// Every [`TableError`] variant maps to one code. Codes are 32-bit values with
/// the error severity bits set, so [`ErrorCode::as_i32`] is always negative:
///
/// | Range                     | Domain                                  |
/// |---------------------------|-----------------------------------------|
/// | `0xCC2A_0001`–`0x00FF`    | Input validation                        |
/// | `0xCC2A_0101`–`0x01FF`    | Resource exhaustion                     |
/// | `0xCC2A_0201`–`0x02FF`    | State-machine rejection                 |
/// | `0xCC2A_0301`–`0x03FF`    | File and codec faults                   |
/// | `0xCC2A_0401`–`0x04FF`    | Critical data store                     |
/// | `0xCC2A_0501`–`0x05FF`    | Duplicate registration                  |
/// | `0xCC2A_0601`–`0x06FF`    | Validation function results             |
/// | `0xCC2A_0701`–`0x07FF`    | Internal                                |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    // --- Input validation ---
    /// Malformed argument.
    BadArgument = 0xCC2A_0001,
    /// Empty or overlong table name.
    InvalidName = 0xCC2A_0002,
    /// Zero or oversize table size.
    InvalidSize = 0xCC2A_0003,
    /// Forbidden option combination.
    InvalidOptions = 0xCC2A_0004,
    /// Handle does not name an access descriptor.
    InvalidHandle = 0xCC2A_0005,
    /// File name longer than the path limit.
    FilenameTooLong = 0xCC2A_0006,
    /// Load source kind not accepted for this table.
    IllegalSrcType = 0xCC2A_0007,

    // --- Resource exhaustion ---
    /// Registry full.
    RegistryFull = 0xCC2A_0101,
    /// Access descriptors exhausted.
    HandlesFull = 0xCC2A_0102,
    /// No shared load buffer free.
    NoBufferAvail = 0xCC2A_0103,
    /// Validation records exhausted.
    TooManyValidations = 0xCC2A_0104,
    /// Dump-control records exhausted.
    TooManyDumps = 0xCC2A_0105,
    /// File writer queue full.
    WriterBusy = 0xCC2A_0106,

    // --- State machine ---
    /// Load already in progress.
    LoadInProgress = 0xCC2A_0201,
    /// Operation not allowed on a dump-only table.
    DumpOnly = 0xCC2A_0202,
    /// Table has never been loaded.
    NeverLoaded = 0xCC2A_0203,
    /// Table owner has unregistered.
    Unregistered = 0xCC2A_0204,
    /// Caller may not perform this operation.
    NoAccess = 0xCC2A_0205,
    /// Target buffer is pinned by a reader.
    TableLocked = 0xCC2A_0206,
    /// Activation requested before validation.
    NotValidated = 0xCC2A_0207,
    /// Inactive buffer requested but none exists.
    NoInactiveBuffer = 0xCC2A_0208,
    /// Dump already pending.
    DumpAlreadyPending = 0xCC2A_0209,
    /// Nothing to abort.
    NoLoadInProgress = 0xCC2A_020A,

    // --- File and codec ---
    /// Load exceeds the table.
    FileTooLarge = 0xCC2A_0301,
    /// File ended before the declared payload.
    LoadIncomplete = 0xCC2A_0302,
    /// Standard file header missing.
    NoStdHeader = 0xCC2A_0303,
    /// Table header missing or malformed.
    NoTblHeader = 0xCC2A_0304,
    /// Wrong content type.
    BadContentId = 0xCC2A_0305,
    /// Wrong file sub-type.
    BadSubtypeId = 0xCC2A_0306,
    /// Spacecraft ID not accepted.
    BadSpacecraftId = 0xCC2A_0307,
    /// Processor ID not accepted.
    BadProcessorId = 0xCC2A_0308,
    /// File names a different table.
    FileForWrongTable = 0xCC2A_0309,
    /// Partial load of a never-loaded table.
    PartialLoad = 0xCC2A_030A,
    /// Zero-length load.
    ZeroLengthLoad = 0xCC2A_030B,
    /// Operating-system I/O failure.
    Access = 0xCC2A_030C,
    /// Codec failure.
    ExternalResourceFail = 0xCC2A_030D,

    // --- Critical data store ---
    /// CDS read or write failed.
    CdsAccess = 0xCC2A_0401,
    /// CDS block belongs to a registered table.
    CdsInUse = 0xCC2A_0402,
    /// No CDS block for that table.
    CdsNotFound = 0xCC2A_0403,
    /// CDS block is not a table block.
    CdsWrongType = 0xCC2A_0404,

    // --- Duplicate registration ---
    /// Name registered by another application.
    DuplicateNotOwned = 0xCC2A_0501,
    /// Same application re-registered with a different size.
    DuplicateDiffSize = 0xCC2A_0502,

    // --- Validation ---
    /// Validation function returned a negative code.
    ValidationFailed = 0xCC2A_0601,
    /// Validation function returned a positive code.
    ValidationBadReturn = 0xCC2A_0602,

    // --- Internal ---
    /// Invariant violation.
    Internal = 0xCC2A_0701,
}

/// Broad grouping of error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Caller passed something malformed.
    Input,
    /// A fixed-capacity pool is exhausted.
    Resource,
    /// The table is not in a state that allows the operation.
    State,
    /// A file or codec check failed.
    File,
    /// Critical data store failure.
    Cds,
    /// Name already registered.
    Duplicate,
    /// Owner's validation function rejected the contents.
    Validation,
    /// Bug.
    Internal,
}

impl ErrorCode {
    /// Returns the raw 32-bit code.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Returns the code as the signed status value reported in telemetry.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as u32 as i32
    }

    /// Returns the category from the code's range.
    #[must_use]
    pub const fn category(self) -> ErrorCategory {
        match (self as u32 >> 8) & 0xFF {
            0x00 => ErrorCategory::Input,
            0x01 => ErrorCategory::Resource,
            0x02 => ErrorCategory::State,
            0x03 => ErrorCategory::File,
            0x04 => ErrorCategory::Cds,
            0x05 => ErrorCategory::Duplicate,
            0x06 => ErrorCategory::Validation,
            _ => ErrorCategory::Internal,
        }
    }

    /// Whether retrying the same call later can succeed without caller changes.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::NoBufferAvail
                | Self::TooManyValidations
                | Self::TooManyDumps
                | Self::WriterBusy
                | Self::LoadInProgress
                | Self::TableLocked
                | Self::DumpAlreadyPending
        )
    }

    /// Every code, in numeric order.
    pub const ALL: [ErrorCode; 45] = [
        Self::BadArgument,
        Self::InvalidName,
        Self::InvalidSize,
        Self::InvalidOptions,
        Self::InvalidHandle,
        Self::FilenameTooLong,
        Self::IllegalSrcType,
        Self::RegistryFull,
        Self::HandlesFull,
        Self::NoBufferAvail,
        Self::TooManyValidations,
        Self::TooManyDumps,
        Self::WriterBusy,
        Self::LoadInProgress,
        Self::DumpOnly,
        Self::NeverLoaded,
        Self::Unregistered,
        Self::NoAccess,
        Self::TableLocked,
        Self::NotValidated,
        Self::NoInactiveBuffer,
        Self::DumpAlreadyPending,
        Self::NoLoadInProgress,
        Self::FileTooLarge,
        Self::LoadIncomplete,
        Self::NoStdHeader,
        Self::NoTblHeader,
        Self::BadContentId,
        Self::BadSubtypeId,
        Self::BadSpacecraftId,
        Self::BadProcessorId,
        Self::FileForWrongTable,
        Self::PartialLoad,
        Self::ZeroLengthLoad,
        Self::Access,
        Self::ExternalResourceFail,
        Self::CdsAccess,
        Self::CdsInUse,
        Self::CdsNotFound,
        Self::CdsWrongType,
        Self::DuplicateNotOwned,
        Self::DuplicateDiffSize,
        Self::ValidationFailed,
        Self::ValidationBadReturn,
        Self::Internal,
    ];

    /// Converts a raw code back to an `ErrorCode`.
    #[must_use]
    pub fn from_u32(code: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_u32() == code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.as_u32())
    }
}

/// Terminal failure of a table-services operation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TableError {
    /// Malformed argument.
    #[snafu(display("Bad argument: {message}"))]
    BadArgument {
        /// What was wrong.
        message: String,
    },

    /// Table name empty or too long.
    #[snafu(display("Invalid table name {name:?}"))]
    InvalidName {
        /// The rejected name.
        name: String,
    },

    /// Table size zero or above the configured maximum.
    #[snafu(display("Invalid table size {size} (max {max})"))]
    InvalidSize {
        /// Requested size.
        size: usize,
        /// Largest size allowed for this kind of table.
        max: usize,
    },

    /// Forbidden option combination.
    #[snafu(display("Invalid table options 0x{options:04x}"))]
    InvalidOptions {
        /// Raw option bits.
        options: u16,
    },

    /// Handle does not name a live access descriptor owned by the caller.
    #[snafu(display("Invalid table handle 0x{handle:08x}"))]
    InvalidHandle {
        /// Raw handle value.
        handle: u32,
    },

    /// File name longer than the path limit.
    #[snafu(display("File name of {len} bytes exceeds limit {max}"))]
    FilenameTooLong {
        /// Length of the name.
        len: usize,
        /// Configured limit.
        max: usize,
    },

    /// Source kind not accepted for this table.
    #[snafu(display("Illegal load source for {table}"))]
    IllegalSrcType {
        /// Table name.
        table: String,
    },

    /// Registry full.
    #[snafu(display("Registry full"))]
    RegistryFull,

    /// Access descriptors exhausted.
    #[snafu(display("No free table handles"))]
    HandlesFull,

    /// No shared load buffer free.
    #[snafu(display("No load buffer available"))]
    NoBufferAvail,

    /// Validation records exhausted.
    #[snafu(display("Too many pending validations"))]
    TooManyValidations,

    /// Dump-control records exhausted.
    #[snafu(display("Too many pending dumps"))]
    TooManyDumps,

    /// File writer queue full.
    #[snafu(display("File writer busy"))]
    WriterBusy,

    /// A load is already in progress.
    #[snafu(display("Load already in progress for {table}"))]
    LoadInProgress {
        /// Table name.
        table: String,
    },

    /// Operation not permitted on a dump-only table.
    #[snafu(display("{table} is dump-only"))]
    DumpOnly {
        /// Table name.
        table: String,
    },

    /// Table has never been loaded.
    #[snafu(display("{table} has never been loaded"))]
    NeverLoaded {
        /// Table name.
        table: String,
    },

    /// Table owner has unregistered.
    #[snafu(display("{table} is no longer registered by its owner"))]
    Unregistered {
        /// Table name.
        table: String,
    },

    /// Caller context not permitted for this operation.
    #[snafu(display("Caller has no access to {table}"))]
    NoAccess {
        /// Table name.
        table: String,
    },

    /// Target buffer is pinned by a reader.
    #[snafu(display("{table} buffer is locked by a reader"))]
    TableLocked {
        /// Table name.
        table: String,
    },

    /// Activation requested for an unvalidated load.
    #[snafu(display("{table} load has not been validated"))]
    NotValidated {
        /// Table name.
        table: String,
    },

    /// Inactive buffer requested but none exists.
    #[snafu(display("{table} has no inactive buffer"))]
    NoInactiveBuffer {
        /// Table name.
        table: String,
    },

    /// A dump of this table is already pending.
    #[snafu(display("Dump already pending for {table}"))]
    DumpAlreadyPending {
        /// Table name.
        table: String,
    },

    /// Abort requested with no load in progress.
    #[snafu(display("No load in progress for {table}"))]
    NoLoadInProgress {
        /// Table name.
        table: String,
    },

    /// Payload would extend beyond the table, or the file has trailing bytes.
    #[snafu(display("File too large for {table}: {reason}"))]
    FileTooLarge {
        /// Table name.
        table: String,
        /// Which bound was exceeded.
        reason: String,
    },

    /// File ended before the declared payload.
    #[snafu(display("Load incomplete: read {read} of {expected} bytes"))]
    LoadIncomplete {
        /// Bytes read.
        read: usize,
        /// Bytes declared.
        expected: usize,
    },

    /// Standard file header missing.
    #[snafu(display("No standard file header in {path}"))]
    NoStdHeader {
        /// File path.
        path: String,
    },

    /// Table header missing or malformed.
    #[snafu(display("No table header in {path}"))]
    NoTblHeader {
        /// File path.
        path: String,
    },

    /// Wrong content type.
    #[snafu(display("Bad content type 0x{found:08x}"))]
    BadContentId {
        /// Value in the file.
        found: u32,
    },

    /// Wrong sub-type.
    #[snafu(display("Bad file sub-type {found}"))]
    BadSubtypeId {
        /// Value in the file.
        found: u32,
    },

    /// Spacecraft ID not accepted.
    #[snafu(display("Bad spacecraft ID 0x{found:x}"))]
    BadSpacecraftId {
        /// Value in the file.
        found: u32,
    },

    /// Processor ID not accepted.
    #[snafu(display("Bad processor ID {found}"))]
    BadProcessorId {
        /// Value in the file.
        found: u32,
    },

    /// File names a different table.
    #[snafu(display("File is for {found}, not {expected}"))]
    FileForWrongTable {
        /// Target table.
        expected: String,
        /// Table named in the file.
        found: String,
    },

    /// Partial load of a never-loaded table.
    #[snafu(display("Partial load of never-loaded {table}"))]
    PartialLoad {
        /// Table name.
        table: String,
    },

    /// Zero-length load.
    #[snafu(display("Zero-length load for {table}"))]
    ZeroLengthLoad {
        /// Table name.
        table: String,
    },

    /// Operating-system I/O failure.
    #[snafu(display("I/O error on {path}: {source}"))]
    Access {
        /// File path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Codec failure.
    #[snafu(display("Codec failure: {message}"))]
    ExternalResourceFail {
        /// What failed.
        message: String,
    },

    /// CDS read or write failed.
    #[snafu(display("Critical data store error: {source}"))]
    CdsAccess {
        /// Underlying error.
        source: flight_tables_cds::Error,
    },

    /// CDS block belongs to a registered table.
    #[snafu(display("CDS block {name} belongs to a registered table"))]
    CdsInUse {
        /// Table name.
        name: String,
    },

    /// No CDS block for that table.
    #[snafu(display("No CDS block for {name}"))]
    CdsNotFound {
        /// Table name.
        name: String,
    },

    /// CDS block is not a table block.
    #[snafu(display("CDS block {name} is not a table"))]
    CdsWrongType {
        /// Table name.
        name: String,
    },

    /// Name registered by another application.
    #[snafu(display("{name} is registered by another application"))]
    DuplicateNotOwned {
        /// Table name.
        name: String,
    },

    /// Re-registration with a different size.
    #[snafu(display("{name} already registered with size {registered}, not {requested}"))]
    DuplicateDiffSize {
        /// Table name.
        name: String,
        /// Existing size.
        registered: usize,
        /// Requested size.
        requested: usize,
    },

    /// Validation function returned a negative code.
    #[snafu(display("Validation failed with code {code}"))]
    ValidationFailed {
        /// Validator return value.
        code: i32,
    },

    /// Validation function returned a positive code.
    #[snafu(display("Validation function returned unexpected positive code {code}"))]
    ValidationBadReturn {
        /// Validator return value.
        code: i32,
    },

    /// Invariant violation.
    #[snafu(display("Internal error at {location}: {message}"))]
    Internal {
        /// Description.
        message: String,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },
}

impl TableError {
    /// Returns the machine-readable code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::BadArgument { .. } => ErrorCode::BadArgument,
            Self::InvalidName { .. } => ErrorCode::InvalidName,
            Self::InvalidSize { .. } => ErrorCode::InvalidSize,
            Self::InvalidOptions { .. } => ErrorCode::InvalidOptions,
            Self::InvalidHandle { .. } => ErrorCode::InvalidHandle,
            Self::FilenameTooLong { .. } => ErrorCode::FilenameTooLong,
            Self::IllegalSrcType { .. } => ErrorCode::IllegalSrcType,
            Self::RegistryFull => ErrorCode::RegistryFull,
            Self::HandlesFull => ErrorCode::HandlesFull,
            Self::NoBufferAvail => ErrorCode::NoBufferAvail,
            Self::TooManyValidations => ErrorCode::TooManyValidations,
            Self::TooManyDumps => ErrorCode::TooManyDumps,
            Self::WriterBusy => ErrorCode::WriterBusy,
            Self::LoadInProgress { .. } => ErrorCode::LoadInProgress,
            Self::DumpOnly { .. } => ErrorCode::DumpOnly,
            Self::NeverLoaded { .. } => ErrorCode::NeverLoaded,
            Self::Unregistered { .. } => ErrorCode::Unregistered,
            Self::NoAccess { .. } => ErrorCode::NoAccess,
            Self::TableLocked { .. } => ErrorCode::TableLocked,
            Self::NotValidated { .. } => ErrorCode::NotValidated,
            Self::NoInactiveBuffer { .. } => ErrorCode::NoInactiveBuffer,
            Self::DumpAlreadyPending { .. } => ErrorCode::DumpAlreadyPending,
            Self::NoLoadInProgress { .. } => ErrorCode::NoLoadInProgress,
            Self::FileTooLarge { .. } => ErrorCode::FileTooLarge,
            Self::LoadIncomplete { .. } => ErrorCode::LoadIncomplete,
            Self::NoStdHeader { .. } => ErrorCode::NoStdHeader,
            Self::NoTblHeader { .. } => ErrorCode::NoTblHeader,
            Self::BadContentId { .. } => ErrorCode::BadContentId,
            Self::BadSubtypeId { .. } => ErrorCode::BadSubtypeId,
            Self::BadSpacecraftId { .. } => ErrorCode::BadSpacecraftId,
            Self::BadProcessorId { .. } => ErrorCode::BadProcessorId,
            Self::FileForWrongTable { .. } => ErrorCode::FileForWrongTable,
            Self::PartialLoad { .. } => ErrorCode::PartialLoad,
            Self::ZeroLengthLoad { .. } => ErrorCode::ZeroLengthLoad,
            Self::Access { .. } => ErrorCode::Access,
            Self::ExternalResourceFail { .. } => ErrorCode::ExternalResourceFail,
            Self::CdsAccess { .. } => ErrorCode::CdsAccess,
            Self::CdsInUse { .. } => ErrorCode::CdsInUse,
            Self::CdsNotFound { .. } => ErrorCode::CdsNotFound,
            Self::CdsWrongType { .. } => ErrorCode::CdsWrongType,
            Self::DuplicateNotOwned { .. } => ErrorCode::DuplicateNotOwned,
            Self::DuplicateDiffSize { .. } => ErrorCode::DuplicateDiffSize,
            Self::ValidationFailed { .. } => ErrorCode::ValidationFailed,
            Self::ValidationBadReturn { .. } => ErrorCode::ValidationBadReturn,
            Self::Internal { .. } => ErrorCode::Internal,
        }
    }

    /// Whether retrying later can succeed. Delegates to [`ErrorCode::is_retryable`].
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

/// Builds an [`TableError::Internal`] at the caller's location.
#[track_caller]
pub(crate) fn internal(message: impl Into<String>) -> TableError {
    InternalSnafu { message: message.into() }.build()
}

/// Successful outcome of an operation, possibly carrying a warning or notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Info {
    /// Nothing to report.
    Success = 0,
    /// Same application registered the same table again; existing handle returned.
    WarnDuplicate = 0x4C2A_0001,
    /// Registered, but the critical data store refused the table.
    WarnNotCritical = 0x4C2A_0002,
    /// Loaded at a non-zero offset.
    WarnPartialLoad = 0x4C2A_0003,
    /// Loaded from offset 0 but the file ends before the end of the table.
    WarnShortFile = 0x4C2A_0004,
    /// Contents restored from the critical data store.
    RecoveredTable = 0x4C2A_0101,
    /// Active contents changed since this handle last looked.
    Updated = 0x4C2A_0102,
    /// A validated load awaits activation by the owner.
    UpdatePending = 0x4C2A_0103,
    /// A validation request awaits the owner.
    ValidationPending = 0x4C2A_0104,
    /// A dump request awaits the owner.
    DumpPending = 0x4C2A_0105,
    /// No update was pending.
    NoUpdatePending = 0x4C2A_0106,
    /// No validation was pending.
    NoValidationPending = 0x4C2A_0107,
    /// No dump was pending.
    NoDumpPending = 0x4C2A_0108,
    /// Activation deferred because a reader holds the table.
    TableLocked = 0x4C2A_0109,
}

impl Info {
    /// Returns the numeric status code.
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// True for the `Warn*` outcomes.
    #[must_use]
    pub const fn is_warning(self) -> bool {
        matches!(
            self,
            Self::WarnDuplicate | Self::WarnNotCritical | Self::WarnPartialLoad | Self::WarnShortFile
        )
    }
}

impl fmt::Display for Info {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?} (0x{:08X})", self.code())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_error_codes_are_unique_and_negative() {
        let mut seen = HashSet::new();
        for code in ErrorCode::ALL {
            assert!(code.as_i32() < 0, "{code:?} should be negative");
            seen.insert(code.as_u32());
        }
        assert_eq!(seen.len(), ErrorCode::ALL.len());
    }

    #[test]
    fn test_error_code_round_trip() {
        for code in ErrorCode::ALL {
            assert_eq!(ErrorCode::from_u32(code.as_u32()), Some(code));
        }
        assert_eq!(ErrorCode::from_u32(0), None);
    }

    #[test]
    fn test_category_from_range() {
        assert_eq!(ErrorCode::InvalidHandle.category(), ErrorCategory::Input);
        assert_eq!(ErrorCode::RegistryFull.category(), ErrorCategory::Resource);
        assert_eq!(ErrorCode::NeverLoaded.category(), ErrorCategory::State);
        assert_eq!(ErrorCode::BadContentId.category(), ErrorCategory::File);
        assert_eq!(ErrorCode::CdsInUse.category(), ErrorCategory::Cds);
        assert_eq!(ErrorCode::DuplicateDiffSize.category(), ErrorCategory::Duplicate);
        assert_eq!(ErrorCode::ValidationBadReturn.category(), ErrorCategory::Validation);
        assert_eq!(ErrorCode::Internal.category(), ErrorCategory::Internal);
    }

    #[test]
    fn test_validation_codes_distinct() {
        let neg = TableError::ValidationFailed { code: -1 };
        let pos = TableError::ValidationBadReturn { code: 1 };
        assert_ne!(neg.code(), pos.code());
        assert_eq!(format!("{neg}"), "Validation failed with code -1");
    }

    #[test]
    fn test_error_display_duplicate_diff_size() {
        let err = TableError::DuplicateDiffSize { name: "A.T".into(), registered: 64, requested: 32 };
        assert_eq!(format!("{err}"), "A.T already registered with size 64, not 32");
    }

    #[test]
    fn test_internal_records_location() {
        let err = internal("stale buffer");
        assert!(format!("{err}").contains("error.rs"), "got: {err}");
        assert_eq!(err.code(), ErrorCode::Internal);
    }

    #[test]
    fn test_retryable() {
        assert!(TableError::NoBufferAvail.is_retryable());
        assert!(!TableError::RegistryFull.is_retryable());
    }

    #[test]
    fn test_info_codes() {
        assert_eq!(Info::Success.code(), 0);
        assert!(Info::WarnShortFile.is_warning());
        assert!(!Info::Updated.is_warning());
        assert_ne!(Info::TableLocked.code(), ErrorCode::TableLocked.as_u32());
    }
}
