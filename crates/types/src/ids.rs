//! Resource identifiers and slot-reusing allocation.
//!
//! Every table-services object that lives in a fixed array (registry records,
//! access descriptors, load buffers, validation and dump-control records) is
//! named by a 32-bit [`ResourceId`]. The high bits carry a category base and
//! the low [`SERIAL_BITS`] bits a serial number. The array index of an ID is
//! `(id - base) mod table_size`, recomputed on every lookup; a stale ID that
//! aliases a reused slot is rejected by comparing it with the ID stored in
//! that slot.
//!
//! ```text
//!  31              16 15               0
//! ┌──────────────────┬──────────────────┐
//! │   category base  │   serial number  │
//! └──────────────────┴──────────────────┘
//! ```
//!
//! Serial 0 is reserved in every category and never issued.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of low bits holding the serial number.
pub const SERIAL_BITS: u32 = 16;

/// Largest serial number. `(MAX_SERIAL + 1) & MAX_SERIAL == 0`.
pub const MAX_SERIAL: u32 = (1 << SERIAL_BITS) - 1;

/// Raw 32-bit resource identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(u32);

impl ResourceId {
    /// Builds an identifier from a category and a serial number.
    #[inline]
    pub const fn from_parts(category: IdCategory, serial: u32) -> Self {
        Self(category.base() | (serial & MAX_SERIAL))
    }

    /// Wraps a raw 32-bit value (e.g. read back from telemetry or a file).
    #[inline]
    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw 32-bit value.
    #[inline]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Returns the category base bits.
    #[inline]
    pub const fn base(self) -> u32 {
        self.0 & !MAX_SERIAL
    }

    /// Returns the serial number bits.
    #[inline]
    pub const fn serial(self) -> u32 {
        self.0 & MAX_SERIAL
    }

    /// Returns true if this ID belongs to `category`.
    #[inline]
    pub const fn is_in(self, category: IdCategory) -> bool {
        self.base() == category.base()
    }

    /// Returns true if this ID names an object (serial 0 never does).
    #[inline]
    pub const fn is_defined(self) -> bool {
        self.serial() != 0
    }

    /// Converts this ID to an index into an array of `table_size` slots.
    ///
    /// Returns `None` if the ID lies outside `category` or `table_size` is 0.
    /// The caller must still confirm that the slot holds this exact ID.
    pub fn to_index(self, category: IdCategory, table_size: usize) -> Option<usize> {
        let offset = self.0.wrapping_sub(category.base());
        if offset > MAX_SERIAL || table_size == 0 {
            return None;
        }
        Some(offset as usize % table_size)
    }

    /// Default increment: next serial, wrapping to 1 after [`MAX_SERIAL`].
    ///
    /// Consecutive serials land in consecutive slots, so walking `size`
    /// candidates visits every slot of a `size`-entry table.
    pub fn next_serial(self) -> Self {
        let mut serial = (self.serial() + 1) & MAX_SERIAL;
        if serial == 0 {
            serial = 1;
        }
        Self(self.base() | serial)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Identifier categories. Each has its own base in the high 16 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum IdCategory {
    /// Access descriptor (table handle).
    TableHandle = 0x4001,
    /// Registry record.
    Registry = 0x4002,
    /// Load buffer, shared or dedicated.
    LoadBuffer = 0x4003,
    /// Validation-result record.
    Validation = 0x4004,
    /// Dump-control record.
    DumpControl = 0x4005,
}

impl IdCategory {
    /// Returns the base value placed in the high bits of every ID of this category.
    #[inline]
    pub const fn base(self) -> u32 {
        (self as u32) << SERIAL_BITS
    }
}

/// Walks candidate IDs after `start` and returns the first whose slot is free.
///
/// `increment` produces the next candidate (usually [`ResourceId::next_serial`]
/// or a [`LoadBufferLayout`] category-aware increment) and `in_use` reports
/// whether the candidate's slot is occupied. At most `size` candidates are
/// checked; `None` means every slot is taken.
pub fn find_next<I, U>(start: ResourceId, size: usize, increment: I, mut in_use: U) -> Option<ResourceId>
where
    I: Fn(ResourceId) -> ResourceId,
    U: FnMut(ResourceId) -> bool,
{
    let mut candidate = start;
    for _ in 0..size {
        candidate = increment(candidate);
        if !in_use(candidate) {
            return Some(candidate);
        }
    }
    None
}

/// Generates a typed wrapper around [`ResourceId`] bound to one category.
macro_rules! define_resource_id {
    (
        $(#[$meta:meta])*
        $name:ident, $category:expr, $prefix:expr
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(ResourceId);

        impl $name {
            /// The category every ID of this type belongs to.
            pub const CATEGORY: IdCategory = $category;

            /// Wraps a raw ID. Returns `None` if it is undefined or of another category.
            #[inline]
            pub fn new(id: ResourceId) -> Option<Self> {
                (id.is_in(Self::CATEGORY) && id.is_defined()).then_some(Self(id))
            }

            /// Returns the underlying resource ID.
            #[inline]
            pub const fn id(self) -> ResourceId {
                self.0
            }

            /// Returns the raw 32-bit value.
            #[inline]
            pub const fn value(self) -> u32 {
                self.0.value()
            }

            /// Returns the slot index in an array of `table_size` entries.
            #[inline]
            pub fn to_index(self, table_size: usize) -> Option<usize> {
                self.0.to_index(Self::CATEGORY, table_size)
            }
        }

        impl From<$name> for ResourceId {
            #[inline]
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}:{}", $prefix, self.0.serial())
            }
        }
    };
}

define_resource_id!(
    /// Handle of an access descriptor; what applications hold.
    TableHandle, IdCategory::TableHandle, "tbl"
);

define_resource_id!(
    /// Identifier of a registry record.
    RegId, IdCategory::Registry, "reg"
);

define_resource_id!(
    /// Identifier of a load buffer, shared or dedicated.
    LoadBufferId, IdCategory::LoadBuffer, "buf"
);

define_resource_id!(
    /// Identifier of a validation-result record.
    ValidationId, IdCategory::Validation, "val"
);

define_resource_id!(
    /// Identifier of a dump-control record.
    DumpControlId, IdCategory::DumpControl, "dump"
);

/// Layout of the unified load-buffer ID space.
///
/// Slot indices `0..shared` are the shared pool (buffer category 0). Each
/// registry slot `k` then owns two dedicated slots at
/// `shared + 2k .. shared + 2k + 2` (buffer category `k + 1`). The increment
/// never leaves a buffer category: after the last slot of a category it moves
/// to the first slot of the same category one generation later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadBufferLayout {
    shared: usize,
    tables: usize,
}

impl LoadBufferLayout {
    /// Dedicated buffers per registry slot.
    pub const DEDICATED_PER_TABLE: usize = 2;

    /// Creates a layout for `shared` pool buffers and `tables` registry slots.
    pub const fn new(shared: usize, tables: usize) -> Self {
        Self { shared, tables }
    }

    /// Total number of load-buffer slots.
    pub const fn total(&self) -> usize {
        self.shared + self.tables * Self::DEDICATED_PER_TABLE
    }

    /// Number of shared pool slots.
    pub const fn shared(&self) -> usize {
        self.shared
    }

    /// Returns `(buffer_category, slot_within_category)` for a slot index.
    ///
    /// Category 0 is the shared pool; category `k + 1` belongs to registry slot `k`.
    pub fn locate(&self, index: usize) -> (usize, usize) {
        if index < self.shared {
            (0, index)
        } else {
            let rel = index - self.shared;
            (rel / Self::DEDICATED_PER_TABLE + 1, rel % Self::DEDICATED_PER_TABLE)
        }
    }

    /// Inverse of [`locate`](Self::locate).
    pub fn index_of(&self, category: usize, slot: usize) -> usize {
        if category == 0 {
            slot
        } else {
            self.shared + (category - 1) * Self::DEDICATED_PER_TABLE + slot
        }
    }

    /// Number of slots in a buffer category.
    pub fn category_len(&self, category: usize) -> usize {
        if category == 0 { self.shared } else { Self::DEDICATED_PER_TABLE }
    }

    /// Buffer category for the dedicated buffers of registry slot `reg_index`.
    pub fn dedicated_category(reg_index: usize) -> usize {
        reg_index + 1
    }

    /// Seed ID for a buffer category: the slot before its first slot.
    ///
    /// Passing this to [`find_next`] with [`increment`](Self::increment)
    /// starts the walk at the category's first slot.
    pub fn category_cursor(&self, category: usize) -> ResourceId {
        let last = self.index_of(category, self.category_len(category).saturating_sub(1));
        ResourceId::from_parts(IdCategory::LoadBuffer, last as u32)
    }

    /// Category-preserving increment used when allocating load-buffer IDs.
    pub fn increment(&self, id: ResourceId) -> ResourceId {
        let total = self.total();
        if total == 0 {
            return id;
        }
        let serial = id.serial() as usize;
        let index = serial % total;
        let mut generation = serial / total;
        let (category, slot) = self.locate(index);
        let len = self.category_len(category).max(1);
        let next_slot = if slot + 1 >= len {
            generation += 1;
            0
        } else {
            slot + 1
        };
        let next_index = self.index_of(category, next_slot);
        let mut next = generation * total + next_index;
        if next > MAX_SERIAL as usize {
            next = next_index;
        }
        if next == 0 {
            // Serial 0 is reserved; take the same slot one generation later.
            next = total;
        }
        ResourceId::from_parts(IdCategory::LoadBuffer, next as u32)
    }

    /// Legacy downlink index for a buffer ID.
    ///
    /// Shared buffers report their pool slot (non-negative); dedicated buffers
    /// report `slot - 3`, i.e. `-3` and `-2` for the two dedicated slots.
    pub fn legacy_index(&self, id: LoadBufferId) -> i32 {
        let Some(index) = id.to_index(self.total()) else {
            return -1;
        };
        match self.locate(index) {
            (0, slot) => slot as i32,
            (_, slot) => slot as i32 - 3,
        }
    }
}
