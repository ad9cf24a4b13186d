//! Table registration option flags.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Bit-packed table options supplied at registration.
    ///
    /// The zero-valued defaults (`SNGL_BUFFER`, `LOAD_DUMP`, `NOT_CRITICAL`) are
    /// the absence of the corresponding bit. `USR_DEF_ADDR` includes the
    /// `DUMP_ONLY` bit, so a user-defined-address table is always dump-only.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct TableOptions: u16 {
        /// Two dedicated buffers that flip on activation.
        const DBL_BUFFER = 0x0001;
        /// Contents owned by the producing application; snapshot only.
        const DUMP_ONLY = 0x0002;
        /// Marker bit for a caller-supplied table address.
        const USR_DEF_MSK = 0x0004;
        /// Caller-supplied address; implies `DUMP_ONLY`.
        const USR_DEF_ADDR = 0x0006;
        /// Mirrored into the critical data store and recovered after reset.
        const CRITICAL = 0x0008;
    }
}

impl TableOptions {
    /// Single dedicated buffer (default).
    pub const SNGL_BUFFER: Self = Self::empty();
    /// Loadable and dumpable (default).
    pub const LOAD_DUMP: Self = Self::empty();
    /// Not mirrored into the critical data store (default).
    pub const NOT_CRITICAL: Self = Self::empty();

    /// Parses raw option bits, rejecting undefined bits.
    pub fn from_raw(bits: u16) -> Option<Self> {
        Self::from_bits(bits)
    }

    /// Returns true if this combination may be registered.
    ///
    /// Dump-only tables can be neither double-buffered nor critical, and the
    /// user-defined-address marker is only meaningful together with dump-only.
    pub fn is_valid(self) -> bool {
        if self.contains(Self::USR_DEF_MSK) && !self.contains(Self::DUMP_ONLY) {
            return false;
        }
        if self.contains(Self::DUMP_ONLY)
            && (self.contains(Self::DBL_BUFFER) || self.contains(Self::CRITICAL))
        {
            return false;
        }
        true
    }

    /// Double-buffered.
    pub fn double_buffered(self) -> bool {
        self.contains(Self::DBL_BUFFER)
    }

    /// Dump-only.
    pub fn dump_only(self) -> bool {
        self.contains(Self::DUMP_ONLY)
    }

    /// User-defined address.
    pub fn user_def_addr(self) -> bool {
        self.contains(Self::USR_DEF_ADDR)
    }

    /// Critical.
    pub fn critical(self) -> bool {
        self.contains(Self::CRITICAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let opts = TableOptions::SNGL_BUFFER | TableOptions::LOAD_DUMP | TableOptions::NOT_CRITICAL;
        assert!(opts.is_empty());
        assert!(opts.is_valid());
    }

    #[test]
    fn test_usr_def_addr_implies_dump_only() {
        let opts = TableOptions::USR_DEF_ADDR;
        assert!(opts.dump_only());
        assert!(opts.user_def_addr());
        assert!(opts.is_valid());
    }

    #[test]
    fn test_forbidden_combinations() {
        assert!(!(TableOptions::DUMP_ONLY | TableOptions::DBL_BUFFER).is_valid());
        assert!(!(TableOptions::DUMP_ONLY | TableOptions::CRITICAL).is_valid());
        assert!(!TableOptions::USR_DEF_MSK.is_valid());
        assert!((TableOptions::DBL_BUFFER | TableOptions::CRITICAL).is_valid());
    }

    #[test]
    fn test_from_raw_rejects_unknown_bits() {
        assert!(TableOptions::from_raw(0x0100).is_none());
        assert_eq!(TableOptions::from_raw(0x0009), Some(TableOptions::DBL_BUFFER | TableOptions::CRITICAL));
    }
}
