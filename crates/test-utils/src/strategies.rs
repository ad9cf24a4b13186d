//! Proptest strategies for table-services inputs.
//!
//! # Usage
//!
//! ```no_run
//! use flight_tables_test_utils::strategies;
//! use proptest::prelude::*;
//!
//! proptest! {
//!     #[test]
//!     fn my_property(opts in strategies::arb_valid_options()) {
//!         prop_assert!(opts.is_valid());
//!     }
//! }
//! ```

use flight_tables_types::TableOptions;
use proptest::prelude::*;

/// Generates a table name of 1-16 characters matching `[A-Za-z][A-Za-z0-9_]{0,15}`.
pub fn arb_table_name() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9_]{0,15}"
}

/// Generates an application name of 1-20 upper-case characters.
pub fn arb_app_name() -> impl Strategy<Value = String> {
    "[A-Z][A-Z0-9_]{0,19}"
}

/// Generates every option combination that registration accepts.
pub fn arb_valid_options() -> impl Strategy<Value = TableOptions> {
    prop::sample::select(vec![
        TableOptions::empty(),
        TableOptions::DBL_BUFFER,
        TableOptions::CRITICAL,
        TableOptions::DBL_BUFFER | TableOptions::CRITICAL,
        TableOptions::DUMP_ONLY,
        TableOptions::USR_DEF_ADDR,
    ])
}

/// Generates a payload of exactly `size` random bytes.
pub fn arb_payload(size: usize) -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), size)
}

/// Generates a table size between 1 and `max` bytes.
pub fn arb_table_size(max: usize) -> impl Strategy<Value = usize> {
    1..=max.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn prop_valid_options_are_valid(opts in arb_valid_options()) {
            prop_assert!(opts.is_valid());
        }

        #[test]
        fn prop_table_name_bounded(name in arb_table_name()) {
            prop_assert!(!name.is_empty() && name.len() <= 16);
        }
    }
}
