//! Configuration for flight table services.
//!
//! Configuration is loaded from TOML documents or built in code. Config
//! structs validate their values at construction time via fallible builders;
//! deserialized values are checked by [`TableServicesConfig::validate`].

mod services;

use snafu::Snafu;

pub use services::*;

/// Configuration error.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    /// A configuration value is invalid.
    #[snafu(display("invalid config: {message}"))]
    Validation {
        /// Description of the validation failure.
        message: String,
    },

    /// The TOML document could not be parsed.
    #[snafu(display("failed to parse config: {source}"))]
    Parse {
        /// The underlying TOML error.
        source: toml::de::Error,
    },

    /// The config file could not be read.
    #[snafu(display("failed to read config file {path}: {source}"))]
    Read {
        /// Path of the file.
        path: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}
