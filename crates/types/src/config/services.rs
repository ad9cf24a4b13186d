//! Capacities, size limits and load filters of the table-services core.

use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use super::{ConfigError, ParseSnafu, ReadSnafu};
use crate::{file_header::TABLE_NAME_FIELD_LEN, ids::{LoadBufferLayout, MAX_SERIAL}};

/// Table-services configuration.
///
/// # Validation Rules
///
/// - every capacity is >= 1 and fits the resource-ID serial space
/// - `max_num_handles` >= `max_num_tables`
/// - table size limits are >= 1
/// - `max_app_name_len + max_table_name_len + 1` leaves room for the
///   terminating NUL of the 40-byte table-name field
///
/// # Example
///
/// ```no_run
/// # use flight_tables_types::config::TableServicesConfig;
/// let config = TableServicesConfig::builder()
///     .max_num_tables(32)
///     .max_simultaneous_loads(2)
///     .build()
///     .expect("valid table services config");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TableServicesConfig {
    /// Registry capacity.
    #[serde(default = "default_max_num_tables")]
    pub max_num_tables: usize,
    /// Access-descriptor capacity.
    #[serde(default = "default_max_num_handles")]
    pub max_num_handles: usize,
    /// Shared load buffers; also bounds concurrent dumps.
    #[serde(default = "default_max_simultaneous_loads")]
    pub max_simultaneous_loads: usize,
    /// Validation-result records.
    #[serde(default = "default_max_num_validations")]
    pub max_num_validations: usize,
    /// Rows of the critical-table registry.
    #[serde(default = "default_max_critical_tables")]
    pub max_critical_tables: usize,
    /// Largest single-buffered table in bytes. Also the shared buffer size.
    #[serde(default = "default_max_table_size")]
    pub max_sngl_table_size: usize,
    /// Largest double-buffered table in bytes.
    #[serde(default = "default_max_table_size")]
    pub max_dbl_table_size: usize,
    /// Longest table name, excluding the application prefix.
    #[serde(default = "default_max_table_name_len")]
    pub max_table_name_len: usize,
    /// Longest application name.
    #[serde(default = "default_max_app_name_len")]
    pub max_app_name_len: usize,
    /// Longest file path accepted for loads and dumps.
    #[serde(default = "default_max_path_len")]
    pub max_path_len: usize,
    /// Spacecraft ID written into produced files.
    #[serde(default = "default_spacecraft_id")]
    pub spacecraft_id: u32,
    /// Processor ID written into produced files.
    #[serde(default = "default_processor_id")]
    pub processor_id: u32,
    /// Spacecraft IDs accepted in load files. Empty disables the check.
    #[serde(default)]
    pub valid_spacecraft_ids: Vec<u32>,
    /// Processor IDs accepted in load files. Empty disables the check.
    #[serde(default)]
    pub valid_processor_ids: Vec<u32>,
    /// CDS block name of the critical-table registry.
    #[serde(default = "default_critical_registry_name")]
    pub critical_registry_name: String,
    /// Destination of a registry dump when no file name is given.
    #[serde(default = "default_registry_dump_file")]
    pub default_registry_dump_file: String,
}

#[bon::bon]
impl TableServicesConfig {
    /// Creates a configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any rule in the type docs is violated.
    #[builder]
    pub fn new(
        #[builder(default = default_max_num_tables())] max_num_tables: usize,
        #[builder(default = default_max_num_handles())] max_num_handles: usize,
        #[builder(default = default_max_simultaneous_loads())] max_simultaneous_loads: usize,
        #[builder(default = default_max_num_validations())] max_num_validations: usize,
        #[builder(default = default_max_critical_tables())] max_critical_tables: usize,
        #[builder(default = default_max_table_size())] max_sngl_table_size: usize,
        #[builder(default = default_max_table_size())] max_dbl_table_size: usize,
        #[builder(default = default_max_table_name_len())] max_table_name_len: usize,
        #[builder(default = default_max_app_name_len())] max_app_name_len: usize,
        #[builder(default = default_max_path_len())] max_path_len: usize,
        #[builder(default = default_spacecraft_id())] spacecraft_id: u32,
        #[builder(default = default_processor_id())] processor_id: u32,
        #[builder(default)] valid_spacecraft_ids: Vec<u32>,
        #[builder(default)] valid_processor_ids: Vec<u32>,
        #[builder(default = default_critical_registry_name(), into)] critical_registry_name: String,
        #[builder(default = default_registry_dump_file(), into)] default_registry_dump_file: String,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            max_num_tables,
            max_num_handles,
            max_simultaneous_loads,
            max_num_validations,
            max_critical_tables,
            max_sngl_table_size,
            max_dbl_table_size,
            max_table_name_len,
            max_app_name_len,
            max_path_len,
            spacecraft_id,
            processor_id,
            valid_spacecraft_ids,
            valid_processor_ids,
            critical_registry_name,
            default_registry_dump_file,
        };
        config.validate()?;
        Ok(config)
    }
}

impl TableServicesConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] describing the first violated rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capacities = [
            ("max_num_tables", self.max_num_tables),
            ("max_num_handles", self.max_num_handles),
            ("max_simultaneous_loads", self.max_simultaneous_loads),
            ("max_num_validations", self.max_num_validations),
            ("max_critical_tables", self.max_critical_tables),
        ];
        for (name, value) in capacities {
            if value == 0 || value > MAX_SERIAL as usize {
                return Err(invalid(format!("{name} must be 1-{MAX_SERIAL}, got {value}")));
            }
        }
        if self.buffer_layout().total() > MAX_SERIAL as usize {
            return Err(invalid(format!(
                "load buffer slots ({}) exceed the serial space",
                self.buffer_layout().total()
            )));
        }
        if self.max_num_handles < self.max_num_tables {
            return Err(invalid(format!(
                "max_num_handles ({}) must be >= max_num_tables ({})",
                self.max_num_handles, self.max_num_tables
            )));
        }
        if self.max_sngl_table_size == 0 || self.max_dbl_table_size == 0 {
            return Err(invalid("table size limits must be >= 1".to_string()));
        }
        if self.max_table_name_len == 0 || self.max_app_name_len == 0 {
            return Err(invalid("name length limits must be >= 1".to_string()));
        }
        if self.max_full_name_len() >= TABLE_NAME_FIELD_LEN {
            return Err(invalid(format!(
                "qualified table names of {} bytes do not fit the {TABLE_NAME_FIELD_LEN}-byte name field",
                self.max_full_name_len()
            )));
        }
        if self.max_path_len == 0 {
            return Err(invalid("max_path_len must be >= 1".to_string()));
        }
        if self.critical_registry_name.is_empty() {
            return Err(invalid("critical_registry_name must not be empty".to_string()));
        }
        Ok(())
    }

    /// Longest `AppName.TableName`.
    pub fn max_full_name_len(&self) -> usize {
        self.max_app_name_len + 1 + self.max_table_name_len
    }

    /// Shared buffer size: the largest table any load or dump can stage.
    pub fn shared_buffer_size(&self) -> usize {
        self.max_sngl_table_size.max(self.max_dbl_table_size)
    }

    /// Layout of the load-buffer ID space.
    pub fn buffer_layout(&self) -> LoadBufferLayout {
        LoadBufferLayout::new(self.max_simultaneous_loads, self.max_num_tables)
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Validation`] for out-of-range values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).context(ParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, otherwise as
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .context(ReadSnafu { path: path.display().to_string() })?;
        Self::from_toml_str(&text)
    }
}

impl Default for TableServicesConfig {
    fn default() -> Self {
        Self {
            max_num_tables: default_max_num_tables(),
            max_num_handles: default_max_num_handles(),
            max_simultaneous_loads: default_max_simultaneous_loads(),
            max_num_validations: default_max_num_validations(),
            max_critical_tables: default_max_critical_tables(),
            max_sngl_table_size: default_max_table_size(),
            max_dbl_table_size: default_max_table_size(),
            max_table_name_len: default_max_table_name_len(),
            max_app_name_len: default_max_app_name_len(),
            max_path_len: default_max_path_len(),
            spacecraft_id: default_spacecraft_id(),
            processor_id: default_processor_id(),
            valid_spacecraft_ids: Vec::new(),
            valid_processor_ids: Vec::new(),
            critical_registry_name: default_critical_registry_name(),
            default_registry_dump_file: default_registry_dump_file(),
        }
    }
}

fn invalid(message: String) -> ConfigError {
    ConfigError::Validation { message }
}

fn default_max_num_tables() -> usize {
    128
}

fn default_max_num_handles() -> usize {
    256
}

fn default_max_simultaneous_loads() -> usize {
    4
}

fn default_max_num_validations() -> usize {
    10
}

fn default_max_critical_tables() -> usize {
    32
}

fn default_max_table_size() -> usize {
    16 * 1024
}

fn default_max_table_name_len() -> usize {
    16
}

fn default_max_app_name_len() -> usize {
    20
}

fn default_max_path_len() -> usize {
    64
}

fn default_spacecraft_id() -> u32 {
    0x42
}

fn default_processor_id() -> u32 {
    1
}

fn default_critical_registry_name() -> String {
    "CDS_Registry".to_string()
}

fn default_registry_dump_file() -> String {
    "/ram/cfe_tbl_reg.log".to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TableServicesConfig::builder().build().expect("defaults should be valid");
        assert_eq!(config, TableServicesConfig::default());
        assert_eq!(config.max_num_tables, 128);
        assert_eq!(config.max_simultaneous_loads, 4);
        assert_eq!(config.max_full_name_len(), 37);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = TableServicesConfig::builder().max_num_validations(0).build().unwrap_err();
        assert!(err.to_string().contains("max_num_validations"), "got: {err}");
    }

    #[test]
    fn test_handles_must_cover_tables() {
        let result = TableServicesConfig::builder().max_num_tables(64).max_num_handles(32).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_name_lengths_must_fit_field() {
        let result =
            TableServicesConfig::builder().max_app_name_len(20).max_table_name_len(19).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_from_toml_applies_defaults() {
        let config = TableServicesConfig::from_toml_str(
            r#"
            max_num_tables = 8
            valid_spacecraft_ids = [66, 67]
            "#,
        )
        .unwrap();
        assert_eq!(config.max_num_tables, 8);
        assert_eq!(config.valid_spacecraft_ids, vec![66, 67]);
        assert_eq!(config.max_num_handles, 256);
    }

    #[test]
    fn test_from_toml_validates() {
        let err = TableServicesConfig::from_toml_str("max_num_handles = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn test_from_toml_parse_error() {
        let err = TableServicesConfig::from_toml_str("max_num_tables = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_from_toml_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = TableServicesConfig::from_toml_file(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
