//! Critical-table registry.
//!
//! Each critical table has a row here mirroring the status fields that must
//! survive a reset. The whole array is stored in one fixed-size CDS block:
//!
//! ```text
//! ┌───────────────┬──────────────────────────────┬─────────┐
//! │ len: u32 (BE) │ postcard(Vec<CriticalRow>)   │ padding │
//! └───────────────┴──────────────────────────────┴─────────┘
//! ```

use flight_tables_cds::CdsHandle;
use flight_tables_types::{MissionTime, TableServicesConfig};
use serde::{Deserialize, Serialize};

use crate::error::{ExternalResourceFailSnafu, Result, internal};
use crate::registry::Registry;

const LEN_PREFIX: usize = 4;

/// Persisted state of one critical table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct CriticalTableEntry {
    /// `None` marks a free row.
    pub cds_handle: Option<CdsHandle>,
    pub name: String,
    pub file_time: MissionTime,
    pub time_of_last_update: MissionTime,
    pub last_file_loaded: String,
    pub loaded_once: bool,
}

impl CriticalTableEntry {
    pub fn is_free(&self) -> bool {
        self.cds_handle.is_none()
    }
}

/// Size of the CDS block holding the critical-table registry.
pub(crate) fn registry_block_size(config: &TableServicesConfig) -> usize {
    8 + config.max_critical_tables * (96 + config.max_path_len)
}

/// Serializes `rows` into a block of exactly `block_size` bytes.
pub(crate) fn encode_rows(rows: &[CriticalTableEntry], block_size: usize) -> Result<Vec<u8>> {
    let body = postcard::to_allocvec(rows)
        .map_err(|e| internal(format!("critical registry encode failed: {e}")))?;
    if LEN_PREFIX + body.len() > block_size {
        return Err(internal(format!(
            "critical registry needs {} bytes, block holds {block_size}",
            LEN_PREFIX + body.len()
        )));
    }
    let mut out = vec![0u8; block_size];
    out[..LEN_PREFIX].copy_from_slice(&(body.len() as u32).to_be_bytes());
    out[LEN_PREFIX..LEN_PREFIX + body.len()].copy_from_slice(&body);
    Ok(out)
}

/// Parses a block written by [`encode_rows`], padding or truncating to `capacity` rows.
pub(crate) fn decode_rows(block: &[u8], capacity: usize) -> Result<Vec<CriticalTableEntry>> {
    let prefix: [u8; LEN_PREFIX] = block
        .get(..LEN_PREFIX)
        .and_then(|p| p.try_into().ok())
        .ok_or_else(|| internal("critical registry block too short"))?;
    let len = u32::from_be_bytes(prefix) as usize;
    let body = block
        .get(LEN_PREFIX..LEN_PREFIX + len)
        .ok_or_else(|| internal("critical registry length exceeds block"))?;
    let mut rows: Vec<CriticalTableEntry> = postcard::from_bytes(body).map_err(|e| {
        ExternalResourceFailSnafu { message: format!("critical registry decode failed: {e}") }.build()
    })?;
    rows.resize(capacity, CriticalTableEntry::default());
    Ok(rows)
}

impl Registry {
    /// Row for `name`, if one is in use.
    pub fn critical_row(&self, name: &str) -> Option<usize> {
        self.critical.iter().position(|r| !r.is_free() && r.name == name)
    }

    /// Row for `name`, or a free row claimed for it.
    pub fn claim_critical_row(&mut self, name: &str, handle: CdsHandle) -> Option<usize> {
        let index = self.critical_row(name).or_else(|| self.critical.iter().position(CriticalTableEntry::is_free))?;
        let row = &mut self.critical[index];
        if row.name != name {
            *row = CriticalTableEntry { name: name.to_string(), ..CriticalTableEntry::default() };
        }
        row.cds_handle = Some(handle);
        Some(index)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn row(name: &str, handle: u32) -> CriticalTableEntry {
        CriticalTableEntry {
            cds_handle: Some(CdsHandle::from_raw(handle)),
            name: name.into(),
            file_time: MissionTime::new(10, 20),
            time_of_last_update: MissionTime::new(30, 40),
            last_file_loaded: "/cf/table.tbl".into(),
            loaded_once: true,
        }
    }

    #[test]
    fn test_rows_survive_block_encoding() {
        let config = TableServicesConfig::default();
        let mut rows = vec![CriticalTableEntry::default(); config.max_critical_tables];
        rows[3] = row("NAV.Gains", 7);
        let block = encode_rows(&rows, registry_block_size(&config)).unwrap();
        assert_eq!(block.len(), registry_block_size(&config));
        let back = decode_rows(&block, config.max_critical_tables).unwrap();
        assert_eq!(back, rows);
    }

    #[test]
    fn test_full_registry_fits_block() {
        let config = TableServicesConfig::default();
        let long_path = "p".repeat(config.max_path_len - 1);
        let long_name = "n".repeat(config.max_full_name_len());
        let rows: Vec<_> = (0..config.max_critical_tables)
            .map(|i| CriticalTableEntry {
                cds_handle: Some(CdsHandle::from_raw(u32::MAX - i as u32)),
                name: long_name.clone(),
                file_time: MissionTime::new(u32::MAX, u32::MAX),
                time_of_last_update: MissionTime::new(u32::MAX, u32::MAX),
                last_file_loaded: long_path.clone(),
                loaded_once: true,
            })
            .collect();
        assert!(encode_rows(&rows, registry_block_size(&config)).is_ok());
    }

    #[test]
    fn test_blank_block_is_rejected() {
        let block = vec![0xFF; 64];
        assert!(decode_rows(&block, 4).is_err());
    }

    #[test]
    fn test_claim_reuses_named_row() {
        let config = TableServicesConfig::builder().max_critical_tables(2).build().unwrap();
        let mut reg = Registry::new(&config);
        let a = reg.claim_critical_row("A.T", CdsHandle::from_raw(1)).unwrap();
        let again = reg.claim_critical_row("A.T", CdsHandle::from_raw(5)).unwrap();
        assert_eq!(a, again);
        assert_eq!(reg.critical[a].cds_handle, Some(CdsHandle::from_raw(5)));
        reg.claim_critical_row("B.T", CdsHandle::from_raw(2)).unwrap();
        assert!(reg.claim_critical_row("C.T", CdsHandle::from_raw(3)).is_none());
    }
}
