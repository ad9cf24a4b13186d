//! Critical tables surviving a simulated processor reset.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{config, memory_cds, Harness};
use flight_tables_cds::{CdsStore, InMemoryBackend};
use flight_tables_core::{EventId, Info, LoadSource, TableError};
use flight_tables_types::{MissionTime, TableOptions};

const IMAGE_SIZE: usize = 64 * 1024;

#[test]
fn test_critical_table_recovered_after_reset() {
    let backend = InMemoryBackend::new(IMAGE_SIZE);
    let path;
    {
        let h = Harness::with_cds(config(), memory_cds(&backend));
        let app = h.app("NAV");
        let (handle, info) = h.services.register(app, "Gains", 32, TableOptions::CRITICAL, None).unwrap();
        assert_eq!(info, Info::Success);
        path = h.image("gains.tbl", "NAV.Gains", &[0x11; 32]);
        h.services.load(app, handle, LoadSource::File(&path)).unwrap();
        assert!(h.services.get_info("NAV.Gains").unwrap().critical);
    }

    let h = Harness::with_cds(config(), memory_cds(&backend));
    h.clock.set(9000);
    let app = h.app("NAV");
    let (handle, info) = h.services.register(app, "Gains", 32, TableOptions::CRITICAL, None).unwrap();
    assert_eq!(info, Info::RecoveredTable);
    assert_eq!(h.events.count(EventId::Recovered), 1);
    assert_eq!(h.contents(app, handle), vec![0x11; 32]);

    let table = h.services.get_info("NAV.Gains").unwrap();
    assert!(table.table_loaded_once);
    assert_eq!(table.last_file_loaded, path);
    assert_eq!(table.file_time, MissionTime::new(1000, 0));
    assert_eq!(table.time_of_last_update, MissionTime::new(5000, 0));
    assert_eq!(table.crc, crc32fast::hash(&[0x11; 32]));
}

#[test]
fn test_in_place_changes_are_mirrored() {
    let backend = InMemoryBackend::new(IMAGE_SIZE);
    {
        let h = Harness::with_cds(config(), memory_cds(&backend));
        let app = h.app("NAV");
        let (handle, _) = h.services.register(app, "Gains", 4, TableOptions::CRITICAL, None).unwrap();
        h.services.load(app, handle, LoadSource::Bytes(&[1; 4])).unwrap();
        let (data, _) = h.services.get_address(app, handle).unwrap();
        data.write()[3] = 8;
        h.services.release_address(app, handle).unwrap();
        h.services.modified(app, handle).unwrap();
    }

    let h = Harness::with_cds(config(), memory_cds(&backend));
    let app = h.app("NAV");
    let (handle, info) = h.services.register(app, "Gains", 4, TableOptions::CRITICAL, None).unwrap();
    assert_eq!(info, Info::RecoveredTable);
    assert_eq!(h.contents(app, handle), vec![1, 1, 1, 8]);
    assert!(h.services.get_info("NAV.Gains").unwrap().last_file_loaded.ends_with("(*)"));
}

#[test]
fn test_unloaded_critical_table_registers_fresh() {
    let backend = InMemoryBackend::new(IMAGE_SIZE);
    {
        let h = Harness::with_cds(config(), memory_cds(&backend));
        let app = h.app("NAV");
        h.services.register(app, "Gains", 8, TableOptions::CRITICAL, None).unwrap();
    }
    let h = Harness::with_cds(config(), memory_cds(&backend));
    let app = h.app("NAV");
    let (handle, info) = h.services.register(app, "Gains", 8, TableOptions::CRITICAL, None).unwrap();
    assert_eq!(info, Info::Success);
    assert!(matches!(h.services.get_address(app, handle), Err(TableError::NeverLoaded { .. })));
}

#[test]
fn test_corrupt_block_registers_fresh() {
    let backend = InMemoryBackend::new(IMAGE_SIZE);
    {
        let h = Harness::with_cds(config(), memory_cds(&backend));
        let app = h.app("NAV");
        let (handle, _) = h.services.register(app, "Gains", 16, TableOptions::CRITICAL, None).unwrap();
        h.services.load(app, handle, LoadSource::Bytes(&[3; 16])).unwrap();
    }

    let offset = {
        let store = CdsStore::open(backend.clone(), 32).unwrap();
        store.entry("NAV.Gains").expect("table block should exist").offset
    };
    backend.corrupt_byte(offset as usize);

    let h = Harness::with_cds(config(), memory_cds(&backend));
    let app = h.app("NAV");
    let (handle, info) = h.services.register(app, "Gains", 16, TableOptions::CRITICAL, None).unwrap();
    assert_eq!(info, Info::Success);
    assert_eq!(h.events.count(EventId::AccessError), 1);
    assert!(matches!(h.services.get_address(app, handle), Err(TableError::NeverLoaded { .. })));
    assert!(h.services.get_info("NAV.Gains").unwrap().critical);
}

#[test]
fn test_critical_without_store_is_not_critical() {
    let h = Harness::new();
    let app = h.app("NAV");
    let (_, info) = h.services.register(app, "Gains", 8, TableOptions::CRITICAL, None).unwrap();
    assert_eq!(info, Info::WarnNotCritical);
    assert!(!h.services.get_info("NAV.Gains").unwrap().critical);
    assert_eq!(h.events.count(EventId::NotCritical), 1);
}

#[test]
fn test_delete_cds_block() {
    let backend = InMemoryBackend::new(IMAGE_SIZE);
    let h = Harness::with_cds(config(), memory_cds(&backend));
    let app = h.app("NAV");
    let (handle, _) = h.services.register(app, "Gains", 8, TableOptions::CRITICAL, None).unwrap();
    h.services.load(app, handle, LoadSource::Bytes(&[5; 8])).unwrap();

    assert!(matches!(h.services.delete_cds_cmd("NAV.Gains"), Err(TableError::CdsInUse { .. })));
    h.services.unregister(app, handle).unwrap();
    h.services.delete_cds_cmd("NAV.Gains").unwrap();
    assert_eq!(h.events.count(EventId::CdsDeleted), 1);
    assert!(matches!(h.services.delete_cds_cmd("NAV.Gains"), Err(TableError::CdsNotFound { .. })));

    let registry = h.services.config().critical_registry_name.clone();
    assert!(matches!(h.services.delete_cds_cmd(&registry), Err(TableError::CdsWrongType { .. })));
    assert_eq!(h.events.count(EventId::CdsDeleteError), 3);

    let (_, info) = h.services.register(app, "Gains", 8, TableOptions::CRITICAL, None).unwrap();
    assert_eq!(info, Info::Success);
}

#[test]
fn test_delete_without_store_is_not_found() {
    let h = Harness::new();
    assert!(matches!(h.services.delete_cds_cmd("NAV.Gains"), Err(TableError::CdsNotFound { .. })));
}
