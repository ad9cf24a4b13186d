//! Ground-command operations: dumps, registry dumps and housekeeping.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;

use common::{config, Harness};
use flight_tables_core::report::record_len;
use flight_tables_core::{
    BackgroundFileWriter, BufferSelect, EventId, EventSink, FileWriter, Info, LoadSource, TableError,
    TableServices,
};
use flight_tables_test_utils::strategies::arb_payload;
use flight_tables_types::{StdFileHeader, TableOptions, FS_HEADER_SIZE, SUBTYPE_TBL_REG, TBL_HEADER_SIZE};
use proptest::prelude::*;

#[test]
fn test_registry_dump_inline() {
    let h = Harness::new();
    let app = h.app("A");
    let (handle, _) = h.services.register(app, "T1", 8, TableOptions::empty(), None).unwrap();
    h.services.register(app, "T2", 8, TableOptions::DBL_BUFFER, None).unwrap();
    h.services.load(app, handle, LoadSource::Bytes(&[1; 8])).unwrap();

    let path = h.dir.path_string("registry.dat");
    h.services.dump_registry_cmd(Some(&path)).unwrap();
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes.len(), FS_HEADER_SIZE + 2 * record_len(h.services.config()));
    let header = StdFileHeader::from_bytes(&bytes[..FS_HEADER_SIZE]).unwrap();
    assert_eq!(header.sub_type, SUBTYPE_TBL_REG);
    assert_eq!(header.spacecraft_id, h.services.config().spacecraft_id);

    let dumped = h.events.last(EventId::RegistryDumped).unwrap();
    assert_eq!(dumped.data, [2, 0]);
    h.services.dump_registry_cmd(Some(&path)).unwrap();
    assert_eq!(h.events.last(EventId::RegistryDumped).unwrap().data, [2, 1]);
}

#[test]
fn test_registry_dump_rejects_long_path() {
    let h = Harness::new();
    let long = "r".repeat(400);
    let err = h.services.dump_registry_cmd(Some(&long)).unwrap_err();
    assert!(matches!(err, TableError::FilenameTooLong { .. }), "got {err:?}");
    assert_eq!(h.events.count(EventId::RegistryDumpError), 1);
}

#[test]
fn test_registry_dump_to_default_file() {
    let h = Harness::new();
    let target = h.dir.path_string("default_reg.dat");
    let config = flight_tables_types::TableServicesConfig::builder()
        .max_path_len(256)
        .default_registry_dump_file(target.clone())
        .build()
        .unwrap();
    let services = TableServices::builder().config(config).build().unwrap();
    services.dump_registry_cmd(None).unwrap();
    assert_eq!(std::fs::read(&target).unwrap().len(), FS_HEADER_SIZE);
}

#[test]
fn test_registry_dump_on_background_writer() {
    let h = Harness::new();
    let writer = Arc::new(BackgroundFileWriter::start(4).unwrap());
    let services = TableServices::builder()
        .config(config())
        .events(h.events.clone() as Arc<dyn EventSink>)
        .writer(writer.clone() as Arc<dyn FileWriter>)
        .build()
        .unwrap();
    let app = services.register_app("A").unwrap();
    services.register(app, "T", 8, TableOptions::empty(), None).unwrap();

    let path = h.dir.path_string("bg_registry.dat");
    services.dump_registry_cmd(Some(&path)).unwrap();
    writer.flush();
    assert_eq!(std::fs::read(&path).unwrap().len(), FS_HEADER_SIZE + record_len(services.config()));
    assert_eq!(h.events.count(EventId::RegistryDumped), 1);
}

#[test]
fn test_dump_active_buffer_and_overwrite() {
    let h = Harness::new();
    let app = h.app("A");
    let (handle, _) = h.services.register(app, "T", 8, TableOptions::empty(), None).unwrap();
    let path = h.dir.path_string("t.dmp");
    assert!(matches!(
        h.services.dump_cmd("A.T", BufferSelect::Active, &path),
        Err(TableError::NeverLoaded { .. })
    ));
    assert!(matches!(
        h.services.dump_cmd("A.T", BufferSelect::Inactive, &path),
        Err(TableError::NoInactiveBuffer { .. })
    ));
    assert!(matches!(
        h.services.dump_cmd("A.Missing", BufferSelect::Active, &path),
        Err(TableError::InvalidName { .. })
    ));

    h.services.load(app, handle, LoadSource::Bytes(&[4; 8])).unwrap();
    assert_eq!(h.services.dump_cmd("A.T", BufferSelect::Active, &path).unwrap(), Info::Success);
    h.services.load(app, handle, LoadSource::Bytes(&[5; 8])).unwrap();
    h.services.housekeeping();

    let written = std::fs::read(&path).unwrap();
    assert_eq!(written.len(), FS_HEADER_SIZE + TBL_HEADER_SIZE + 8);
    assert!(written.ends_with(&[4; 8]), "the snapshot is taken when the command runs");
    assert_eq!(h.events.count(EventId::DumpWritten), 1);

    h.services.dump_cmd("A.T", BufferSelect::Active, &path).unwrap();
    let hk = h.services.housekeeping();
    assert!(std::fs::read(&path).unwrap().ends_with(&[5; 8]));
    assert_eq!(h.events.count(EventId::DumpOverwritten), 1);
    assert_eq!(hk.num_free_shared_bufs, h.services.config().max_simultaneous_loads);
}

#[test]
fn test_dump_of_load_in_progress() {
    let h = Harness::new();
    let app = h.app("A");
    h.services.register(app, "T", 8, TableOptions::empty(), Some(Arc::new(|_: &[u8]| 0))).unwrap();
    let image = h.image("t.tbl", "A.T", &[6; 8]);
    h.services.load_file_cmd(&image).unwrap();

    let path = h.dir.path_string("pending.dmp");
    assert_eq!(h.services.dump_cmd("A.T", BufferSelect::Inactive, &path).unwrap(), Info::Success);
    h.services.housekeeping();
    assert!(std::fs::read(&path).unwrap().ends_with(&[6; 8]));
}

#[test]
fn test_load_file_cmd_rejections() {
    let h = Harness::new();
    let app = h.app("A");
    h.services.register(app, "D", 8, TableOptions::DUMP_ONLY, None).unwrap();
    let image = h.image("d.tbl", "A.D", &[1; 8]);
    assert!(matches!(h.services.load_file_cmd(&image), Err(TableError::DumpOnly { .. })));

    let orphan = h.image("o.tbl", "A.Nobody", &[1; 8]);
    assert!(matches!(h.services.load_file_cmd(&orphan), Err(TableError::InvalidName { .. })));
    assert!(matches!(h.services.activate_cmd("A.D"), Err(TableError::DumpOnly { .. })));
    assert_eq!(h.events.count(EventId::LoadError), 2);
}

#[test]
fn test_load_file_cmd_reloads_pending_buffer() {
    let h = Harness::new();
    let app = h.app("A");
    let (handle, _) = h.services.register(app, "T", 8, TableOptions::empty(), None).unwrap();
    h.services.load(app, handle, LoadSource::Bytes(&[1; 8])).unwrap();

    let first = h.image("first.tbl", "A.T", &[2; 8]);
    let second = h.partial_image("second.tbl", "A.T", 4, &[3; 4]);
    h.services.load_file_cmd(&first).unwrap();
    assert_eq!(h.services.load_file_cmd(&second).unwrap(), Info::WarnPartialLoad);
    assert_eq!(h.services.housekeeping().num_load_pending, 1);

    assert_eq!(h.services.activate_cmd("A.T").unwrap(), Info::UpdatePending);
    assert_eq!(h.services.update(app, handle).unwrap(), Info::Success);
    assert_eq!(h.contents(app, handle), vec![2, 2, 2, 2, 3, 3, 3, 3]);
    assert_eq!(h.services.activate_cmd("A.T").unwrap(), Info::NoUpdatePending);

    let hk = h.services.housekeeping();
    assert_eq!(hk.last_updated_table, "A.T");
    assert_eq!(hk.last_table_loaded, "A.T");
    assert_eq!(hk.last_file_loaded, second);
}

#[test]
fn test_housekeeping_counts() {
    let h = Harness::new();
    let app = h.app("A");
    let (a, _) = h.services.register(app, "T1", 8, TableOptions::empty(), None).unwrap();
    h.services.register(app, "T2", 8, TableOptions::empty(), None).unwrap();
    h.services.load(app, a, LoadSource::Bytes(&[1; 8])).unwrap();
    h.services.load_file_cmd(&h.image("t1.tbl", "A.T1", &[2; 8])).unwrap();

    let hk = h.services.housekeeping();
    assert_eq!(hk.num_tables, 2);
    assert_eq!(hk.num_load_pending, 1);
    assert_eq!(hk.num_free_shared_bufs, h.services.config().max_simultaneous_loads - 1);
    assert_eq!(hk.last_updated_table, "A.T1");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_memory_load_fills_prefix(bytes in arb_payload(64), size in 1usize..=64, len in 1usize..=64) {
        let payload = &bytes[..len.min(size)];
        let h = Harness::new();
        let app = h.app("P");
        let (handle, _) = h.services.register(app, "T", size, TableOptions::empty(), None).unwrap();
        let info = h.services.load(app, handle, LoadSource::Bytes(payload)).unwrap();
        let expected = if payload.len() < size { Info::WarnShortFile } else { Info::Success };
        prop_assert_eq!(info, expected);

        let contents = h.contents(app, handle);
        prop_assert_eq!(&contents[..payload.len()], payload);
        prop_assert!(contents[payload.len()..].iter().all(|b| *b == 0));
        prop_assert_eq!(h.services.get_info("P.T").unwrap().crc, crc32fast::hash(&contents));
    }
}
