use std::io::Cursor;

use paste::paste;
use uuid::Uuid;
use uuid_int_map::{
    CurrentThreadExecutor, Key, MapError, PartitionError, ScopedThreadExecutor, UuidIntMap,
};

const NUM_ENTRIES: usize = 20_000;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn random_entries(n: usize) -> Vec<(Key, i32)> {
    (0..n)
        .map(|i| (Key::from(Uuid::new_v4()), i as i32))
        .collect()
}

macro_rules! generate_test_bulk_insert {
    ($name:ident, $executor:expr, $num_workers:expr) => {
        paste! {
            #[test]
            fn [<test_ $name _bulk_insert_entries>]() {
                init_logger();
                let entries = random_entries(NUM_ENTRIES);

                let map = UuidIntMap::new();
                map.bulk_insert_entries_parallel(&entries, $num_workers, &$executor)
                    .unwrap();

                assert_eq!(map.len(), NUM_ENTRIES);
                for (key, value) in &entries {
                    assert_eq!(map.get(*key), Some(*value));
                }
            }

            #[test]
            fn [<test_ $name _bulk_insert_map>]() {
                init_logger();
                let source = UuidIntMap::new();
                source.insert_all(random_entries(NUM_ENTRIES)).unwrap();

                let target = UuidIntMap::with_capacity(10);
                target
                    .bulk_insert_parallel(&source, $num_workers, &$executor)
                    .unwrap();

                assert!(target.try_eq(&source).unwrap());
                assert_eq!(target.content_hash().unwrap(), source.content_hash().unwrap());
            }
        }
    };
}

generate_test_bulk_insert!(scoped_4, ScopedThreadExecutor, 4);
generate_test_bulk_insert!(scoped_7, ScopedThreadExecutor, 7);
generate_test_bulk_insert!(current_thread_4, CurrentThreadExecutor, 4);
generate_test_bulk_insert!(sequential, ScopedThreadExecutor, 1);

#[test]
fn bulk_insert_reports_capacity_exhaustion() {
    init_logger();
    let entries = random_entries(NUM_ENTRIES);

    let map = UuidIntMap::builder().max_capacity(1024).build();
    let result = map.bulk_insert_entries_parallel(&entries, 4, &ScopedThreadExecutor);

    match result {
        Err(MapError::BulkInsert {
            partitions, first, ..
        }) => {
            assert_eq!(partitions, 4);
            assert!(matches!(
                *first,
                PartitionError::Map(MapError::CapacityExceeded { max_capacity: 1024 })
            ));
        }
        other => panic!("unexpected result: {other:?}"),
    }

    // No rollback: each partition stopped at its first failed insert, which
    // was applied anyway.
    assert!(map.len() > 768);
    assert_eq!(map.capacity(), 1024);
}

#[test]
fn persistence_round_trip() -> anyhow::Result<()> {
    init_logger();
    let map = UuidIntMap::new();
    map.insert_all(random_entries(NUM_ENTRIES))?;

    let mut bytes = Vec::new();
    map.write_to(&mut bytes)?;
    assert_eq!(bytes.len(), 4 + NUM_ENTRIES * 20);

    let read = UuidIntMap::read_from(Cursor::new(bytes))?;
    assert_eq!(read.len(), NUM_ENTRIES);
    assert!(read.try_eq(&map)?);
    assert_eq!(read.content_hash()?, map.content_hash()?);

    Ok(())
}
