//! Record array integration tests.
//!
//! End-to-end coverage for the growable record-pointer array on top of
//! the chunked database:
//! - full growth/shrink lifecycle across all three storage shapes
//! - randomized add/remove sequences checked against a model
//! - file-backed persistence round trips
//! - allocator accounting across array teardown

use rand::Rng;
use tempfile::tempdir;

use kite_common::{Addr, DatabaseConfig, KiteError, CHUNK_SIZE};
use kite_storage::{Database, RecordArray};

fn test_db() -> Database {
    Database::in_memory(DatabaseConfig::default())
}

fn value(n: usize) -> Addr {
    Addr(0x200 + n as u64 * 4)
}

#[test]
fn test_lifecycle_through_all_storage_shapes() {
    let db = test_db();
    let array = RecordArray::new(2);
    let addr = db.malloc(array.record_size()).unwrap();
    let max = RecordArray::max_growable_block_size();
    let count = 2 + 2 * max + 1;

    // Grow through inline, single-block, and metablock storage.
    for i in 0..count {
        assert_eq!(array.add(&db, addr, value(i)).unwrap(), i);
    }
    assert_eq!(array.size(&db, addr).unwrap(), count);
    assert_eq!(array.capacity(&db, addr).unwrap(), 2 + 3 * max);
    for i in 0..count {
        assert_eq!(array.get(&db, addr, i).unwrap(), value(i));
    }

    // Drain it again; removal from the front exercises swap-with-last
    // on every call.
    let mut remaining = count;
    while remaining > 0 {
        let moved = array.remove(&db, addr, 0).unwrap();
        remaining -= 1;
        assert_eq!(array.size(&db, addr).unwrap(), remaining);
        if remaining == 0 {
            assert!(moved.is_null());
        } else {
            assert_eq!(array.get(&db, addr, 0).unwrap(), moved);
        }
        assert!(array.size(&db, addr).unwrap() <= array.capacity(&db, addr).unwrap());
    }

    // Everything fits inline again and the blocks are gone.
    assert!(array.is_empty(&db, addr).unwrap());
    assert_eq!(array.capacity(&db, addr).unwrap(), 2);
}

#[test]
fn test_failed_operations_leave_state_unchanged() {
    let db = test_db();
    let array = RecordArray::new(2);
    let addr = db.malloc(array.record_size()).unwrap();
    for i in 0..5 {
        array.add(&db, addr, value(i)).unwrap();
    }
    let allocated = db.allocated_bytes();

    assert!(matches!(
        array.add(&db, addr, Addr::NULL),
        Err(KiteError::NullRecordPointer)
    ));
    assert!(matches!(
        array.remove(&db, addr, 5),
        Err(KiteError::IndexOutOfBounds { .. })
    ));

    assert_eq!(array.size(&db, addr).unwrap(), 5);
    assert_eq!(db.allocated_bytes(), allocated);
    for i in 0..5 {
        assert_eq!(array.get(&db, addr, i).unwrap(), value(i));
    }
}

#[test]
fn test_random_ops_match_vec_model() {
    let db = test_db();
    let array = RecordArray::new(4);
    let addr = db.malloc(array.record_size()).unwrap();

    let mut model: Vec<u64> = Vec::new();
    let mut rng = rand::thread_rng();
    let mut counter = 0u64;

    for step in 0..4000 {
        if model.is_empty() || rng.gen_bool(0.6) {
            counter += 1;
            let v = Addr(counter * 4);
            let index = array.add(&db, addr, v).unwrap();
            assert_eq!(index, model.len());
            model.push(v.0);
        } else {
            let index = rng.gen_range(0..model.len());
            let moved = array.remove(&db, addr, index).unwrap();
            let last = model.pop().unwrap();
            if index == model.len() {
                assert!(moved.is_null());
            } else {
                assert_eq!(moved.0, last);
                model[index] = last;
            }
        }

        assert_eq!(array.size(&db, addr).unwrap(), model.len());
        assert!(array.size(&db, addr).unwrap() <= array.capacity(&db, addr).unwrap());

        if step % 256 == 0 {
            for (i, &expected) in model.iter().enumerate() {
                assert_eq!(array.get(&db, addr, i).unwrap().0, expected);
            }
        }
    }

    for (i, &expected) in model.iter().enumerate() {
        assert_eq!(array.get(&db, addr, i).unwrap().0, expected);
    }
}

#[test]
fn test_two_arrays_share_one_database() {
    let db = test_db();
    let first = RecordArray::new(2);
    let second = RecordArray::new(0);
    let first_addr = db.malloc(first.record_size()).unwrap();
    let second_addr = db.malloc(second.record_size()).unwrap();

    for i in 0..50 {
        first.add(&db, first_addr, value(i)).unwrap();
        second.add(&db, second_addr, value(1000 + i)).unwrap();
    }

    assert_eq!(first.size(&db, first_addr).unwrap(), 50);
    assert_eq!(second.size(&db, second_addr).unwrap(), 50);
    for i in 0..50 {
        assert_eq!(first.get(&db, first_addr, i).unwrap(), value(i));
        assert_eq!(second.get(&db, second_addr, i).unwrap(), value(1000 + i));
    }
}

#[test]
fn test_destruct_returns_all_block_bytes() {
    let db = test_db();
    let array = RecordArray::new(2);
    let max = RecordArray::max_growable_block_size();

    let first = db.malloc(array.record_size()).unwrap();
    let second = db.malloc(array.record_size()).unwrap();
    let headers = db.allocated_bytes();

    for i in 0..(2 + max + 1) {
        array.add(&db, first, value(i)).unwrap();
    }
    for i in 0..64 {
        array.add(&db, second, value(i)).unwrap();
    }
    assert!(db.allocated_bytes() > headers);

    array.destruct(&db, first).unwrap();
    array.destruct(&db, second).unwrap();
    assert_eq!(db.allocated_bytes(), headers);
}

#[test]
fn test_persistence_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("index.kite");
    let array = RecordArray::new(2);

    let addr = {
        let db = Database::open(&path, DatabaseConfig::default()).unwrap();
        let addr = db.malloc(array.record_size()).unwrap();
        for i in 0..300 {
            array.add(&db, addr, value(i)).unwrap();
        }
        db.flush().unwrap();
        addr
    };

    let db = Database::open(&path, DatabaseConfig::default()).unwrap();
    assert_eq!(array.size(&db, addr).unwrap(), 300);
    for i in 0..300 {
        assert_eq!(array.get(&db, addr, i).unwrap(), value(i));
    }

    // The allocator state came back with the data: the array can keep
    // growing and the free lists still hand out blocks.
    for i in 300..400 {
        assert_eq!(array.add(&db, addr, value(i)).unwrap(), i);
    }
    assert_eq!(array.size(&db, addr).unwrap(), 400);
}

#[test]
fn test_persistence_preserves_allocator_accounting() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("index.kite");
    let array = RecordArray::new(2);

    let (addr, allocated) = {
        let db = Database::open(&path, DatabaseConfig::default()).unwrap();
        let addr = db.malloc(array.record_size()).unwrap();
        for i in 0..100 {
            array.add(&db, addr, value(i)).unwrap();
        }
        db.flush().unwrap();
        (addr, db.allocated_bytes())
    };

    let db = Database::open(&path, DatabaseConfig::default()).unwrap();
    assert_eq!(db.allocated_bytes(), allocated);

    array.destruct(&db, addr).unwrap();
    db.free(addr).unwrap();
    assert_eq!(db.allocated_bytes(), 0);
}

#[test]
fn test_open_rejects_wrong_version() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.kite");
    std::fs::write(&path, vec![0xFFu8; CHUNK_SIZE]).unwrap();

    let result = Database::open(&path, DatabaseConfig::default());
    assert!(matches!(result, Err(KiteError::VersionMismatch { .. })));
}

#[test]
fn test_open_rejects_truncated_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("short.kite");
    std::fs::write(&path, vec![0u8; 100]).unwrap();

    let result = Database::open(&path, DatabaseConfig::default());
    assert!(matches!(result, Err(KiteError::Corrupted { .. })));
}
