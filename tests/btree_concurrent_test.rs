use std::sync::Arc;
use std::thread;
use anyhow::Result;
use rand::prelude::*;

use rookdb::common::types::Rid;
use rookdb::index::btree::BPlusTree;

mod common;
use common::create_test_buffer_pool;

fn rid_for(key: i64) -> Rid {
    Rid::new((key >> 8) as u32, (key & 0xFF) as u32)
}

#[test]
fn test_concurrent_disjoint_inserts() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(128, 2)?;
    let tree: Arc<BPlusTree<i64>> = Arc::new(BPlusTree::with_capacities(
        "concurrent_insert_idx",
        buffer_pool,
        4,
        4,
    )?);

    const THREADS: i64 = 4;
    const PER_THREAD: i64 = 200;

    let mut handles = Vec::new();
    for t in 0..THREADS {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            let mut keys: Vec<i64> = (0..PER_THREAD).map(|i| i * THREADS + t).collect();
            keys.shuffle(&mut StdRng::seed_from_u64(t as u64));
            for key in keys {
                assert!(tree.insert(key, rid_for(key)).unwrap());
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // Every key is present and iteration is sorted and complete.
    for key in 0..THREADS * PER_THREAD {
        assert_eq!(tree.get(&key)?, Some(rid_for(key)), "missing {}", key);
    }
    let scanned: Vec<i64> = tree.iter()?.map(|(k, _)| k).collect();
    assert_eq!(scanned.len(), (THREADS * PER_THREAD) as usize);
    assert!(scanned.windows(2).all(|w| w[0] < w[1]));
    Ok(())
}

#[test]
fn test_concurrent_readers_during_inserts() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(128, 2)?;
    let tree: Arc<BPlusTree<i64>> = Arc::new(BPlusTree::with_capacities(
        "concurrent_read_idx",
        buffer_pool,
        4,
        4,
    )?);

    // A stable prefix that readers can always expect to find.
    for key in 0..100i64 {
        tree.insert(key, rid_for(key))?;
    }

    let writer = {
        let tree = Arc::clone(&tree);
        thread::spawn(move || {
            for key in 100..400i64 {
                tree.insert(key, rid_for(key)).unwrap();
            }
        })
    };

    let mut readers = Vec::new();
    for t in 0..3u64 {
        let tree = Arc::clone(&tree);
        readers.push(thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(t);
            for _ in 0..300 {
                let key = rng.gen_range(0..100);
                assert_eq!(tree.get(&key).unwrap(), Some(rid_for(key)));
            }
        }));
    }

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    for key in 0..400i64 {
        assert_eq!(tree.get(&key)?, Some(rid_for(key)));
    }
    Ok(())
}

#[test]
fn test_concurrent_inserts_and_deletes() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(128, 2)?;
    let tree: Arc<BPlusTree<i64>> = Arc::new(BPlusTree::with_capacities(
        "concurrent_mixed_idx",
        buffer_pool,
        4,
        4,
    )?);

    // Even keys are permanent; odd keys get deleted by their own writer.
    for key in (0..600i64).step_by(2) {
        tree.insert(key, rid_for(key))?;
    }

    let mut handles = Vec::new();
    for t in 0..3i64 {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            for i in 0..100i64 {
                let key = (i * 3 + t) * 2 + 1;
                assert!(tree.insert(key, rid_for(key)).unwrap());
                assert!(tree.remove(&key).unwrap());
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for key in (0..600i64).step_by(2) {
        assert_eq!(tree.get(&key)?, Some(rid_for(key)), "even key {}", key);
    }
    let scanned: Vec<i64> = tree.iter()?.map(|(k, _)| k).collect();
    assert_eq!(scanned.len(), 300);
    assert!(scanned.iter().all(|k| k % 2 == 0));
    Ok(())
}
