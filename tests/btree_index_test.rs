use anyhow::Result;
use rand::prelude::*;

use rookdb::common::types::Rid;
use rookdb::index::btree::BPlusTree;

mod common;
use common::create_test_buffer_pool;

fn rid_for(key: i64) -> Rid {
    Rid::new((key / 100) as u32, (key % 100) as u32)
}

#[test]
fn test_empty_tree() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(16, 2)?;
    let tree: BPlusTree<i64> = BPlusTree::new("empty_idx", buffer_pool)?;

    assert!(tree.is_empty());
    assert_eq!(tree.get(&42)?, None);
    assert!(tree.remove(&42).is_ok());
    assert_eq!(tree.iter()?.count(), 0);
    Ok(())
}

#[test]
fn test_insert_and_point_lookup() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(16, 2)?;
    let tree: BPlusTree<i64> = BPlusTree::new("lookup_idx", buffer_pool)?;

    for key in [5i64, 1, 9, 3, 7] {
        assert!(tree.insert(key, rid_for(key))?);
    }

    for key in [1i64, 3, 5, 7, 9] {
        assert_eq!(tree.get(&key)?, Some(rid_for(key)));
    }
    assert_eq!(tree.get(&4)?, None);

    // Duplicate keys are rejected without clobbering the stored value.
    assert!(!tree.insert(5, Rid::new(99, 99))?);
    assert_eq!(tree.get(&5)?, Some(rid_for(5)));
    Ok(())
}

#[test]
fn test_leaf_split_on_third_insert() -> Result<()> {
    // leaf_max = 3: the first two inserts fit, the third splits the root
    // leaf into [10, 20] and [30] with separator 30.
    let (buffer_pool, _temp_file) = create_test_buffer_pool(16, 2)?;
    let tree: BPlusTree<i64> = BPlusTree::with_capacities("split_idx", buffer_pool, 3, 4)?;

    assert!(tree.insert(10, rid_for(10))?);
    assert!(tree.insert(20, rid_for(20))?);
    let root_before = tree.root_page_id();
    assert!(tree.insert(30, rid_for(30))?);
    assert_ne!(tree.root_page_id(), root_before, "split grows a new root");

    let keys: Vec<i64> = tree.iter()?.map(|(k, _)| k).collect();
    assert_eq!(keys, vec![10, 20, 30]);
    for key in [10i64, 20, 30] {
        assert_eq!(tree.get(&key)?, Some(rid_for(key)));
    }
    Ok(())
}

#[test]
fn test_delete_collapses_tree() -> Result<()> {
    // Continuing from the split state: deleting 30 underflows the right
    // leaf, folds it back into its sibling, and lowers the tree.
    let (buffer_pool, _temp_file) = create_test_buffer_pool(16, 2)?;
    let tree: BPlusTree<i64> = BPlusTree::with_capacities("merge_idx", buffer_pool, 3, 4)?;

    for key in [10i64, 20, 30] {
        tree.insert(key, rid_for(key))?;
    }
    assert!(tree.remove(&30)?);

    let keys: Vec<i64> = tree.iter()?.map(|(k, _)| k).collect();
    assert_eq!(keys, vec![10, 20]);
    assert_eq!(tree.get(&30)?, None);
    assert_eq!(tree.get(&10)?, Some(rid_for(10)));
    assert_eq!(tree.get(&20)?, Some(rid_for(20)));

    // Removing a missing key is a negative result, not an error.
    assert!(!tree.remove(&30)?);
    Ok(())
}

#[test]
fn test_iter_from_midpoint() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32, 2)?;
    let tree: BPlusTree<i64> = BPlusTree::with_capacities("range_idx", buffer_pool, 4, 4)?;

    for key in (0..40i64).step_by(2) {
        tree.insert(key, rid_for(key))?;
    }

    // From an existing key.
    let keys: Vec<i64> = tree.iter_from(&10)?.map(|(k, _)| k).collect();
    assert_eq!(keys, (10..40).step_by(2).collect::<Vec<_>>());

    // From a key between entries.
    let keys: Vec<i64> = tree.iter_from(&11)?.map(|(k, _)| k).collect();
    assert_eq!(keys, (12..40).step_by(2).collect::<Vec<_>>());

    // Past the end.
    assert_eq!(tree.iter_from(&100)?.count(), 0);
    Ok(())
}

#[test]
fn test_random_round_trip() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(64, 2)?;
    let tree: BPlusTree<i64> = BPlusTree::with_capacities("round_trip_idx", buffer_pool, 4, 4)?;

    let mut rng = StdRng::seed_from_u64(0xB1_7E);
    let mut keys: Vec<i64> = (0..500).collect();
    keys.shuffle(&mut rng);

    for &key in &keys {
        assert!(tree.insert(key, rid_for(key))?, "insert {}", key);
    }

    // Every key answers its point query.
    for &key in &keys {
        assert_eq!(tree.get(&key)?, Some(rid_for(key)), "get {}", key);
    }

    // In-order iteration yields strictly increasing keys, all of them.
    let scanned: Vec<i64> = tree.iter()?.map(|(k, _)| k).collect();
    assert_eq!(scanned.len(), keys.len());
    assert!(scanned.windows(2).all(|w| w[0] < w[1]));

    // Deleting in a fresh permutation empties the tree.
    keys.shuffle(&mut rng);
    for &key in &keys {
        assert!(tree.remove(&key)?, "remove {}", key);
        assert_eq!(tree.get(&key)?, None);
    }
    assert_eq!(tree.iter()?.count(), 0);
    Ok(())
}

#[test]
fn test_root_persists_in_header_directory() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32, 2)?;

    let tree: BPlusTree<i64> = BPlusTree::with_capacities(
        "persistent_idx",
        buffer_pool.clone(),
        4,
        4,
    )?;
    for key in 0..50i64 {
        tree.insert(key, rid_for(key))?;
    }
    let root = tree.root_page_id();
    drop(tree);

    // Re-opening the same name adopts the registered root.
    let reopened: BPlusTree<i64> =
        BPlusTree::with_capacities("persistent_idx", buffer_pool, 4, 4)?;
    assert_eq!(reopened.root_page_id(), root);
    for key in 0..50i64 {
        assert_eq!(reopened.get(&key)?, Some(rid_for(key)));
    }
    Ok(())
}

#[test]
fn test_two_indexes_share_the_pool() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32, 2)?;

    let ids: BPlusTree<i64> = BPlusTree::with_capacities("orders_pk", buffer_pool.clone(), 4, 4)?;
    let names: BPlusTree<String> =
        BPlusTree::with_capacities("orders_name", buffer_pool, 8, 8)?;

    for key in 0..30i64 {
        ids.insert(key, rid_for(key))?;
        names.insert(format!("order-{:03}", key), rid_for(key))?;
    }

    assert_eq!(ids.get(&17)?, Some(rid_for(17)));
    assert_eq!(names.get(&"order-017".to_string())?, Some(rid_for(17)));
    assert_eq!(names.iter()?.count(), 30);
    Ok(())
}

#[test]
fn test_string_keys() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32, 2)?;
    let tree: BPlusTree<String> = BPlusTree::with_capacities("names_idx", buffer_pool, 4, 4)?;

    let mut words: Vec<String> = (0..100).map(|i| format!("key-{:04}", i * 7 % 100)).collect();
    words.dedup();
    for (i, word) in words.iter().enumerate() {
        tree.insert(word.clone(), Rid::new(0, i as u32))?;
    }

    let scanned: Vec<String> = tree.iter()?.map(|(k, _)| k).collect();
    assert!(scanned.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(scanned.len(), words.len());
    Ok(())
}
