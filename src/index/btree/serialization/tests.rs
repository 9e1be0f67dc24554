use crate::common::types::{Page, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, InternalNode, LeafNode};
use super::{decode_node, encode_node, internal_capacity, leaf_capacity};

#[test]
fn test_leaf_round_trip() {
    let mut leaf: LeafNode<i64> = LeafNode::new(7, 3, 64);
    leaf.next_page_id = 9;
    for k in [5i64, 10, 15, 20] {
        assert!(leaf.insert(k, Rid::new(1, k as u32)));
    }

    let mut page = Page::new(7);
    encode_node(&BTreeNode::Leaf(leaf), &mut page).unwrap();

    let decoded = decode_node::<i64>(&page).unwrap();
    let leaf = decoded.as_leaf();
    assert_eq!(leaf.page_id, 7);
    assert_eq!(leaf.parent_page_id, 3);
    assert_eq!(leaf.next_page_id, 9);
    assert_eq!(leaf.max_size, 64);
    assert_eq!(leaf.size(), 4);
    assert_eq!(leaf.search(&15), Some(Rid::new(1, 15)));
}

#[test]
fn test_internal_round_trip_slot_zero_key_undefined() {
    let mut internal: InternalNode<i64> = InternalNode::new(4, INVALID_PAGE_ID, 32);
    internal.init_root(100, 10, 101);
    internal.insert_child(20, 102);

    let mut page = Page::new(4);
    encode_node(&BTreeNode::Internal(internal), &mut page).unwrap();

    let decoded = decode_node::<i64>(&page).unwrap();
    let internal = decoded.as_internal();
    assert_eq!(internal.page_id, 4);
    assert_eq!(internal.parent_page_id, INVALID_PAGE_ID);
    assert_eq!(internal.children, vec![100, 101, 102]);
    assert_eq!(internal.keys, vec![10, 20]);
}

#[test]
fn test_string_keys_round_trip() {
    let mut leaf: LeafNode<String> = LeafNode::new(2, INVALID_PAGE_ID, 16);
    for name in ["ada", "grace", "edsger"] {
        assert!(leaf.insert(name.to_string(), Rid::new(0, name.len() as u32)));
    }

    let mut page = Page::new(2);
    encode_node(&BTreeNode::Leaf(leaf), &mut page).unwrap();

    let decoded = decode_node::<String>(&page).unwrap();
    let leaf = decoded.as_leaf();
    let keys: Vec<&str> = leaf.entries.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, vec!["ada", "edsger", "grace"]);
}

#[test]
fn test_uninitialized_page_rejected() {
    let page = Page::new(1);
    match decode_node::<i64>(&page) {
        Err(BTreeError::InvalidPageFormat) => {}
        other => panic!("expected InvalidPageFormat, got {:?}", other.err()),
    }
}

#[test]
fn test_oversized_node_rejected() {
    let mut leaf: LeafNode<String> = LeafNode::new(1, INVALID_PAGE_ID, 4096);
    let big = "x".repeat(2048);
    for i in 0..4 {
        leaf.insert(format!("{}{}", big, i), Rid::new(0, i));
    }

    let mut page = Page::new(1);
    match encode_node(&BTreeNode::Leaf(leaf), &mut page) {
        Err(BTreeError::NodeTooLarge) => {}
        other => panic!("expected NodeTooLarge, got {:?}", other.err()),
    }
}

#[test]
fn test_capacities_scale_with_key_size() {
    assert!(leaf_capacity::<i32>() >= leaf_capacity::<[u8; 64]>());
    assert!(internal_capacity::<i32>() >= internal_capacity::<[u8; 64]>());
    assert!(leaf_capacity::<[u8; 1024]>() >= 3);
}
