pub mod error;
pub mod node;
pub mod serialization;
pub mod index;

pub use error::BTreeError;
pub use node::{BTreeNode, InternalNode, LeafNode};
pub use serialization::{decode_node, encode_node, leaf_capacity, internal_capacity};
pub use index::BPlusTree;
