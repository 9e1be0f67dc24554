pub mod error;
pub mod manager;
pub mod page_table;
pub mod replacer;

pub use error::BufferPoolError;
pub use manager::{BufferPoolManager, PinnedPage};
pub use page_table::ExtendibleHashTable;
pub use replacer::LruKReplacer;
