// Transaction management: two-phase locking with hierarchical lock modes
// and waits-for deadlock detection.

pub mod concurrency;

// Public exports
pub use concurrency::{IsolationLevel, Transaction, TransactionState};
pub use concurrency::{AbortReason, TransactionError};
pub use concurrency::{LockManager, LockManagerConfig, LockMode};
pub use concurrency::TransactionManager;
