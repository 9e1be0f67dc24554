use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use parking_lot::Mutex;

use crate::common::types::TxnId;
use super::lock_manager::LockManager;
use super::transaction::{IsolationLevel, Transaction, TransactionError, TransactionState};

/// Transaction manager: creates and tracks transactions, and drives the
/// lock-release side of commit and abort.
pub struct TransactionManager {
    /// Next transaction ID to assign
    next_txn_id: AtomicU32,

    /// Lock manager this instance's transactions acquire through
    lock_manager: Arc<LockManager>,

    /// Active transactions map (txn_id -> transaction)
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            lock_manager,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Begin a new transaction in the growing phase.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));

        self.active_transactions
            .lock()
            .insert(txn_id, Arc::clone(&txn));

        txn
    }

    /// Commit: release every held lock (rows before tables), then mark the
    /// transaction committed.
    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        match txn.state() {
            TransactionState::Growing | TransactionState::Shrinking => {}
            _ => return Err(TransactionError::NotActive(txn.id())),
        }

        self.lock_manager.release_all_locks(txn);
        txn.set_state(TransactionState::Committed);
        self.active_transactions.lock().remove(&txn.id());

        Ok(())
    }

    /// Abort: release every held lock (rows before tables) and mark the
    /// transaction aborted. Also the cleanup path for deadlock victims,
    /// which arrive here already in the aborted state.
    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        if txn.state() == TransactionState::Committed {
            return Err(TransactionError::NotActive(txn.id()));
        }

        self.lock_manager.release_all_locks(txn);
        txn.set_state(TransactionState::Aborted);
        self.active_transactions.lock().remove(&txn.id());

        Ok(())
    }

    /// Get a transaction by ID
    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    pub fn transaction_exists(&self, txn_id: TxnId) -> bool {
        self.active_transactions.lock().contains_key(&txn_id)
    }

    /// Get all active transaction IDs
    pub fn active_transaction_ids(&self) -> Vec<TxnId> {
        self.active_transactions.lock().keys().copied().collect()
    }
}
