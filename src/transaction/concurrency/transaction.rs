use std::collections::{HashMap, HashSet};
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Rid, TableOid, TxnId};
use super::lock_manager::LockMode;

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Transaction states: the two halves of two-phase locking, plus the
/// terminal outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Typed reasons a lock operation aborts its transaction.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    #[error("lock requested while shrinking")]
    LockOnShrinking,

    #[error("shared lock requested under READ_UNCOMMITTED")]
    LockSharedOnReadUncommitted,

    #[error("intention lock requested on a row")]
    AttemptedIntentionLockOnRow,

    #[error("row lock requested without the table lock")]
    TableLockNotPresent,

    #[error("disallowed lock upgrade")]
    IncompatibleUpgrade,

    #[error("another transaction is already upgrading on this resource")]
    UpgradeConflict,

    #[error("table unlocked before its row locks")]
    TableUnlockedBeforeUnlockingRows,

    #[error("unlock requested but no lock held")]
    AttemptedUnlockButNoLockHeld,
}

/// Errors surfaced by transaction and lock operations.
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("transaction {txn_id} aborted: {reason}")]
    Abort { txn_id: TxnId, reason: AbortReason },

    #[error("transaction {0} is not active")]
    NotActive(TxnId),

    #[error("internal transaction error: {0}")]
    Internal(String),
}

impl TransactionError {
    /// The typed abort reason, when this error carries one.
    pub fn abort_reason(&self) -> Option<AbortReason> {
        match self {
            TransactionError::Abort { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// The granted locks of one transaction, partitioned by mode and by
/// resource class. Guarded by one mutex so lock upgrades swap modes
/// atomically for every observer.
#[derive(Default)]
pub(crate) struct HeldLocks {
    pub shared_tables: HashSet<TableOid>,
    pub exclusive_tables: HashSet<TableOid>,
    pub intention_shared_tables: HashSet<TableOid>,
    pub intention_exclusive_tables: HashSet<TableOid>,
    pub shared_intention_exclusive_tables: HashSet<TableOid>,
    pub shared_rows: HashMap<TableOid, HashSet<Rid>>,
    pub exclusive_rows: HashMap<TableOid, HashSet<Rid>>,
}

impl HeldLocks {
    fn table_set_mut(&mut self, mode: LockMode) -> &mut HashSet<TableOid> {
        match mode {
            LockMode::Shared => &mut self.shared_tables,
            LockMode::Exclusive => &mut self.exclusive_tables,
            LockMode::IntentionShared => &mut self.intention_shared_tables,
            LockMode::IntentionExclusive => &mut self.intention_exclusive_tables,
            LockMode::SharedIntentionExclusive => &mut self.shared_intention_exclusive_tables,
        }
    }

    fn table_mode(&self, oid: TableOid) -> Option<LockMode> {
        if self.shared_tables.contains(&oid) {
            Some(LockMode::Shared)
        } else if self.exclusive_tables.contains(&oid) {
            Some(LockMode::Exclusive)
        } else if self.intention_shared_tables.contains(&oid) {
            Some(LockMode::IntentionShared)
        } else if self.intention_exclusive_tables.contains(&oid) {
            Some(LockMode::IntentionExclusive)
        } else if self.shared_intention_exclusive_tables.contains(&oid) {
            Some(LockMode::SharedIntentionExclusive)
        } else {
            None
        }
    }

    fn row_mode(&self, oid: TableOid, rid: Rid) -> Option<LockMode> {
        if self
            .shared_rows
            .get(&oid)
            .is_some_and(|rows| rows.contains(&rid))
        {
            Some(LockMode::Shared)
        } else if self
            .exclusive_rows
            .get(&oid)
            .is_some_and(|rows| rows.contains(&rid))
        {
            Some(LockMode::Exclusive)
        } else {
            None
        }
    }
}

/// An active database transaction: identity, isolation level, 2PL state,
/// and the partitioned set of granted locks.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,
    locks: Mutex<HeldLocks>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            locks: Mutex::new(HeldLocks::default()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    /// The table lock mode this transaction holds on `oid`, if any.
    pub fn held_table_mode(&self, oid: TableOid) -> Option<LockMode> {
        self.locks.lock().table_mode(oid)
    }

    /// The row lock mode this transaction holds on `(oid, rid)`, if any.
    pub fn held_row_mode(&self, oid: TableOid, rid: Rid) -> Option<LockMode> {
        self.locks.lock().row_mode(oid, rid)
    }

    /// Whether any row locks under `oid` are still held. Tables cannot be
    /// unlocked while this is true.
    pub fn holds_row_locks_on(&self, oid: TableOid) -> bool {
        let locks = self.locks.lock();
        locks.shared_rows.get(&oid).is_some_and(|rows| !rows.is_empty())
            || locks.exclusive_rows.get(&oid).is_some_and(|rows| !rows.is_empty())
    }

    pub(crate) fn add_table_lock(&self, oid: TableOid, mode: LockMode) {
        self.locks.lock().table_set_mut(mode).insert(oid);
    }

    pub(crate) fn remove_table_lock(&self, oid: TableOid, mode: LockMode) {
        self.locks.lock().table_set_mut(mode).remove(&oid);
    }

    /// Atomic mode swap for a granted upgrade: no observer can see the
    /// transaction holding neither mode.
    pub(crate) fn replace_table_lock(&self, oid: TableOid, old: LockMode, new: LockMode) {
        let mut locks = self.locks.lock();
        locks.table_set_mut(old).remove(&oid);
        locks.table_set_mut(new).insert(oid);
    }

    pub(crate) fn add_row_lock(&self, oid: TableOid, rid: Rid, mode: LockMode) {
        let mut locks = self.locks.lock();
        let rows = match mode {
            LockMode::Shared => &mut locks.shared_rows,
            LockMode::Exclusive => &mut locks.exclusive_rows,
            _ => unreachable!("row locks are S or X"),
        };
        rows.entry(oid).or_default().insert(rid);
    }

    pub(crate) fn remove_row_lock(&self, oid: TableOid, rid: Rid, mode: LockMode) {
        let mut locks = self.locks.lock();
        let rows = match mode {
            LockMode::Shared => &mut locks.shared_rows,
            LockMode::Exclusive => &mut locks.exclusive_rows,
            _ => unreachable!("row locks are S or X"),
        };
        if let Some(set) = rows.get_mut(&oid) {
            set.remove(&rid);
        }
    }

    pub(crate) fn replace_row_lock(&self, oid: TableOid, rid: Rid, new: LockMode) {
        let mut locks = self.locks.lock();
        match new {
            LockMode::Exclusive => {
                if let Some(set) = locks.shared_rows.get_mut(&oid) {
                    set.remove(&rid);
                }
                locks.exclusive_rows.entry(oid).or_default().insert(rid);
            }
            LockMode::Shared => {
                if let Some(set) = locks.exclusive_rows.get_mut(&oid) {
                    set.remove(&rid);
                }
                locks.shared_rows.entry(oid).or_default().insert(rid);
            }
            _ => unreachable!("row locks are S or X"),
        }
    }

    /// Every held row lock, for release on commit/abort.
    pub(crate) fn snapshot_row_locks(&self) -> Vec<(TableOid, Rid, LockMode)> {
        let locks = self.locks.lock();
        let mut all = Vec::new();
        for (&oid, rows) in &locks.shared_rows {
            all.extend(rows.iter().map(|&rid| (oid, rid, LockMode::Shared)));
        }
        for (&oid, rows) in &locks.exclusive_rows {
            all.extend(rows.iter().map(|&rid| (oid, rid, LockMode::Exclusive)));
        }
        all
    }

    /// Every held table lock, for release on commit/abort.
    pub(crate) fn snapshot_table_locks(&self) -> Vec<(TableOid, LockMode)> {
        let locks = self.locks.lock();
        let mut all = Vec::new();
        for (set, mode) in [
            (&locks.shared_tables, LockMode::Shared),
            (&locks.exclusive_tables, LockMode::Exclusive),
            (&locks.intention_shared_tables, LockMode::IntentionShared),
            (&locks.intention_exclusive_tables, LockMode::IntentionExclusive),
            (
                &locks.shared_intention_exclusive_tables,
                LockMode::SharedIntentionExclusive,
            ),
        ] {
            all.extend(set.iter().map(|&oid| (oid, mode)));
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_starts_growing() {
        let txn = Transaction::new(1, IsolationLevel::RepeatableRead);
        assert_eq!(txn.id(), 1);
        assert_eq!(txn.state(), TransactionState::Growing);
        assert_eq!(txn.isolation_level(), IsolationLevel::RepeatableRead);
        assert_eq!(txn.held_table_mode(1), None);
    }

    #[test]
    fn test_table_lock_bookkeeping() {
        let txn = Transaction::new(2, IsolationLevel::ReadCommitted);

        txn.add_table_lock(7, LockMode::IntentionShared);
        assert_eq!(txn.held_table_mode(7), Some(LockMode::IntentionShared));

        txn.replace_table_lock(7, LockMode::IntentionShared, LockMode::Exclusive);
        assert_eq!(txn.held_table_mode(7), Some(LockMode::Exclusive));

        txn.remove_table_lock(7, LockMode::Exclusive);
        assert_eq!(txn.held_table_mode(7), None);
    }

    #[test]
    fn test_row_lock_bookkeeping() {
        let txn = Transaction::new(3, IsolationLevel::RepeatableRead);
        let rid = Rid::new(4, 2);

        txn.add_row_lock(7, rid, LockMode::Shared);
        assert_eq!(txn.held_row_mode(7, rid), Some(LockMode::Shared));
        assert!(txn.holds_row_locks_on(7));
        assert!(!txn.holds_row_locks_on(8));

        txn.replace_row_lock(7, rid, LockMode::Exclusive);
        assert_eq!(txn.held_row_mode(7, rid), Some(LockMode::Exclusive));

        txn.remove_row_lock(7, rid, LockMode::Exclusive);
        assert_eq!(txn.held_row_mode(7, rid), None);
        assert!(!txn.holds_row_locks_on(7));
    }

    #[test]
    fn test_snapshots_cover_all_modes() {
        let txn = Transaction::new(4, IsolationLevel::RepeatableRead);
        txn.add_table_lock(1, LockMode::IntentionExclusive);
        txn.add_table_lock(2, LockMode::SharedIntentionExclusive);
        txn.add_row_lock(1, Rid::new(1, 1), LockMode::Exclusive);
        txn.add_row_lock(1, Rid::new(1, 2), LockMode::Shared);

        assert_eq!(txn.snapshot_table_locks().len(), 2);
        assert_eq!(txn.snapshot_row_locks().len(), 2);
    }
}
