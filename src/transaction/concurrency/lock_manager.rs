use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TableOid, TxnId, INVALID_TXN_ID};
use super::transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionError, TransactionState,
};

/// Hierarchical lock modes. Tables take all five; rows take only `Shared`
/// and `Exclusive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

impl LockMode {
    pub fn is_intention(self) -> bool {
        matches!(
            self,
            LockMode::IntentionShared
                | LockMode::IntentionExclusive
                | LockMode::SharedIntentionExclusive
        )
    }

    /// The compatibility matrix: whether `requested` can be granted while
    /// `held` is granted.
    pub fn compatible(held: LockMode, requested: LockMode) -> bool {
        use LockMode::*;
        match (held, requested) {
            (IntentionShared, Exclusive) | (Exclusive, IntentionShared) => false,
            (IntentionShared, _) | (_, IntentionShared) => true,
            (IntentionExclusive, IntentionExclusive) => true,
            (Shared, Shared) => true,
            _ => false,
        }
    }

    /// The upgrade lattice: IS -> {S, X, IX, SIX}, S -> {X, SIX},
    /// IX -> {X, SIX}, SIX -> {X}. X is terminal.
    pub fn upgrade_allowed(held: LockMode, requested: LockMode) -> bool {
        use LockMode::*;
        match held {
            IntentionShared => matches!(
                requested,
                Shared | Exclusive | IntentionExclusive | SharedIntentionExclusive
            ),
            Shared | IntentionExclusive => {
                matches!(requested, Exclusive | SharedIntentionExclusive)
            }
            SharedIntentionExclusive => requested == Exclusive,
            Exclusive => false,
        }
    }
}

/// Whether a lock request targets a table or a row; the isolation checks
/// and the hierarchy rules differ between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ResourceType {
    Table,
    Row,
}

/// The resource a grant applies to, for held-set bookkeeping.
#[derive(Debug, Clone, Copy)]
enum LockTarget {
    Table(TableOid),
    Row(TableOid, Rid),
}

/// One transaction's position in a request queue. Requests are owned by
/// their queue and destroyed exactly once, on removal.
struct LockRequest {
    txn: Arc<Transaction>,
    mode: LockMode,
    granted: bool,
}

impl LockRequest {
    fn new(txn: Arc<Transaction>, mode: LockMode) -> Self {
        Self {
            txn,
            mode,
            granted: false,
        }
    }

    fn txn_id(&self) -> TxnId {
        self.txn.id()
    }
}

/// FIFO request queue for one resource, with the single upgrade slot.
pub(super) struct RequestQueueState {
    queue: VecDeque<LockRequest>,
    /// The one transaction currently promoting its lock here, if any.
    upgrading: TxnId,
}

impl RequestQueueState {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            upgrading: INVALID_TXN_ID,
        }
    }
}

pub(super) struct LockRequestQueue {
    pub(super) state: Mutex<RequestQueueState>,
    pub(super) cv: Condvar,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(RequestQueueState::new()),
            cv: Condvar::new(),
        }
    }
}

/// Configuration for the lock manager's deadlock detector.
pub struct LockManagerConfig {
    pub detection_interval: Duration,
    pub enable_detection: bool,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            detection_interval: Duration::from_millis(50),
            enable_detection: true,
        }
    }
}

/// Two-phase lock manager with hierarchical table/row locking, FIFO grant
/// order with upgrade priority, and a background waits-for deadlock
/// detector.
///
/// Lock ordering inside the manager: resource-map mutex, then queue mutex,
/// then the waits-for mutex. The reverse order never occurs.
pub struct LockManager {
    pub(super) table_lock_map: Mutex<HashMap<TableOid, Arc<LockRequestQueue>>>,
    pub(super) row_lock_map: Mutex<HashMap<Rid, Arc<LockRequestQueue>>>,
    /// Waits-for edges from the most recent detection pass.
    pub(super) waits_for: Mutex<BTreeMap<TxnId, BTreeSet<TxnId>>>,
    shutdown: Arc<(Mutex<bool>, Condvar)>,
    detector: Mutex<Option<JoinHandle<()>>>,
}

impl LockManager {
    pub fn new(config: LockManagerConfig) -> Arc<Self> {
        let manager = Arc::new(Self {
            table_lock_map: Mutex::new(HashMap::new()),
            row_lock_map: Mutex::new(HashMap::new()),
            waits_for: Mutex::new(BTreeMap::new()),
            shutdown: Arc::new((Mutex::new(false), Condvar::new())),
            detector: Mutex::new(None),
        });

        if config.enable_detection {
            let handle = Self::spawn_detector(&manager, config.detection_interval);
            *manager.detector.lock() = Some(handle);
        }

        manager
    }

    // ------------------------------------------------------------------
    // Table locks
    // ------------------------------------------------------------------

    /// Acquire (or upgrade to) `mode` on table `oid`. Blocks until granted.
    /// Returns `Ok(false)` when the wait is cancelled by a deadlock abort;
    /// protocol violations abort the transaction and return the typed
    /// reason.
    pub fn lock_table(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<bool, TransactionError> {
        self.check_mode_legal(txn, mode, ResourceType::Table)?;

        let old_mode = match self.check_table_upgrade(txn, mode, oid)? {
            UpgradeDecision::AlreadyHeld => return Ok(true),
            UpgradeDecision::Fresh => None,
            UpgradeDecision::Upgrade(old) => Some(old),
        };

        let queue = self.table_queue(oid);
        self.wait_for_grant(txn, mode, old_mode, LockTarget::Table(oid), &queue)
    }

    /// Release the table lock held on `oid`, transitioning two-phase state.
    pub fn unlock_table(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
    ) -> Result<bool, TransactionError> {
        let held = match txn.held_table_mode(oid) {
            Some(mode) => mode,
            None => return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld)),
        };

        if txn.holds_row_locks_on(oid) {
            return Err(self.abort(txn, AbortReason::TableUnlockedBeforeUnlockingRows));
        }

        let queue = self.table_queue(oid);
        {
            let mut state = queue.state.lock();
            if !remove_granted_request(&mut state, txn.id()) {
                return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
            }
            txn.remove_table_lock(oid, held);
            queue.cv.notify_all();
        }

        self.apply_shrink_transition(txn, held);
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Row locks
    // ------------------------------------------------------------------

    /// Acquire (or upgrade to) `mode` on row `rid` of table `oid`. Row
    /// locks are `Shared`/`Exclusive` only and require an appropriate lock
    /// on the enclosing table.
    pub fn lock_row(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
        rid: Rid,
    ) -> Result<bool, TransactionError> {
        self.check_mode_legal(txn, mode, ResourceType::Row)?;
        self.check_table_lock_present(txn, mode, oid)?;

        let old_mode = match self.check_row_upgrade(txn, mode, oid, rid)? {
            UpgradeDecision::AlreadyHeld => return Ok(true),
            UpgradeDecision::Fresh => None,
            UpgradeDecision::Upgrade(old) => Some(old),
        };

        let queue = self.row_queue(rid);
        self.wait_for_grant(txn, mode, old_mode, LockTarget::Row(oid, rid), &queue)
    }

    /// Release the row lock held on `(oid, rid)`.
    pub fn unlock_row(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
        rid: Rid,
    ) -> Result<bool, TransactionError> {
        let held = match txn.held_row_mode(oid, rid) {
            Some(mode) => mode,
            None => return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld)),
        };

        let queue = self.row_queue(rid);
        {
            let mut state = queue.state.lock();
            if !remove_granted_request(&mut state, txn.id()) {
                return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
            }
            txn.remove_row_lock(oid, rid, held);
            queue.cv.notify_all();
        }

        self.apply_shrink_transition(txn, held);
        Ok(true)
    }

    /// Drop every lock the transaction still holds, rows before tables.
    /// Used by commit and abort; performs no state transitions and cannot
    /// fail.
    pub fn release_all_locks(&self, txn: &Arc<Transaction>) {
        for (oid, rid, mode) in txn.snapshot_row_locks() {
            let queue = self.row_queue(rid);
            let mut state = queue.state.lock();
            remove_granted_request(&mut state, txn.id());
            txn.remove_row_lock(oid, rid, mode);
            queue.cv.notify_all();
        }

        for (oid, mode) in txn.snapshot_table_locks() {
            let queue = self.table_queue(oid);
            let mut state = queue.state.lock();
            remove_granted_request(&mut state, txn.id());
            txn.remove_table_lock(oid, mode);
            queue.cv.notify_all();
        }
    }

    // ------------------------------------------------------------------
    // Grant machinery
    // ------------------------------------------------------------------

    /// Enqueue the request (front for upgrades, back otherwise) and block
    /// on the queue's condvar until this transaction is granted or its
    /// wait is cancelled by a deadlock abort.
    fn wait_for_grant(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        old_mode: Option<LockMode>,
        target: LockTarget,
        queue: &Arc<LockRequestQueue>,
    ) -> Result<bool, TransactionError> {
        let mut state = queue.state.lock();

        if old_mode.is_some() {
            if state.upgrading != INVALID_TXN_ID {
                drop(state);
                return Err(self.abort(txn, AbortReason::UpgradeConflict));
            }
            state.upgrading = txn.id();
            state.queue.push_front(LockRequest::new(Arc::clone(txn), mode));
        } else {
            state.queue.push_back(LockRequest::new(Arc::clone(txn), mode));
        }

        loop {
            if Self::try_grant(&mut state, txn, mode, old_mode, target) {
                queue.cv.notify_all();
                return Ok(true);
            }

            queue.cv.wait(&mut state);

            // A detector abort cancels the wait; the victim removes its
            // own pending request and hands the abort to its caller.
            if txn.state() == TransactionState::Aborted {
                if let Some(pos) = state
                    .queue
                    .iter()
                    .position(|r| r.txn_id() == txn.id() && !r.granted)
                {
                    state.queue.remove(pos);
                }
                if state.upgrading == txn.id() {
                    state.upgrading = INVALID_TXN_ID;
                }
                queue.cv.notify_all();
                return Ok(false);
            }
        }
    }

    /// One front-to-back pass of the grant algorithm. Earlier compatible
    /// waiters are granted tentatively (broadcast wakes let them finish on
    /// their own); the caller's request is granted for real, completing an
    /// upgrade atomically under the queue mutex.
    fn try_grant(
        state: &mut RequestQueueState,
        txn: &Arc<Transaction>,
        mode: LockMode,
        old_mode: Option<LockMode>,
        target: LockTarget,
    ) -> bool {
        // Modes held right now, minus the upgrading transaction's prior
        // grant: an upgrade must not conflict with itself.
        let upgrading = state.upgrading;
        let mut granted_modes: Vec<LockMode> = state
            .queue
            .iter()
            .filter(|r| r.granted && r.txn_id() != upgrading)
            .map(|r| r.mode)
            .collect();

        for index in 0..state.queue.len() {
            if state.queue[index].granted {
                continue;
            }
            let req_mode = state.queue[index].mode;
            let req_txn = state.queue[index].txn_id();

            let fits = granted_modes
                .iter()
                .all(|&held| LockMode::compatible(held, req_mode));
            if !fits {
                // FIFO: nothing behind an incompatible waiter is granted.
                return false;
            }

            if req_txn != txn.id() {
                granted_modes.push(req_mode);
                continue;
            }

            state.queue[index].granted = true;

            match (old_mode, target) {
                (None, LockTarget::Table(oid)) => txn.add_table_lock(oid, mode),
                (None, LockTarget::Row(oid, rid)) => txn.add_row_lock(oid, rid, mode),
                (Some(_), LockTarget::Table(oid)) => {
                    // The old grant leaves the queue and the held set in
                    // the same step the new one lands.
                    remove_granted_request_except(state, txn.id(), index);
                    txn.replace_table_lock(oid, old_mode.unwrap(), mode);
                    state.upgrading = INVALID_TXN_ID;
                }
                (Some(_), LockTarget::Row(oid, rid)) => {
                    remove_granted_request_except(state, txn.id(), index);
                    txn.replace_row_lock(oid, rid, mode);
                    state.upgrading = INVALID_TXN_ID;
                }
            }
            return true;
        }

        false
    }

    // ------------------------------------------------------------------
    // Legality checks
    // ------------------------------------------------------------------

    /// Mark the transaction aborted and produce the typed error.
    fn abort(&self, txn: &Arc<Transaction>, reason: AbortReason) -> TransactionError {
        txn.set_state(TransactionState::Aborted);
        TransactionError::Abort {
            txn_id: txn.id(),
            reason,
        }
    }

    /// REPEATABLE_READ: all modes while growing, none while shrinking.
    /// READ_COMMITTED: all modes while growing, only IS/S while shrinking.
    /// READ_UNCOMMITTED: only IX/X, and only while growing. Rows take only
    /// S/X regardless of the level.
    fn check_mode_legal(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        resource: ResourceType,
    ) -> Result<(), TransactionError> {
        if resource == ResourceType::Row && mode.is_intention() {
            return Err(self.abort(txn, AbortReason::AttemptedIntentionLockOnRow));
        }

        let state = txn.state();
        match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                if state == TransactionState::Shrinking {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadCommitted => {
                if state == TransactionState::Shrinking
                    && !matches!(mode, LockMode::IntentionShared | LockMode::Shared)
                {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadUncommitted => {
                if state == TransactionState::Growing {
                    if !matches!(mode, LockMode::Exclusive | LockMode::IntentionExclusive) {
                        return Err(self.abort(txn, AbortReason::LockSharedOnReadUncommitted));
                    }
                } else {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
        }

        Ok(())
    }

    /// A row S lock needs any table lock on the enclosing table; a row X
    /// lock needs IX, X, or SIX.
    fn check_table_lock_present(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<(), TransactionError> {
        let table_mode = txn.held_table_mode(oid);
        let satisfied = match mode {
            LockMode::Shared => table_mode.is_some(),
            LockMode::Exclusive => matches!(
                table_mode,
                Some(LockMode::IntentionExclusive)
                    | Some(LockMode::Exclusive)
                    | Some(LockMode::SharedIntentionExclusive)
            ),
            _ => unreachable!("intention modes rejected earlier"),
        };

        if satisfied {
            Ok(())
        } else {
            Err(self.abort(txn, AbortReason::TableLockNotPresent))
        }
    }

    fn check_table_upgrade(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<UpgradeDecision, TransactionError> {
        match txn.held_table_mode(oid) {
            None => Ok(UpgradeDecision::Fresh),
            Some(held) if held == mode => Ok(UpgradeDecision::AlreadyHeld),
            Some(held) if LockMode::upgrade_allowed(held, mode) => {
                Ok(UpgradeDecision::Upgrade(held))
            }
            Some(_) => Err(self.abort(txn, AbortReason::IncompatibleUpgrade)),
        }
    }

    fn check_row_upgrade(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
        rid: Rid,
    ) -> Result<UpgradeDecision, TransactionError> {
        match txn.held_row_mode(oid, rid) {
            None => Ok(UpgradeDecision::Fresh),
            Some(held) if held == mode => Ok(UpgradeDecision::AlreadyHeld),
            Some(LockMode::Shared) if mode == LockMode::Exclusive => {
                Ok(UpgradeDecision::Upgrade(LockMode::Shared))
            }
            Some(_) => Err(self.abort(txn, AbortReason::IncompatibleUpgrade)),
        }
    }

    /// First unlock of S or X under REPEATABLE_READ, or of X under the
    /// other levels, moves a growing transaction to shrinking.
    fn apply_shrink_transition(&self, txn: &Arc<Transaction>, released: LockMode) {
        if txn.state() != TransactionState::Growing {
            return;
        }
        let shrink = match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                matches!(released, LockMode::Shared | LockMode::Exclusive)
            }
            IsolationLevel::ReadCommitted | IsolationLevel::ReadUncommitted => {
                released == LockMode::Exclusive
            }
        };
        if shrink {
            txn.set_state(TransactionState::Shrinking);
        }
    }

    // ------------------------------------------------------------------
    // Queue plumbing
    // ------------------------------------------------------------------

    pub(super) fn table_queue(&self, oid: TableOid) -> Arc<LockRequestQueue> {
        let mut map = self.table_lock_map.lock();
        Arc::clone(
            map.entry(oid)
                .or_insert_with(|| Arc::new(LockRequestQueue::new())),
        )
    }

    pub(super) fn row_queue(&self, rid: Rid) -> Arc<LockRequestQueue> {
        let mut map = self.row_lock_map.lock();
        Arc::clone(
            map.entry(rid)
                .or_insert_with(|| Arc::new(LockRequestQueue::new())),
        )
    }

    /// Every queue in the manager, for detector scans and broadcast wakes.
    pub(super) fn all_queues(&self) -> Vec<Arc<LockRequestQueue>> {
        let mut queues: Vec<Arc<LockRequestQueue>> =
            self.table_lock_map.lock().values().cloned().collect();
        queues.extend(self.row_lock_map.lock().values().cloned());
        queues
    }

    /// Granted and waiting transactions of one queue, for the waits-for
    /// graph. Waiters already aborted are skipped; they will clean up on
    /// their next wake.
    pub(super) fn queue_participants(
        queue: &LockRequestQueue,
    ) -> (Vec<Arc<Transaction>>, Vec<Arc<Transaction>>) {
        let state = queue.state.lock();
        let mut granted = Vec::new();
        let mut waiting = Vec::new();
        for request in &state.queue {
            if request.granted {
                granted.push(Arc::clone(&request.txn));
            } else if request.txn.state() != TransactionState::Aborted {
                waiting.push(Arc::clone(&request.txn));
            }
        }
        (granted, waiting)
    }

    fn spawn_detector(manager: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(manager);
        let shutdown = Arc::clone(&manager.shutdown);

        std::thread::spawn(move || {
            let (stop_lock, stop_cv) = &*shutdown;
            loop {
                {
                    let mut stopped = stop_lock.lock();
                    if *stopped {
                        break;
                    }
                    stop_cv.wait_for(&mut stopped, interval);
                    if *stopped {
                        break;
                    }
                }
                match weak.upgrade() {
                    Some(manager) => manager.run_detection_pass(),
                    None => break,
                }
            }
        })
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        {
            let (stop_lock, stop_cv) = &*self.shutdown;
            *stop_lock.lock() = true;
            stop_cv.notify_all();
        }
        if let Some(handle) = self.detector.lock().take() {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

enum UpgradeDecision {
    AlreadyHeld,
    Fresh,
    Upgrade(LockMode),
}

/// Remove the granted request of `txn_id`, if present. Returns whether a
/// request was removed.
fn remove_granted_request(state: &mut RequestQueueState, txn_id: TxnId) -> bool {
    if let Some(pos) = state
        .queue
        .iter()
        .position(|r| r.txn_id() == txn_id && r.granted)
    {
        state.queue.remove(pos);
        return true;
    }
    false
}

/// Remove the granted request of `txn_id` other than the one at `keep`:
/// the upgrade's old grant, while the new grant stays.
fn remove_granted_request_except(state: &mut RequestQueueState, txn_id: TxnId, keep: usize) {
    if let Some(pos) = state
        .queue
        .iter()
        .enumerate()
        .position(|(i, r)| i != keep && r.txn_id() == txn_id && r.granted)
    {
        state.queue.remove(pos);
    }
}
