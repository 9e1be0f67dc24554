use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::common::types::TxnId;
use super::lock_manager::LockManager;
use super::transaction::{Transaction, TransactionState};

impl LockManager {
    /// One full detection pass: rebuild the waits-for graph from the live
    /// queues, abort the youngest transaction on each cycle, and broadcast
    /// so victims clean up their pending requests. Loops until the graph
    /// is acyclic. The background detector calls this on every interval;
    /// tests may call it directly.
    pub fn run_detection_pass(&self) {
        loop {
            let (edges, txns) = self.build_waits_for();
            {
                let mut waits_for = self.waits_for.lock();
                *waits_for = edges.clone();
            }

            let victim = match find_cycle_victim(&edges) {
                Some(victim) => victim,
                None => break,
            };

            log::warn!("deadlock detected, aborting victim transaction {}", victim);
            if let Some(txn) = txns.get(&victim) {
                txn.set_state(TransactionState::Aborted);
            }

            // The victim's edges die with its requests; waking every queue
            // lets the victim remove its pending request and lets blocked
            // transactions re-evaluate.
            self.notify_all_queues();
        }
    }

    /// Edges `t1 -> t2` where `t1` waits (ungranted) on a resource where
    /// `t2` holds a grant. Aborted waiters contribute no edges; their
    /// cleanup is already underway.
    fn build_waits_for(
        &self,
    ) -> (
        BTreeMap<TxnId, BTreeSet<TxnId>>,
        HashMap<TxnId, Arc<Transaction>>,
    ) {
        let mut edges: BTreeMap<TxnId, BTreeSet<TxnId>> = BTreeMap::new();
        let mut txns: HashMap<TxnId, Arc<Transaction>> = HashMap::new();

        for queue in self.all_queues() {
            let (granted, waiting) = Self::queue_participants(&queue);
            for txn in granted.iter().chain(waiting.iter()) {
                txns.entry(txn.id()).or_insert_with(|| Arc::clone(txn));
            }
            for waiter in &waiting {
                for granter in &granted {
                    if waiter.id() != granter.id() {
                        edges.entry(waiter.id()).or_default().insert(granter.id());
                    }
                }
            }
        }

        (edges, txns)
    }

    /// The current waits-for edges, flattened, as of the last detection
    /// pass.
    pub fn waits_for_edges(&self) -> Vec<(TxnId, TxnId)> {
        let waits_for = self.waits_for.lock();
        waits_for
            .iter()
            .flat_map(|(&from, tos)| tos.iter().map(move |&to| (from, to)))
            .collect()
    }

    fn notify_all_queues(&self) {
        for queue in self.all_queues() {
            queue.cv.notify_all();
        }
    }
}

/// Depth-first cycle search, deterministic: start nodes in ascending txn
/// id order, neighbors explored in ascending order. Returns the highest
/// (youngest) transaction id on the first cycle found.
fn find_cycle_victim(edges: &BTreeMap<TxnId, BTreeSet<TxnId>>) -> Option<TxnId> {
    let mut finished: BTreeSet<TxnId> = BTreeSet::new();

    for &start in edges.keys() {
        if finished.contains(&start) {
            continue;
        }

        let mut path: Vec<TxnId> = Vec::new();
        if let Some(victim) = dfs(start, edges, &mut path, &mut finished) {
            return Some(victim);
        }
    }

    None
}

fn dfs(
    node: TxnId,
    edges: &BTreeMap<TxnId, BTreeSet<TxnId>>,
    path: &mut Vec<TxnId>,
    finished: &mut BTreeSet<TxnId>,
) -> Option<TxnId> {
    if let Some(pos) = path.iter().position(|&n| n == node) {
        // Cycle: everything from the first occurrence of `node` onward.
        return path[pos..].iter().copied().max();
    }

    if finished.contains(&node) {
        return None;
    }

    path.push(node);
    if let Some(neighbors) = edges.get(&node) {
        for &next in neighbors {
            if let Some(victim) = dfs(next, edges, path, finished) {
                return Some(victim);
            }
        }
    }
    path.pop();
    finished.insert(node);

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(TxnId, TxnId)]) -> BTreeMap<TxnId, BTreeSet<TxnId>> {
        let mut map: BTreeMap<TxnId, BTreeSet<TxnId>> = BTreeMap::new();
        for &(from, to) in edges {
            map.entry(from).or_default().insert(to);
        }
        map
    }

    #[test]
    fn test_no_cycle_in_dag() {
        let edges = graph(&[(1, 2), (2, 3), (1, 3)]);
        assert_eq!(find_cycle_victim(&edges), None);
    }

    #[test]
    fn test_two_node_cycle_picks_highest_id() {
        let edges = graph(&[(1, 2), (2, 1)]);
        assert_eq!(find_cycle_victim(&edges), Some(2));
    }

    #[test]
    fn test_longer_cycle_picks_highest_id() {
        let edges = graph(&[(1, 2), (2, 3), (3, 1), (4, 1)]);
        assert_eq!(find_cycle_victim(&edges), Some(3));
    }

    #[test]
    fn test_self_loops_are_not_built() {
        // Edge construction skips t -> t; a lone extra edge is no cycle.
        let edges = graph(&[(5, 6)]);
        assert_eq!(find_cycle_victim(&edges), None);
    }

    #[test]
    fn test_cycle_off_the_main_path() {
        let edges = graph(&[(1, 5), (5, 6), (6, 5)]);
        assert_eq!(find_cycle_victim(&edges), Some(6));
    }
}
