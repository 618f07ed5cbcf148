//! Per-node liveness tracking.
//!
//! The registry owns one [`watch`] channel per known node. Request paths
//! report outcomes through [`NodeRegistry::record_failure`] and
//! [`NodeRegistry::record_success`]; connection pools subscribe so that
//! callers queued on a node's connections are released the moment it is
//! marked down. Reconciling against a new view drops nodes the cluster no
//! longer lists, which closes their channels.
//!
//! A suspicion that outlives [`LivenessPolicy::down_after`] is promoted to
//! down the next time anything reads or updates that node, so a quiet node
//! goes down without another failed request.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::topology::{ClusterView, Liveness, NodeId, NodeRole};

/// When a suspected node is declared down.
#[derive(Debug, Clone, Copy)]
pub struct LivenessPolicy {
    /// Consecutive failed requests.
    pub down_after_failures: u32,
    /// Time spent suspected with no successful request.
    pub down_after: Duration,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self {
            down_after_failures: 3,
            down_after: Duration::from_secs(5),
        }
    }
}

/// Snapshot of one node's registry state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub role: NodeRole,
    pub replicates: Option<NodeId>,
    pub liveness: Liveness,
    pub consecutive_failures: u32,
}

struct Entry {
    role: NodeRole,
    replicates: Option<NodeId>,
    liveness: watch::Sender<Liveness>,
    consecutive_failures: u32,
    suspected_since: Option<Instant>,
}

impl Entry {
    fn new(role: NodeRole, replicates: Option<NodeId>) -> Self {
        let (liveness, _) = watch::channel(Liveness::Up);
        Self {
            role,
            replicates,
            liveness,
            consecutive_failures: 0,
            suspected_since: None,
        }
    }

    fn current(&self) -> Liveness {
        *self.liveness.borrow()
    }

    /// Current liveness after promoting an expired suspicion.
    fn settle(&mut self, id: &NodeId, policy: &LivenessPolicy) -> Liveness {
        let expired = self
            .suspected_since
            .is_some_and(|since| since.elapsed() >= policy.down_after);
        if expired && self.current() == Liveness::Suspected {
            self.set(id, Liveness::Down);
        }
        self.current()
    }

    fn set(&mut self, id: &NodeId, next: Liveness) {
        let prev = self.current();
        if prev == next {
            return;
        }
        match next {
            Liveness::Up => {
                self.consecutive_failures = 0;
                self.suspected_since = None;
                info!(node = %id, from = %prev, "node is up");
            }
            Liveness::Suspected => {
                self.suspected_since = Some(Instant::now());
                debug!(node = %id, "node suspected");
            }
            Liveness::Down => {
                self.suspected_since = None;
                warn!(node = %id, failures = self.consecutive_failures, "node marked down");
            }
        }
        // send_replace updates the value even with no subscribers
        self.liveness.send_replace(next);
    }
}

/// Thread-safe table of node liveness.
pub struct NodeRegistry {
    nodes: Mutex<HashMap<NodeId, Entry>>,
    policy: LivenessPolicy,
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry").finish_non_exhaustive()
    }
}

impl NodeRegistry {
    pub fn new(policy: LivenessPolicy) -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
            policy,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<NodeId, Entry>> {
        self.nodes.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, id: &NodeId) -> Option<Node> {
        self.lock().get_mut(id).map(|entry| Node {
            id: id.clone(),
            liveness: entry.settle(id, &self.policy),
            role: entry.role,
            replicates: entry.replicates.clone(),
            consecutive_failures: entry.consecutive_failures,
        })
    }

    pub fn liveness(&self, id: &NodeId) -> Option<Liveness> {
        self.lock()
            .get_mut(id)
            .map(|entry| entry.settle(id, &self.policy))
    }

    pub fn is_down(&self, id: &NodeId) -> bool {
        self.liveness(id) == Some(Liveness::Down)
    }

    /// All known nodes, sorted by address.
    pub fn snapshot(&self) -> Vec<Node> {
        let mut nodes = self.lock();
        let mut out: Vec<Node> = nodes
            .iter_mut()
            .map(|(id, entry)| Node {
                id: id.clone(),
                liveness: entry.settle(id, &self.policy),
                role: entry.role,
                replicates: entry.replicates.clone(),
                consecutive_failures: entry.consecutive_failures,
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Watches a node's liveness. `None` if the node is unknown; the
    /// channel closes when the node is dropped from the registry.
    pub fn subscribe(&self, id: &NodeId) -> Option<watch::Receiver<Liveness>> {
        self.lock().get(id).map(|entry| entry.liveness.subscribe())
    }

    pub fn mark_suspected(&self, id: &NodeId) {
        if let Some(entry) = self.lock().get_mut(id) {
            if entry.current() == Liveness::Up {
                entry.set(id, Liveness::Suspected);
            }
        }
    }

    pub fn mark_down(&self, id: &NodeId) {
        if let Some(entry) = self.lock().get_mut(id) {
            entry.set(id, Liveness::Down);
        }
    }

    /// Marks a node up. A down node only comes back this way, after a
    /// topology refresh lists it again.
    pub fn mark_up(&self, id: &NodeId) {
        if let Some(entry) = self.lock().get_mut(id) {
            entry.set(id, Liveness::Up);
        }
    }

    /// Records a failed request and returns the resulting liveness.
    pub fn record_failure(&self, id: &NodeId) -> Option<Liveness> {
        let mut nodes = self.lock();
        let entry = nodes.get_mut(id)?;
        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);

        match entry.settle(id, &self.policy) {
            Liveness::Up => entry.set(id, Liveness::Suspected),
            Liveness::Suspected => {
                if entry.consecutive_failures >= self.policy.down_after_failures {
                    entry.set(id, Liveness::Down);
                }
            }
            Liveness::Down => {}
        }
        Some(entry.current())
    }

    /// Records a successful request. Clears suspicion but never revives a
    /// down node.
    pub fn record_success(&self, id: &NodeId) {
        if let Some(entry) = self.lock().get_mut(id) {
            match entry.settle(id, &self.policy) {
                Liveness::Down => {}
                Liveness::Suspected => entry.set(id, Liveness::Up),
                Liveness::Up => entry.consecutive_failures = 0,
            }
        }
    }

    /// Aligns the registry with a freshly installed view. New nodes start
    /// up, down nodes the view still lists come back up, suspected nodes
    /// stay suspected, and unlisted nodes are removed.
    pub fn reconcile(&self, view: &ClusterView) {
        let mut nodes = self.lock();
        nodes.retain(|id, _| {
            let keep = view.contains(id);
            if !keep {
                info!(node = %id, "node left the topology");
            }
            keep
        });
        for node in view.nodes() {
            match nodes.get_mut(&node.id) {
                Some(entry) => {
                    entry.role = node.role;
                    entry.replicates = node.replicates.clone();
                    if entry.current() == Liveness::Down {
                        entry.set(&node.id, Liveness::Up);
                    }
                }
                None => {
                    nodes.insert(node.id.clone(), Entry::new(node.role, node.replicates.clone()));
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
