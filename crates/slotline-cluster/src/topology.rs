//! Cluster topology as seen by the client.
//!
//! A [`ClusterView`] is an immutable snapshot: which primary owns each
//! slot, which replicas follow it, and an epoch that increases with every
//! successful refresh. Views are shared behind `Arc` and replaced
//! wholesale, so a request that loaded a view keeps a consistent picture
//! for its whole attempt even while a refresh installs a newer one.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ClusterError;
use crate::slots::{SlotMap, SlotRange};

/// Identity of a cluster node: its `host:port` address.
///
/// Topology answers and redirects both name nodes by address, so the
/// address is the key the registry and pool index on. IPv6 hosts are kept
/// in brackets (`[::1]:7000`) so the address can be dialed as is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(Arc<str>);

impl NodeId {
    pub fn new(host: &str, port: u16) -> Self {
        let host = unbracket(host);
        if host.contains(':') {
            Self(Arc::from(format!("[{host}]:{port}")))
        } else {
            Self(Arc::from(format!("{host}:{port}")))
        }
    }

    /// Parses `host:port`. The port is taken after the last colon, so IPv6
    /// hosts parse with or without brackets.
    pub fn parse(addr: &str) -> Result<Self, ClusterError> {
        let invalid = || ClusterError::Configuration(format!("invalid node address '{addr}'"));
        let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
        if unbracket(host).is_empty() {
            return Err(invalid());
        }
        let port: u16 = port.parse().map_err(|_| invalid())?;
        Ok(Self::new(host, port))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The host part of the address, without IPv6 brackets.
    pub fn host(&self) -> &str {
        unbracket(self.0.rsplit_once(':').map(|(host, _)| host).unwrap_or(&self.0))
    }
}

fn unbracket(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The role of a node in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// Owns slots and accepts writes.
    Primary,
    /// Mirrors a primary and may serve reads.
    Replica,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Primary => write!(f, "primary"),
            NodeRole::Replica => write!(f, "replica"),
        }
    }
}

/// Client-side health of a node.
///
/// `Up -> Suspected` on the first failed request, `Suspected -> Up` on a
/// success, `Suspected -> Down` after repeated failures or a quiet
/// timeout. `Down -> Up` only when a topology refresh lists the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Up,
    Suspected,
    Down,
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Liveness::Up => write!(f, "up"),
            Liveness::Suspected => write!(f, "suspected"),
            Liveness::Down => write!(f, "down"),
        }
    }
}

/// A node as listed in a view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNode {
    pub id: NodeId,
    pub role: NodeRole,
    /// For replicas, the primary being mirrored.
    pub replicates: Option<NodeId>,
}

/// One range from a raw topology answer, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyEntry {
    pub start: u16,
    pub end: u16,
    pub primary: NodeId,
    pub replicas: Vec<NodeId>,
}

/// An immutable, validated snapshot of the cluster.
#[derive(Debug, Clone, Default)]
pub struct ClusterView {
    epoch: u64,
    slots: SlotMap,
    nodes: BTreeMap<NodeId, ClusterNode>,
}

impl ClusterView {
    /// The placeholder view installed before the first refresh. It owns no
    /// slots and lists no nodes.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Validates a raw topology answer into a view with the given epoch.
    ///
    /// Fails with `TopologyInconsistent` if ranges overlap, leave gaps, or
    /// a node is listed as both primary and replica.
    pub fn from_topology(epoch: u64, entries: Vec<TopologyEntry>) -> Result<Self, ClusterError> {
        let mut nodes: BTreeMap<NodeId, ClusterNode> = BTreeMap::new();
        let mut builder = SlotMap::builder();

        for entry in &entries {
            register(&mut nodes, &entry.primary, NodeRole::Primary, None)?;
            for replica in &entry.replicas {
                register(&mut nodes, replica, NodeRole::Replica, Some(&entry.primary))?;
            }
        }
        for entry in entries {
            builder.assign_with_replicas(entry.start, entry.end, entry.primary, entry.replicas)?;
        }

        Ok(Self {
            epoch,
            slots: builder.build()?,
            nodes,
        })
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn slots(&self) -> &SlotMap {
        &self.slots
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn owner_of(&self, slot: u16) -> Option<&NodeId> {
        self.slots.owner_of(slot)
    }

    pub fn replicas_of(&self, slot: u16) -> &[NodeId] {
        self.slots.replicas_of(slot)
    }

    pub fn node(&self, id: &NodeId) -> Option<&ClusterNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Every listed node, primaries and replicas, in address order.
    pub fn nodes(&self) -> impl Iterator<Item = &ClusterNode> {
        self.nodes.values()
    }

    /// Slot ranges owned by `id` as primary.
    pub fn slots_for_node(&self, id: &NodeId) -> Vec<SlotRange> {
        self.slots.slots_for_node(id)
    }
}

fn register(
    nodes: &mut BTreeMap<NodeId, ClusterNode>,
    id: &NodeId,
    role: NodeRole,
    replicates: Option<&NodeId>,
) -> Result<(), ClusterError> {
    if let Some(existing) = nodes.get(id) {
        if existing.role != role || existing.replicates.as_ref() != replicates {
            return Err(ClusterError::TopologyInconsistent(format!(
                "node {id} listed as both {} and {role}",
                existing.role
            )));
        }
        return Ok(());
    }
    nodes.insert(
        id.clone(),
        ClusterNode {
            id: id.clone(),
            role,
            replicates: replicates.cloned(),
        },
    );
    Ok(())
}
