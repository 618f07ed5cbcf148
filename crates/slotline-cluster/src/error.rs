//! Error types for cluster operations.

use crate::topology::NodeId;

/// Errors surfaced by the routing layer.
///
/// Cloneable so a coalesced topology refresh can hand the same outcome to
/// every caller that waited on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClusterError {
    /// A topology answer had gaps, overlaps, or out-of-range slots.
    #[error("inconsistent cluster topology: {0}")]
    TopologyInconsistent(String),

    /// No known node or seed answered a topology query.
    #[error("no cluster node answered a topology query")]
    ClusterUnreachable,

    /// The target node is down or could not be reached.
    #[error("node {0} is unreachable")]
    NodeUnreachable(NodeId),

    /// No pooled connection to the node became free in time.
    #[error("connection pool for {0} is exhausted")]
    PoolExhausted(NodeId),

    /// The request did not complete before its deadline.
    #[error("request timed out")]
    Timeout,

    /// The node answered with an application error (e.g. `WRONGTYPE`).
    #[error("{message}")]
    Store { kind: String, message: String },

    /// Redirects kept pointing elsewhere until the retry budget ran out.
    #[error("slot {0} kept redirecting")]
    RedirectLoop(u16),

    /// The current view has no owner for the slot.
    #[error("slot {0} is not assigned to any node")]
    SlotNotAssigned(u16),

    /// Cross-slot operation with keys in different slots.
    #[error("cross-slot keys not allowed (keys span slots {0} and {1})")]
    CrossSlot(u16, u16),

    /// The request itself is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The client has been shut down.
    #[error("cluster client is closed")]
    Closed,

    /// Configuration error.
    #[error("invalid cluster configuration: {0}")]
    Configuration(String),
}

impl ClusterError {
    /// Short, stable name of the error kind, used in HTTP bodies and
    /// metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            ClusterError::TopologyInconsistent(_) => "TopologyInconsistent",
            ClusterError::ClusterUnreachable => "ClusterUnreachable",
            ClusterError::NodeUnreachable(_) => "NodeUnreachable",
            ClusterError::PoolExhausted(_) => "PoolExhausted",
            ClusterError::Timeout => "Timeout",
            ClusterError::Store { .. } => "StoreError",
            ClusterError::RedirectLoop(_) => "RedirectLoop",
            ClusterError::SlotNotAssigned(_) => "SlotNotAssigned",
            ClusterError::CrossSlot(..) => "CrossSlot",
            ClusterError::InvalidRequest(_) => "InvalidRequest",
            ClusterError::Closed => "Closed",
            ClusterError::Configuration(_) => "Configuration",
        }
    }

    /// Returns true for errors caused by the cluster's state rather than
    /// by the request. Callers may reasonably retry these later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClusterError::ClusterUnreachable
                | ClusterError::NodeUnreachable(_)
                | ClusterError::PoolExhausted(_)
                | ClusterError::Timeout
                | ClusterError::TopologyInconsistent(_)
                | ClusterError::RedirectLoop(_)
        )
    }
}
