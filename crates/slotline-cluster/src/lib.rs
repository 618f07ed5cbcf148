//! slotline-cluster: client-side routing for a sharded key-value cluster.
//!
//! The cluster splits its keyspace into 16384 hash slots, each owned by
//! one primary and optionally mirrored by replicas. This crate keeps a
//! local picture of that layout and routes every request to the right
//! node:
//!
//! - **Hashing**: CRC16 key slots with `{tag}` co-location
//! - **Topology**: immutable [`ClusterView`] snapshots, refreshed
//!   single-flight by [`TopologyRefresher`]
//! - **Liveness**: per-node up/suspected/down tracking in [`NodeRegistry`]
//! - **Pooling**: bounded per-node connection pools that fail fast when a
//!   node goes down
//! - **Routing**: `MOVED`/`ASK` redirects, replica reads, and bounded
//!   retries under a deadline in [`Router`]
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use slotline_cluster::{ClusterClient, ClusterConfig};
//!
//! # async fn run() -> Result<(), slotline_cluster::ClusterError> {
//! let client = ClusterClient::connect(ClusterConfig::with_seeds(["127.0.0.1:7000"])).await?;
//! client.set("user:{42}:name", "ada").await?;
//! let name = client.get("user:{42}:name").await?;
//! assert_eq!(name.as_deref(), Some(&b"ada"[..]));
//! client.shutdown();
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod error;
mod pool;
mod refresh;
mod registry;
mod router;
mod slots;
mod topology;
mod transport;


pub use client::ClusterClient;
pub use config::ClusterConfig;
pub use error::ClusterError;
pub use pool::{ConnectionPool, PoolConfig, PooledConnection};
pub use refresh::TopologyRefresher;
pub use registry::{LivenessPolicy, Node, NodeRegistry};
pub use router::{Operation, Response, RetryPolicy, Router};
pub use slots::{check_same_slot, key_slot, SlotEntry, SlotMap, SlotMapBuilder, SlotRange, SLOT_COUNT};
pub use topology::{ClusterNode, ClusterView, Liveness, NodeId, NodeRole, TopologyEntry};
pub use transport::{
    parse_cluster_slots, ConnectionError, Connector, NodeConnection, Reply, RespConnection,
    RespConnector, SendFlags,
};
