//! Bounded per-node connection pools.
//!
//! Each node gets a semaphore sized to `pool_size_per_node` and a stack
//! of idle connections. Acquiring waits for a permit, but gives up early
//! with `NodeUnreachable` if the registry marks the node down while the
//! caller is queued, and with `PoolExhausted` once the wait times out.
//!
//! A [`PooledConnection`] returns its connection to the idle stack on
//! drop, unless a request on it failed or was abandoned mid-flight. A
//! connection in an unknown protocol state is never reused.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use slotline_protocol::Request;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::ClusterError;
use crate::registry::NodeRegistry;
use crate::topology::{ClusterView, Liveness, NodeId};
use crate::transport::{ConnectionError, Connector, NodeConnection, Reply, SendFlags};

/// Pool sizing and timeouts.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub size_per_node: usize,
    pub connect_timeout: Duration,
    pub acquire_timeout: Duration,
}

struct NodePool {
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Box<dyn NodeConnection>>>,
}

impl NodePool {
    fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size)),
            idle: Mutex::new(Vec::with_capacity(size)),
        }
    }

    fn idle(&self) -> std::sync::MutexGuard<'_, Vec<Box<dyn NodeConnection>>> {
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn close(&self) {
        self.permits.close();
        self.idle().clear();
    }
}

/// Connection pools for every node the client talks to.
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    registry: Arc<NodeRegistry>,
    config: PoolConfig,
    nodes: Mutex<HashMap<NodeId, Arc<NodePool>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>, registry: Arc<NodeRegistry>, config: PoolConfig) -> Self {
        Self {
            connector,
            registry,
            config,
            nodes: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn nodes(&self) -> std::sync::MutexGuard<'_, HashMap<NodeId, Arc<NodePool>>> {
        self.nodes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn node_pool(&self, node: &NodeId) -> Arc<NodePool> {
        let mut nodes = self.nodes();
        Arc::clone(
            nodes
                .entry(node.clone())
                .or_insert_with(|| Arc::new(NodePool::new(self.config.size_per_node))),
        )
    }

    /// Checks out a connection to `node`, opening one if none is idle.
    ///
    /// Waits at most the pool's acquire timeout, and never past `deadline`.
    pub async fn acquire(
        &self,
        node: &NodeId,
        deadline: Instant,
    ) -> Result<PooledConnection, ClusterError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClusterError::Closed);
        }
        if self.registry.is_down(node) {
            return Err(ClusterError::NodeUnreachable(node.clone()));
        }

        let pool = self.node_pool(node);
        let liveness = self.registry.subscribe(node);
        let wait_until = deadline.min(Instant::now() + self.config.acquire_timeout);

        let permit = tokio::select! {
            biased;
            permit = Arc::clone(&pool.permits).acquire_owned() => {
                permit.map_err(|_| ClusterError::Closed)?
            }
            _ = wait_for_down(liveness) => {
                debug!(node = %node, "node went down while waiting for a connection");
                return Err(ClusterError::NodeUnreachable(node.clone()));
            }
            _ = tokio::time::sleep_until(wait_until) => {
                return Err(ClusterError::PoolExhausted(node.clone()));
            }
        };

        let idle = pool.idle().pop();
        let conn = match idle {
            Some(conn) => conn,
            None => {
                let budget = self
                    .config
                    .connect_timeout
                    .min(deadline.saturating_duration_since(Instant::now()));
                match tokio::time::timeout(budget, self.connector.connect(node)).await {
                    Ok(Ok(conn)) => conn,
                    Ok(Err(e)) => {
                        warn!(node = %node, error = %e, "connect failed");
                        return Err(ClusterError::NodeUnreachable(node.clone()));
                    }
                    Err(_) => {
                        warn!(node = %node, "connect timed out");
                        return Err(ClusterError::NodeUnreachable(node.clone()));
                    }
                }
            }
        };

        Ok(PooledConnection {
            conn: Some(conn),
            node: node.clone(),
            pool,
            reusable: true,
            _permit: permit,
        })
    }

    /// Drops pools for nodes that are no longer part of the cluster.
    pub fn retain_nodes(&self, view: &ClusterView) {
        self.nodes().retain(|id, pool| {
            let keep = view.contains(id);
            if !keep {
                pool.close();
            }
            keep
        });
    }

    /// Number of idle connections held for `node`.
    pub fn idle_count(&self, node: &NodeId) -> usize {
        self.nodes()
            .get(node)
            .map(|pool| pool.idle().len())
            .unwrap_or(0)
    }

    /// Fails all waiters and future acquisitions with `Closed` and drops
    /// idle connections.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        for pool in self.nodes().values() {
            pool.close();
        }
    }
}

async fn wait_for_down(liveness: Option<watch::Receiver<Liveness>>) {
    match liveness {
        // a closed channel means the node left the registry
        Some(mut rx) => {
            let _ = rx.wait_for(|state| *state == Liveness::Down).await;
        }
        None => std::future::pending().await,
    }
}

/// A checked-out connection. Holds a pool permit until dropped.
pub struct PooledConnection {
    conn: Option<Box<dyn NodeConnection>>,
    node: NodeId,
    pool: Arc<NodePool>,
    reusable: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub fn node(&self) -> &NodeId {
        &self.node
    }

    pub async fn send(&mut self, request: &Request, flags: SendFlags) -> Result<Reply, ConnectionError> {
        let conn = self.conn.as_mut().ok_or(ConnectionError::Disconnected)?;
        // cleared until the reply is fully read, so a cancelled send is
        // never returned to the pool
        self.reusable = false;
        let reply = conn.send(request, flags).await?;
        self.reusable = true;
        Ok(reply)
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if !self.reusable || self.pool.permits.is_closed() {
            return;
        }
        if let Some(conn) = self.conn.take() {
            self.pool.idle().push(conn);
        }
    }
}
