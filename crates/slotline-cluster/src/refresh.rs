//! Topology refresh.
//!
//! [`TopologyRefresher`] owns the current [`ClusterView`] and is the only
//! thing that replaces it. Refreshes are single-flight: callers that ask
//! for one while another is running wait for it and share its outcome,
//! so a burst of `MOVED` replies costs one topology query, not one each.
//!
//! A refresh asks known nodes first (healthy ones before down ones), then
//! the configured seeds, and installs the first consistent answer with a
//! bumped epoch. Inconsistent answers are logged and skipped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::ClusterError;
use crate::pool::ConnectionPool;
use crate::registry::NodeRegistry;
use crate::topology::{ClusterView, Liveness, NodeId, TopologyEntry};
use crate::transport::{ConnectionError, Connector};

type Outcome = Result<Arc<ClusterView>, ClusterError>;

pub struct TopologyRefresher {
    seeds: Vec<NodeId>,
    connector: Arc<dyn Connector>,
    registry: Arc<NodeRegistry>,
    pool: Arc<ConnectionPool>,
    query_timeout: Duration,

    current: RwLock<Arc<ClusterView>>,
    inflight: tokio::sync::Mutex<()>,
    /// Bumped after every completed refresh. A waiter that sees it move
    /// while queued on `inflight` reuses `last` instead of querying again.
    generation: AtomicU64,
    last: Mutex<Option<Outcome>>,
    queries: AtomicU64,
}

impl std::fmt::Debug for TopologyRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyRefresher")
            .field("seeds", &self.seeds)
            .field("epoch", &self.current().epoch())
            .finish_non_exhaustive()
    }
}

impl TopologyRefresher {
    pub fn new(
        seeds: Vec<NodeId>,
        connector: Arc<dyn Connector>,
        registry: Arc<NodeRegistry>,
        pool: Arc<ConnectionPool>,
        query_timeout: Duration,
    ) -> Self {
        Self {
            seeds,
            connector,
            registry,
            pool,
            query_timeout,
            current: RwLock::new(Arc::new(ClusterView::empty())),
            inflight: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            last: Mutex::new(None),
            queries: AtomicU64::new(0),
        }
    }

    /// The installed view. Cheap; readers never wait on a refresh.
    pub fn current(&self) -> Arc<ClusterView> {
        Arc::clone(&self.current.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Topology queries sent so far, successful or not.
    pub fn queries_issued(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    /// Fetches and installs a fresh view, or joins the refresh already in
    /// progress and returns its outcome.
    pub async fn refresh(&self) -> Result<Arc<ClusterView>, ClusterError> {
        let observed = self.generation.load(Ordering::Acquire);
        let _guard = self.inflight.lock().await;

        if self.generation.load(Ordering::Acquire) != observed {
            let last = self.last.lock().unwrap_or_else(|e| e.into_inner()).clone();
            if let Some(outcome) = last {
                debug!("joined a concurrent topology refresh");
                return outcome;
            }
        }

        let outcome = self.query_cluster().await.map(|view| self.install(view));
        match &outcome {
            Ok(_) => metrics::counter!("slotline_refreshes_total", "result" => "ok").increment(1),
            Err(e) => {
                warn!(error = %e, "topology refresh failed");
                metrics::counter!("slotline_refreshes_total", "result" => "error").increment(1);
            }
        }

        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(outcome.clone());
        self.generation.fetch_add(1, Ordering::Release);
        outcome
    }

    fn install(&self, view: ClusterView) -> Arc<ClusterView> {
        let view = Arc::new(view);
        self.registry.reconcile(&view);
        self.pool.retain_nodes(&view);

        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        let previous = current.epoch();
        *current = Arc::clone(&view);
        drop(current);

        info!(
            epoch = view.epoch(),
            previous,
            nodes = view.nodes().count(),
            "installed cluster view"
        );
        view
    }

    /// Nodes to ask, in order: healthy known nodes, down known nodes, then
    /// seeds not already listed.
    fn candidates(&self) -> Vec<NodeId> {
        let view = self.current();
        let (mut healthy, down): (Vec<NodeId>, Vec<NodeId>) = view
            .nodes()
            .map(|node| node.id.clone())
            .partition(|id| self.registry.liveness(id) != Some(Liveness::Down));
        healthy.extend(down);
        for seed in &self.seeds {
            if !healthy.contains(seed) {
                healthy.push(seed.clone());
            }
        }
        healthy
    }

    async fn query_cluster(&self) -> Result<ClusterView, ClusterError> {
        let epoch = self.current().epoch() + 1;
        let mut inconsistent = None;

        for node in self.candidates() {
            let entries = match self.query_node(&node).await {
                Ok(entries) => entries,
                Err(e) => {
                    debug!(node = %node, error = %e, "topology query failed");
                    self.registry.record_failure(&node);
                    continue;
                }
            };
            match ClusterView::from_topology(epoch, entries) {
                Ok(view) => {
                    debug!(node = %node, epoch, "topology answer accepted");
                    return Ok(view);
                }
                Err(e) => {
                    warn!(node = %node, error = %e, "rejected topology answer");
                    inconsistent = Some(e);
                }
            }
        }

        Err(inconsistent.unwrap_or(ClusterError::ClusterUnreachable))
    }

    async fn query_node(&self, node: &NodeId) -> Result<Vec<TopologyEntry>, ConnectionError> {
        let query = async {
            let mut conn = self.connector.connect(node).await?;
            self.queries.fetch_add(1, Ordering::Relaxed);
            conn.cluster_slots().await
        };
        tokio::time::timeout(self.query_timeout, query)
            .await
            .map_err(|_| ConnectionError::Timeout)?
    }

    /// Refreshes every `every` until the refresher is dropped or the
    /// returned handle is aborted. The first tick fires after one period.
    pub fn spawn_periodic(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(refresher) = weak.upgrade() else {
                    break;
                };
                if let Err(e) = refresher.refresh().await {
                    debug!(error = %e, "periodic refresh failed");
                }
            }
        })
    }
}
