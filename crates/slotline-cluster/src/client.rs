//! The client handle.
//!
//! [`ClusterClient::connect`] validates the config, bootstraps a view from
//! the seeds, and starts the periodic refresh task. The handle is cheap
//! to clone; all clones share one registry, pool and view. Call
//! [`ClusterClient::shutdown`] to stop the refresh task and fail any
//! further requests with `Closed`.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::ClusterConfig;
use crate::error::ClusterError;
use crate::pool::{ConnectionPool, PoolConfig};
use crate::refresh::TopologyRefresher;
use crate::registry::{LivenessPolicy, Node, NodeRegistry};
use crate::router::{Operation, Response, RetryPolicy, Router};
use crate::topology::ClusterView;
use crate::transport::{Connector, RespConnector};

struct Inner {
    router: Router,
    refresher: Arc<TopologyRefresher>,
    registry: Arc<NodeRegistry>,
    pool: Arc<ConnectionPool>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn stop_refresh(&self) {
        let task = self
            .refresh_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.stop_refresh();
    }
}

/// Routes GET/SET to the right cluster node.
#[derive(Clone)]
pub struct ClusterClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClient")
            .field("epoch", &self.view().epoch())
            .finish_non_exhaustive()
    }
}

impl ClusterClient {
    /// Connects over TCP using the RESP transport.
    pub async fn connect(config: ClusterConfig) -> Result<Self, ClusterError> {
        let connector = Arc::new(RespConnector::new(config.connect_timeout()));
        Self::with_connector(config, connector).await
    }

    /// Connects using a custom transport.
    ///
    /// Fails with `ClusterUnreachable` if no seed answers, or with
    /// `TopologyInconsistent` if every answer was malformed.
    pub async fn with_connector(
        config: ClusterConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ClusterError> {
        let seeds = config.validate()?;

        let registry = Arc::new(NodeRegistry::new(LivenessPolicy {
            down_after_failures: config.down_after_failures,
            down_after: config.down_after(),
        }));
        let pool = Arc::new(ConnectionPool::new(
            Arc::clone(&connector),
            Arc::clone(&registry),
            PoolConfig {
                size_per_node: config.pool_size_per_node,
                connect_timeout: config.connect_timeout(),
                acquire_timeout: config.pool_timeout(),
            },
        ));
        let refresher = Arc::new(TopologyRefresher::new(
            seeds,
            connector,
            Arc::clone(&registry),
            Arc::clone(&pool),
            config.request_timeout(),
        ));

        let view = refresher.refresh().await?;
        info!(
            epoch = view.epoch(),
            nodes = view.nodes().count(),
            "connected to cluster"
        );

        let refresh_task = config
            .refresh_interval()
            .map(|every| refresher.spawn_periodic(every));

        let router = Router::new(
            Arc::clone(&refresher),
            Arc::clone(&registry),
            Arc::clone(&pool),
            RetryPolicy {
                max_retries: config.max_retries,
                backoff: config.retry_backoff(),
                request_timeout: config.request_timeout(),
            },
        );

        Ok(Self {
            inner: Arc::new(Inner {
                router,
                refresher,
                registry,
                pool,
                refresh_task: Mutex::new(refresh_task),
            }),
        })
    }

    /// Runs one operation through the router.
    pub async fn execute(
        &self,
        op: Operation,
        key: impl Into<Bytes>,
        value: Option<Bytes>,
    ) -> Result<Response, ClusterError> {
        self.inner.router.execute(op, key.into(), value).await
    }

    /// Returns the value stored at `key`, or `None` if absent.
    pub async fn get(&self, key: impl Into<Bytes>) -> Result<Option<Bytes>, ClusterError> {
        match self.execute(Operation::Get, key, None).await? {
            Response::Value(value) => Ok(Some(value)),
            Response::NotFound => Ok(None),
            Response::Ok => Ok(Some(Bytes::from_static(b"OK"))),
        }
    }

    pub async fn set(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<(), ClusterError> {
        self.execute(Operation::Set, key, Some(value.into()))
            .await
            .map(|_| ())
    }

    /// The view requests are currently routed by.
    pub fn view(&self) -> Arc<ClusterView> {
        self.inner.refresher.current()
    }

    /// Forces a topology refresh, joining one already in flight.
    pub async fn refresh(&self) -> Result<Arc<ClusterView>, ClusterError> {
        self.inner.refresher.refresh().await
    }

    /// Liveness of every known node.
    pub fn nodes(&self) -> Vec<Node> {
        self.inner.registry.snapshot()
    }

    /// Topology queries sent since the client was created.
    pub fn topology_queries(&self) -> u64 {
        self.inner.refresher.queries_issued()
    }

    /// Stops background refresh and closes all pools. Requests already
    /// holding a connection finish; everything after fails with `Closed`.
    pub fn shutdown(&self) {
        self.inner.stop_refresh();
        self.inner.pool.close();
        info!("cluster client shut down");
    }
}
