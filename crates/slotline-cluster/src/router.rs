//! Request routing.
//!
//! [`Router::execute`] hashes the key, picks a node from the current view,
//! and runs a bounded attempt loop under the request deadline:
//!
//! | reply / failure   | next attempt                                      |
//! |-------------------|---------------------------------------------------|
//! | `MOVED slot X`    | refresh, then the new owner; X directly if the     |
//! |                   | refreshed view disagrees or no refresh is allowed |
//! | `ASK slot X`      | X once, prefixed with `ASKING`                    |
//! | `TRYAGAIN`        | back off, refresh, owner                          |
//! | node failure      | back off; reads try a replica, writes refresh     |
//! | application error | returned immediately                              |
//!
//! When attempts run out, the last error seen is returned, unless the
//! last refresh in between failed: then the caller gets that refresh's
//! `ClusterUnreachable` or `TopologyInconsistent`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use slotline_protocol::Request;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::ClusterError;
use crate::pool::ConnectionPool;
use crate::refresh::TopologyRefresher;
use crate::registry::NodeRegistry;
use crate::slots::key_slot;
use crate::topology::{ClusterView, Liveness, NodeId};
use crate::transport::{Reply, SendFlags};

/// The data operations a caller can route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Get,
    Set,
}

impl Operation {
    pub fn name(self) -> &'static str {
        match self {
            Operation::Get => "GET",
            Operation::Set => "SET",
        }
    }
}

/// Successful outcome of a routed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Value(Bytes),
    Ok,
    NotFound,
}

/// Attempt budget and timing for routed requests.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
    pub request_timeout: Duration,
}

/// Where the next attempt goes.
enum Target {
    /// Slot owner in the current view.
    Owner,
    /// A live replica of the slot owner, falling back to the owner.
    Replica,
    /// A node named by a `MOVED` the view couldn't confirm.
    Redirect(NodeId),
    /// The importing node of an `ASK`.
    Asking(NodeId),
}

pub struct Router {
    refresher: Arc<TopologyRefresher>,
    registry: Arc<NodeRegistry>,
    pool: Arc<ConnectionPool>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Router {
    pub fn new(
        refresher: Arc<TopologyRefresher>,
        registry: Arc<NodeRegistry>,
        pool: Arc<ConnectionPool>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            refresher,
            registry,
            pool,
            policy,
        }
    }

    /// Routes one operation. `value` is required for `Set` and ignored
    /// for `Get`.
    pub async fn execute(
        &self,
        op: Operation,
        key: Bytes,
        value: Option<Bytes>,
    ) -> Result<Response, ClusterError> {
        let request = match (op, value) {
            (Operation::Get, _) => Request::get(key),
            (Operation::Set, Some(value)) => Request::set(key, value),
            (Operation::Set, None) => {
                return Err(ClusterError::InvalidRequest("SET requires a value".into()))
            }
        };
        self.dispatch(request).await
    }

    /// Routes a prepared request. Only keyed data requests can be routed.
    pub async fn dispatch(&self, request: Request) -> Result<Response, ClusterError> {
        let Some(key) = request.key() else {
            return Err(ClusterError::InvalidRequest(format!(
                "{} has no key to route on",
                request.name()
            )));
        };
        let slot = key_slot(key);
        let started = Instant::now();
        let deadline = started + self.policy.request_timeout;

        metrics::counter!("slotline_requests_total", "op" => request.name()).increment(1);
        let result = tokio::time::timeout_at(deadline, self.run(&request, slot, deadline))
            .await
            .unwrap_or(Err(ClusterError::Timeout));
        metrics::histogram!("slotline_request_duration_seconds", "op" => request.name())
            .record(started.elapsed().as_secs_f64());

        if let Err(e) = &result {
            metrics::counter!("slotline_request_errors_total", "kind" => e.kind()).increment(1);
            debug!(slot, command = request.name(), error = %e, "request failed");
        }
        result
    }

    async fn run(
        &self,
        request: &Request,
        slot: u16,
        deadline: Instant,
    ) -> Result<Response, ClusterError> {
        let max_attempts = self.policy.max_retries.saturating_add(1);
        let read = request.is_read_only();
        let mut next = Target::Owner;
        let mut last_error = None;
        // set while the most recent interposed refresh has failed
        let mut refresh_error: Option<ClusterError> = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                metrics::counter!("slotline_retries_total").increment(1);
            }
            let (node, flags) = self.resolve(std::mem::replace(&mut next, Target::Owner), slot)?;
            let last_attempt = attempt == max_attempts;
            debug!(attempt, node = %node, slot, command = request.name(), "dispatching");

            let reply = match self.attempt(&node, request, flags, deadline).await {
                Ok(reply) => reply,
                Err(ClusterError::NodeUnreachable(failed)) => {
                    let liveness = self.registry.record_failure(&failed);
                    warn!(
                        node = %failed,
                        attempt,
                        liveness = ?liveness,
                        "node did not answer"
                    );
                    last_error = Some(ClusterError::NodeUnreachable(failed));
                    if last_attempt {
                        break;
                    }
                    self.backoff(attempt).await;
                    let view = self.refresher.current();
                    if read && self.pick_replica(&view, slot).is_some() {
                        next = Target::Replica;
                    } else {
                        refresh_error = self.refresh_quietly().await;
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            self.registry.record_success(&node);
            match reply {
                Reply::Value(value) => return Ok(Response::Value(value)),
                Reply::Ok => return Ok(Response::Ok),
                Reply::NotFound => return Ok(Response::NotFound),
                Reply::Error { kind, message } => return Err(ClusterError::Store { kind, message }),
                Reply::Moved { slot: moved, node: owner } => {
                    metrics::counter!("slotline_redirects_total", "kind" => "moved").increment(1);
                    debug!(slot = moved, from = %node, to = %owner, "MOVED");
                    last_error = Some(ClusterError::RedirectLoop(slot));
                    next = if attempt + 1 >= max_attempts {
                        // the final attempt follows the redirect without a refresh
                        Target::Redirect(owner)
                    } else {
                        match self.refresher.refresh().await {
                            Ok(view) => {
                                refresh_error = None;
                                if view.owner_of(moved) == Some(&owner) {
                                    Target::Owner
                                } else {
                                    Target::Redirect(owner)
                                }
                            }
                            Err(e) => {
                                debug!(error = %e, "refresh after MOVED failed");
                                refresh_error = Some(e);
                                Target::Redirect(owner)
                            }
                        }
                    };
                }
                Reply::Ask { slot: asked, node: importing } => {
                    metrics::counter!("slotline_redirects_total", "kind" => "ask").increment(1);
                    debug!(slot = asked, from = %node, to = %importing, "ASK");
                    last_error = Some(ClusterError::RedirectLoop(slot));
                    next = Target::Asking(importing);
                }
                Reply::TryAgain(message) => {
                    debug!(node = %node, reply = %message, "cluster busy");
                    let kind = message.split_whitespace().next().unwrap_or("TRYAGAIN").to_string();
                    last_error = Some(ClusterError::Store { kind, message });
                    if last_attempt {
                        break;
                    }
                    self.backoff(attempt).await;
                    refresh_error = self.refresh_quietly().await;
                }
            }
        }

        // a failed refresh is reported over the node failure that prompted it
        match refresh_error {
            Some(e @ (ClusterError::ClusterUnreachable | ClusterError::TopologyInconsistent(_))) => {
                Err(e)
            }
            _ => Err(last_error.unwrap_or(ClusterError::RedirectLoop(slot))),
        }
    }

    fn resolve(&self, target: Target, slot: u16) -> Result<(NodeId, SendFlags), ClusterError> {
        match target {
            Target::Asking(node) => Ok((node, SendFlags::asking())),
            Target::Redirect(node) => Ok((node, SendFlags::default())),
            Target::Replica => {
                let view = self.refresher.current();
                match self.pick_replica(&view, slot) {
                    Some(replica) => Ok((replica, SendFlags::readonly())),
                    None => Ok((owner(&view, slot)?, SendFlags::default())),
                }
            }
            Target::Owner => Ok((owner(&self.refresher.current(), slot)?, SendFlags::default())),
        }
    }

    /// First replica that is up, else first one merely suspected.
    fn pick_replica(&self, view: &ClusterView, slot: u16) -> Option<NodeId> {
        let replicas = view.replicas_of(slot);
        let with_state = |wanted: Liveness| {
            replicas
                .iter()
                .find(|id| self.registry.liveness(id).unwrap_or(Liveness::Up) == wanted)
                .cloned()
        };
        with_state(Liveness::Up).or_else(|| with_state(Liveness::Suspected))
    }

    async fn attempt(
        &self,
        node: &NodeId,
        request: &Request,
        flags: SendFlags,
        deadline: Instant,
    ) -> Result<Reply, ClusterError> {
        let mut conn = self.pool.acquire(node, deadline).await?;
        conn.send(request, flags).await.map_err(|e| {
            debug!(node = %node, error = %e, "send failed");
            ClusterError::NodeUnreachable(node.clone())
        })
    }

    /// Refreshes between retries. The error, if any, is returned for the
    /// final report rather than failing the attempt loop.
    async fn refresh_quietly(&self) -> Option<ClusterError> {
        match self.refresher.refresh().await {
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, "refresh during retry failed");
                Some(e)
            }
        }
    }

    async fn backoff(&self, attempt: u32) {
        let delay = backoff_delay(self.policy.backoff, attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

fn owner(view: &ClusterView, slot: u16) -> Result<NodeId, ClusterError> {
    view.owner_of(slot)
        .cloned()
        .ok_or(ClusterError::SlotNotAssigned(slot))
}

/// Exponential backoff with up to 50% random jitter.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    if base.is_zero() {
        return base;
    }
    let exp = base.saturating_mul(1 << attempt.saturating_sub(1).min(6));
    let spread = (exp.as_millis() as u64) / 2;
    let jitter = rand::rng().random_range(0..=spread);
    exp + Duration::from_millis(jitter)
}
