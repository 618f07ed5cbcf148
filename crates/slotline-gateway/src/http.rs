//! HTTP façade over the cluster client.
//!
//! | route             | method     | outcome                                  |
//! |-------------------|------------|------------------------------------------|
//! | `/kv/{key}`       | GET        | 200 with the raw value, or 404           |
//! | `/kv/{key}`       | PUT, POST  | body stored as the value, 204            |
//! | `/health`         | GET        | JSON view summary, 503 when degraded     |
//! | `/metrics`        | GET        | Prometheus text, if enabled              |
//!
//! Routing failures come back as `{"error": "<Kind>", "message": "..."}`
//! with a status chosen by [`status_for`].

use std::convert::Infallible;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Body;
use hyper::header::{ALLOW, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use metrics_exporter_prometheus::PrometheusHandle;
use slotline_cluster::{ClusterClient, ClusterError, Liveness, NodeRole};
use tracing::{debug, warn};

use crate::metrics::record_http;

/// Shared state for every HTTP connection.
pub struct Gateway {
    client: ClusterClient,
    metrics: Option<PrometheusHandle>,
    max_value_bytes: usize,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("metrics", &self.metrics.is_some())
            .field("max_value_bytes", &self.max_value_bytes)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    pub fn new(
        client: ClusterClient,
        metrics: Option<PrometheusHandle>,
        max_value_bytes: usize,
    ) -> Self {
        Self {
            client,
            metrics,
            max_value_bytes,
        }
    }

    pub fn client(&self) -> &ClusterClient {
        &self.client
    }

    /// Routes one request. Never fails; errors become error responses.
    pub async fn handle<B>(&self, req: Request<B>) -> Result<Response<Full<Bytes>>, Infallible>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let path = req.uri().path().to_owned();
        let (route, response) = if let Some(raw) = path.strip_prefix("/kv/") {
            ("kv", self.handle_kv(raw, req).await)
        } else {
            match path.as_str() {
                "/health" => ("health", self.handle_health(req.method())),
                "/metrics" => ("metrics", self.handle_metrics(req.method())),
                _ => ("other", plain(StatusCode::NOT_FOUND, "not found")),
            }
        };

        record_http(route, response.status().as_u16());
        Ok(response)
    }

    async fn handle_kv<B>(&self, raw_key: &str, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let key = match decode_key(raw_key) {
            Ok(key) => key,
            Err(e) => return error_response(&e),
        };

        let method = req.method().clone();
        match method {
            Method::GET => match self.client.get(key).await {
                Ok(Some(value)) => Response::builder()
                    .status(StatusCode::OK)
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .body(Full::new(value))
                    .expect("static builder never fails"),
                Ok(None) => json_error(StatusCode::NOT_FOUND, "NotFound", "key not found"),
                Err(e) => error_response(&e),
            },
            Method::PUT | Method::POST => {
                let body = Limited::new(req.into_body(), self.max_value_bytes);
                let value = match body.collect().await {
                    Ok(collected) => collected.to_bytes(),
                    Err(e) => {
                        debug!("rejected request body: {e}");
                        return json_error(
                            StatusCode::PAYLOAD_TOO_LARGE,
                            "InvalidRequest",
                            &format!(
                                "value exceeds {} bytes or body was unreadable",
                                self.max_value_bytes
                            ),
                        );
                    }
                };
                match self.client.set(key, value).await {
                    Ok(()) => Response::builder()
                        .status(StatusCode::NO_CONTENT)
                        .body(Full::new(Bytes::new()))
                        .expect("static builder never fails"),
                    Err(e) => error_response(&e),
                }
            }
            _ => method_not_allowed("GET, PUT, POST"),
        }
    }

    fn handle_health(&self, method: &Method) -> Response<Full<Bytes>> {
        if method != Method::GET {
            return method_not_allowed("GET");
        }

        let view = self.client.view();
        let slot_counts = view.slots().slot_counts();
        let nodes = self.client.nodes();
        let primary_down = nodes
            .iter()
            .any(|n| n.role == NodeRole::Primary && n.liveness == Liveness::Down);
        let healthy = !view.is_empty() && !primary_down;

        let nodes_json: Vec<_> = nodes
            .iter()
            .map(|n| {
                serde_json::json!({
                    "id": n.id.as_str(),
                    "role": n.role.to_string(),
                    "liveness": n.liveness.to_string(),
                    "replicates": n.replicates.as_ref().map(|p| p.as_str()),
                    "consecutive_failures": n.consecutive_failures,
                    "slots": slot_counts.get(&n.id).copied().unwrap_or(0),
                })
            })
            .collect();

        let body = serde_json::json!({
            "status": if healthy { "ok" } else { "degraded" },
            "epoch": view.epoch(),
            "node_count": nodes.len(),
            "ranges": view.slots().entries().len(),
            "topology_queries": self.client.topology_queries(),
            "nodes": nodes_json,
        });

        let code = if healthy {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        json(code, &body)
    }

    fn handle_metrics(&self, method: &Method) -> Response<Full<Bytes>> {
        let Some(handle) = &self.metrics else {
            return plain(StatusCode::NOT_FOUND, "not found");
        };
        if method != Method::GET {
            return method_not_allowed("GET");
        }
        Response::builder()
            .header(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")
            .body(Full::new(Bytes::from(handle.render())))
            .expect("static builder never fails")
    }
}

/// HTTP status for a routing failure.
pub fn status_for(err: &ClusterError) -> StatusCode {
    match err {
        ClusterError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ClusterError::NodeUnreachable(_)
        | ClusterError::ClusterUnreachable
        | ClusterError::PoolExhausted(_)
        | ClusterError::TopologyInconsistent(_)
        | ClusterError::RedirectLoop(_)
        | ClusterError::SlotNotAssigned(_)
        | ClusterError::Closed => StatusCode::SERVICE_UNAVAILABLE,
        ClusterError::InvalidRequest(_) | ClusterError::CrossSlot(..) => StatusCode::BAD_REQUEST,
        ClusterError::Store { .. } | ClusterError::Configuration(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(err: &ClusterError) -> Response<Full<Bytes>> {
    let status = status_for(err);
    if status.is_server_error() {
        warn!(kind = err.kind(), error = %err, "request failed");
    }
    json_error(status, err.kind(), &err.to_string())
}

/// Decodes a percent-encoded key from the request path. Malformed
/// escapes such as `%zz` are kept verbatim.
pub fn decode_key(raw: &str) -> Result<Bytes, ClusterError> {
    if raw.is_empty() {
        return Err(ClusterError::InvalidRequest("key must not be empty".into()));
    }
    Ok(Bytes::from(urlencoding::decode_binary(raw.as_bytes()).into_owned()))
}

fn json(status: StatusCode, body: &serde_json::Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .expect("static builder never fails")
}

fn json_error(status: StatusCode, kind: &str, message: &str) -> Response<Full<Bytes>> {
    json(
        status,
        &serde_json::json!({ "error": kind, "message": message }),
    )
}

fn plain(status: StatusCode, text: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from_static(text.as_bytes())))
        .expect("static builder never fails")
}

fn method_not_allowed(allow: &'static str) -> Response<Full<Bytes>> {
    let mut response = json_error(
        StatusCode::METHOD_NOT_ALLOWED,
        "MethodNotAllowed",
        "method not allowed",
    );
    if let Ok(value) = allow.parse() {
        response.headers_mut().insert(ALLOW, value);
    }
    response
}
