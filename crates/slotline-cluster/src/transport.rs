//! Node transport.
//!
//! The routing layer talks to nodes through two traits: a [`Connector`]
//! that opens connections and a [`NodeConnection`] that sends one request
//! and returns its classified [`Reply`]. The RESP implementation here is
//! what production uses; tests substitute an in-memory cluster.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use slotline_protocol::{parse_frame, ErrorReply, Frame, Request};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::topology::{NodeId, TopologyEntry};

/// Errors that can occur during connection operations.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("node disconnected")]
    Disconnected,

    #[error("connect timed out")]
    Timeout,

    /// The node refused a control command (READONLY, ASKING, CLUSTER SLOTS).
    #[error("node rejected request: {0}")]
    Rejected(String),
}

/// A node's answer to a data request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Value(Bytes),
    Ok,
    NotFound,
    Moved { slot: u16, node: NodeId },
    Ask { slot: u16, node: NodeId },
    /// `TRYAGAIN` or `CLUSTERDOWN`.
    TryAgain(String),
    /// Application error such as `WRONGTYPE`.
    Error { kind: String, message: String },
}

impl Reply {
    /// Classifies a reply frame.
    pub fn from_frame(frame: Frame) -> Result<Self, ConnectionError> {
        match frame {
            Frame::Bulk(data) => Ok(Reply::Value(data)),
            Frame::Null => Ok(Reply::NotFound),
            Frame::Simple(s) if s == "OK" => Ok(Reply::Ok),
            Frame::Simple(s) => Ok(Reply::Value(Bytes::from(s))),
            Frame::Integer(n) => Ok(Reply::Value(Bytes::from(n.to_string()))),
            Frame::Error(line) => Ok(match ErrorReply::parse(&line) {
                ErrorReply::Moved { slot, addr } => Reply::Moved {
                    slot,
                    node: redirect_target(&addr)?,
                },
                ErrorReply::Ask { slot, addr } => Reply::Ask {
                    slot,
                    node: redirect_target(&addr)?,
                },
                ErrorReply::TryAgain(message) => Reply::TryAgain(message),
                ErrorReply::Application { kind, message } => Reply::Error { kind, message },
            }),
            other => Err(ConnectionError::Protocol(format!(
                "unexpected reply type: {other:?}"
            ))),
        }
    }
}

fn redirect_target(addr: &str) -> Result<NodeId, ConnectionError> {
    NodeId::parse(addr).map_err(|e| ConnectionError::Protocol(e.to_string()))
}

/// Per-send options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendFlags {
    /// Prefix the request with `ASKING` (following an ASK redirect).
    pub asking: bool,
    /// Put the connection in READONLY mode first (replica reads).
    pub readonly: bool,
}

impl SendFlags {
    pub fn asking() -> Self {
        Self {
            asking: true,
            readonly: false,
        }
    }

    pub fn readonly() -> Self {
        Self {
            asking: false,
            readonly: true,
        }
    }
}

/// An open connection to one node.
#[async_trait]
pub trait NodeConnection: Send {
    /// Sends a data request and returns the node's classified reply.
    async fn send(&mut self, request: &Request, flags: SendFlags) -> Result<Reply, ConnectionError>;

    /// Asks the node for the cluster's slot layout.
    async fn cluster_slots(&mut self) -> Result<Vec<TopologyEntry>, ConnectionError>;
}

/// Opens connections to nodes.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, node: &NodeId) -> Result<Box<dyn NodeConnection>, ConnectionError>;
}

/// Connects to nodes over TCP and speaks RESP.
#[derive(Debug, Clone)]
pub struct RespConnector {
    connect_timeout: Duration,
}

impl RespConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for RespConnector {
    async fn connect(&self, node: &NodeId) -> Result<Box<dyn NodeConnection>, ConnectionError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(node.as_str()))
            .await
            .map_err(|_| ConnectionError::Timeout)??;
        stream.set_nodelay(true)?;
        debug!(node = %node, "connected");
        Ok(Box::new(RespConnection::new(node.clone(), stream)))
    }
}

/// A TCP connection to a node with read/write buffering.
pub struct RespConnection {
    node: NodeId,
    stream: TcpStream,
    read_buf: BytesMut,
    write_buf: BytesMut,
    readonly: bool,
}

impl RespConnection {
    pub fn new(node: NodeId, stream: TcpStream) -> Self {
        Self {
            node,
            stream,
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(4096),
            readonly: false,
        }
    }

    async fn round_trip(&mut self, request: &Request) -> Result<Frame, ConnectionError> {
        self.write_buf.clear();
        request.encode(&mut self.write_buf);
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;
        self.read_response().await
    }

    /// Sends a control command that must answer `+OK`.
    async fn expect_ok(&mut self, request: &Request) -> Result<(), ConnectionError> {
        match self.round_trip(request).await? {
            frame if frame.is_ok() => Ok(()),
            Frame::Error(e) => Err(ConnectionError::Rejected(e)),
            other => Err(ConnectionError::Protocol(format!(
                "unexpected response to {}: {other:?}",
                request.name()
            ))),
        }
    }

    async fn read_response(&mut self) -> Result<Frame, ConnectionError> {
        loop {
            if !self.read_buf.is_empty() {
                match parse_frame(&self.read_buf) {
                    Ok(Some((frame, consumed))) => {
                        let _ = self.read_buf.split_to(consumed);
                        return Ok(frame);
                    }
                    Ok(None) => {}
                    Err(e) => return Err(ConnectionError::Protocol(e.to_string())),
                }
            }

            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(ConnectionError::Disconnected);
            }
        }
    }
}

#[async_trait]
impl NodeConnection for RespConnection {
    async fn send(&mut self, request: &Request, flags: SendFlags) -> Result<Reply, ConnectionError> {
        if flags.readonly && !self.readonly {
            self.expect_ok(&Request::ReadOnly).await?;
            self.readonly = true;
        }
        if flags.asking {
            self.expect_ok(&Request::Asking).await?;
        }
        let frame = self.round_trip(request).await?;
        Reply::from_frame(frame)
    }

    async fn cluster_slots(&mut self) -> Result<Vec<TopologyEntry>, ConnectionError> {
        match self.round_trip(&Request::ClusterSlots).await? {
            Frame::Error(e) => Err(ConnectionError::Rejected(e)),
            frame => parse_cluster_slots(frame, &self.node),
        }
    }
}

/// Decodes a CLUSTER SLOTS reply.
///
/// Each element is `[start, end, primary, replica...]` where a node is
/// `[host, port, id?, ...]`. An empty host means the node that answered.
pub fn parse_cluster_slots(
    frame: Frame,
    queried: &NodeId,
) -> Result<Vec<TopologyEntry>, ConnectionError> {
    let Frame::Array(items) = frame else {
        return Err(malformed("reply is not an array"));
    };

    let mut entries = Vec::with_capacity(items.len());
    for item in items {
        let Frame::Array(parts) = item else {
            return Err(malformed("slot entry is not an array"));
        };
        if parts.len() < 3 {
            return Err(malformed("slot entry has no primary"));
        }
        let mut parts = parts.into_iter();
        let start = slot_bound(parts.next())?;
        let end = slot_bound(parts.next())?;
        let primary = match parts.next() {
            Some(node) => slot_node(node, queried)?,
            None => return Err(malformed("slot entry has no primary")),
        };
        let replicas = parts
            .map(|node| slot_node(node, queried))
            .collect::<Result<Vec<_>, _>>()?;
        entries.push(TopologyEntry {
            start,
            end,
            primary,
            replicas,
        });
    }
    Ok(entries)
}

fn slot_bound(frame: Option<Frame>) -> Result<u16, ConnectionError> {
    frame
        .as_ref()
        .and_then(Frame::as_integer)
        .and_then(|n| u16::try_from(n).ok())
        .ok_or_else(|| malformed("slot bound is not a valid integer"))
}

fn slot_node(frame: Frame, queried: &NodeId) -> Result<NodeId, ConnectionError> {
    let Frame::Array(fields) = frame else {
        return Err(malformed("node is not an array"));
    };
    let host = fields
        .first()
        .and_then(Frame::as_text)
        .ok_or_else(|| malformed("node host missing"))?;
    let port = fields
        .get(1)
        .and_then(Frame::as_integer)
        .and_then(|n| u16::try_from(n).ok())
        .ok_or_else(|| malformed("node port missing"))?;
    let host = if host.is_empty() { queried.host() } else { host };
    Ok(NodeId::new(host, port))
}

fn malformed(what: &str) -> ConnectionError {
    ConnectionError::Protocol(format!("malformed CLUSTER SLOTS reply: {what}"))
}
