//! Client requests.
//!
//! [`Request`] is the set of commands the routing layer sends to a node:
//! the two data commands and the cluster control commands that redirect
//! handling and topology discovery need.

use bytes::{Bytes, BytesMut};

use crate::serialize::encode_command;

/// A request addressed to a single cluster node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// GET <key>.
    Get { key: Bytes },

    /// SET <key> <value>.
    Set { key: Bytes, value: Bytes },

    /// ASKING. Precedes a command sent to the target of an ASK redirect.
    Asking,

    /// READONLY. Lets a replica serve reads on this connection.
    ReadOnly,

    /// CLUSTER SLOTS. The topology query.
    ClusterSlots,
}

impl Request {
    /// Builds a GET request.
    pub fn get(key: impl Into<Bytes>) -> Self {
        Request::Get { key: key.into() }
    }

    /// Builds a SET request.
    pub fn set(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Request::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    /// The key this request routes on, if any.
    pub fn key(&self) -> Option<&[u8]> {
        match self {
            Request::Get { key } | Request::Set { key, .. } => Some(&key[..]),
            Request::Asking | Request::ReadOnly | Request::ClusterSlots => None,
        }
    }

    /// Returns true if a replica may serve this request.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Request::Get { .. } | Request::ClusterSlots)
    }

    /// Upper-case command name, used for logs and metric labels.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Get { .. } => "GET",
            Request::Set { .. } => "SET",
            Request::Asking => "ASKING",
            Request::ReadOnly => "READONLY",
            Request::ClusterSlots => "CLUSTER SLOTS",
        }
    }

    /// Appends the wire encoding of this request to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Request::Get { key } => encode_command(&[&b"GET"[..], &key[..]], dst),
            Request::Set { key, value } => {
                encode_command(&[&b"SET"[..], &key[..], &value[..]], dst)
            }
            Request::Asking => encode_command(&["ASKING"], dst),
            Request::ReadOnly => encode_command(&["READONLY"], dst),
            Request::ClusterSlots => encode_command(&["CLUSTER", "SLOTS"], dst),
        }
    }
}
