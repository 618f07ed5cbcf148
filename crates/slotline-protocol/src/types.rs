//! RESP frame types.
//!
//! A [`Frame`] is one decoded reply value. RESP2 and RESP3 replies decode
//! into the same enum: RESP2 nil bulk strings and nil arrays both become
//! [`Frame::Null`], and RESP3 sets are folded into [`Frame::Array`].

use bytes::Bytes;

/// A single RESP protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Simple status string, e.g. `+OK\r\n`.
    Simple(String),

    /// Error reply, e.g. `-MOVED 3999 10.0.0.2:6379\r\n`.
    Error(String),

    /// 64-bit signed integer, e.g. `:42\r\n`.
    Integer(i64),

    /// Binary-safe bulk string, e.g. `$5\r\nhello\r\n`.
    Bulk(Bytes),

    /// Ordered array, e.g. `*2\r\n:1\r\n:2\r\n`. RESP3 sets (`~`) land here too.
    Array(Vec<Frame>),

    /// Nil: RESP3 `_\r\n`, or RESP2 `$-1\r\n` / `*-1\r\n`.
    Null,

    /// RESP3 boolean, e.g. `#t\r\n`.
    Boolean(bool),

    /// RESP3 map of key-value pairs, e.g. `%1\r\n+key\r\n:1\r\n`.
    Map(Vec<(Frame, Frame)>),
}

impl Frame {
    /// Returns `true` if this frame is a nil value.
    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null)
    }

    /// Returns `true` for the `+OK` status reply.
    pub fn is_ok(&self) -> bool {
        matches!(self, Frame::Simple(s) if s == "OK")
    }

    /// Borrows the payload of a bulk or simple string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Frame::Bulk(b) => Some(b),
            Frame::Simple(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Returns the payload of a bulk or simple string as UTF-8 text.
    pub fn as_text(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Returns the value of an integer frame.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Frame::Integer(n) => Some(*n),
            _ => None,
        }
    }
}
