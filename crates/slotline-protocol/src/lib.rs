//! slotline-protocol: the RESP wire format as seen from a cluster client.
//!
//! Provides frame types, a parser that accepts both RESP2 replies (the
//! default for Redis-compatible servers) and RESP3 frames, direct-to-buffer
//! serialization, client request encoding, and classification of the
//! error replies a cluster node uses to redirect clients.
//!
//! # quick start
//!
//! ```
//! use bytes::BytesMut;
//! use slotline_protocol::{parse_frame, Frame, Request};
//!
//! // encode a request
//! let mut buf = BytesMut::new();
//! Request::get("user:{42}").encode(&mut buf);
//! assert_eq!(&buf[..], b"*2\r\n$3\r\nGET\r\n$9\r\nuser:{42}\r\n");
//!
//! // parse a RESP2 nil reply
//! let (frame, consumed) = parse_frame(b"$-1\r\n").unwrap().unwrap();
//! assert_eq!(frame, Frame::Null);
//! assert_eq!(consumed, 5);
//! ```

pub mod command;
pub mod error;
pub mod parse;
pub mod reply;
mod serialize;
pub mod types;

pub use command::Request;
pub use error::ProtocolError;
pub use parse::parse_frame;
pub use reply::ErrorReply;
pub use serialize::encode_command;
pub use types::Frame;
