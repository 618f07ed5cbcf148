//! Protocol error types for RESP parsing.

use thiserror::Error;

/// Errors that can occur when decoding the RESP wire format.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The buffer doesn't hold a complete frame yet. Internal to the
    /// parser; [`parse_frame`](crate::parse_frame) maps it to `Ok(None)`.
    #[error("incomplete frame: need more data")]
    Incomplete,

    /// The first byte of a frame didn't match any known type prefix.
    #[error("invalid type prefix: {0:#04x}")]
    InvalidPrefix(u8),

    /// An integer line could not be parsed.
    #[error("invalid integer encoding")]
    InvalidInteger,

    /// A length header was negative (other than the RESP2 nil marker -1)
    /// or the payload wasn't terminated by `\r\n`.
    #[error("invalid frame length: {0}")]
    InvalidFrameLength(i64),

    /// A bulk string exceeded the maximum accepted size.
    #[error("bulk string too large: {0} bytes")]
    BulkStringTooLarge(usize),

    /// An aggregate declared more elements than the parser accepts.
    #[error("too many elements in aggregate: {0}")]
    TooManyElements(usize),

    /// Aggregates were nested deeper than the parser accepts.
    #[error("frame nesting exceeds {0} levels")]
    NestingTooDeep(usize),

    /// A simple string or error line wasn't valid UTF-8.
    #[error("invalid utf-8 in {0}")]
    InvalidUtf8(&'static str),

    /// A boolean frame held something other than `t` or `f`.
    #[error("invalid boolean frame")]
    InvalidBoolean,
}
