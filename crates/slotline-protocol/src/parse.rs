//! Single-pass RESP reply parser.
//!
//! Works on a borrowed byte slice; the caller owns the read buffer and
//! retries once more bytes arrive. Nothing is consumed until a whole frame
//! has been decoded, so a partial frame costs one re-scan, never a corrupt
//! buffer.
//!
//! Servers speak RESP2 unless a client negotiates `HELLO 3`, so the parser
//! accepts both: `$-1` and `*-1` decode to [`Frame::Null`] alongside the
//! RESP3 `_` marker.

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::types::Frame;

/// Maximum nesting depth for arrays, sets and maps.
const MAX_NESTING_DEPTH: usize = 64;

/// Maximum number of elements in one aggregate.
const MAX_AGGREGATE_LEN: usize = 1_048_576;

/// Maximum bulk string length (512 MB, matching Redis).
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Upper bound on `Vec::with_capacity` for declared aggregate lengths, so a
/// hostile header can't force a huge allocation before any element arrives.
const PREALLOC_CAP: usize = 1024;

/// Parses one frame from the front of `buf`.
///
/// Returns `Ok(Some((frame, consumed)))` when a full frame is present,
/// `Ok(None)` when more bytes are needed, and `Err` on malformed input.
pub fn parse_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>, ProtocolError> {
    if buf.is_empty() {
        return Ok(None);
    }

    let mut decoder = Decoder { buf, pos: 0 };
    match decoder.frame(0) {
        Ok(frame) => Ok(Some((frame, decoder.pos))),
        Err(ProtocolError::Incomplete) => Ok(None),
        Err(e) => Err(e),
    }
}

struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn frame(&mut self, depth: usize) -> Result<Frame, ProtocolError> {
        let prefix = self.byte()?;
        match prefix {
            b'+' => Ok(Frame::Simple(self.text_line("simple string")?)),
            b'-' => Ok(Frame::Error(self.text_line("error reply")?)),
            b':' => Ok(Frame::Integer(self.integer_line()?)),
            b'$' => self.bulk(),
            b'*' | b'~' => {
                let Some(len) = self.aggregate_len(depth)? else {
                    return Ok(Frame::Null);
                };
                let mut items = Vec::with_capacity(len.min(PREALLOC_CAP));
                for _ in 0..len {
                    items.push(self.frame(depth + 1)?);
                }
                Ok(Frame::Array(items))
            }
            b'%' => {
                let Some(len) = self.aggregate_len(depth)? else {
                    return Ok(Frame::Null);
                };
                let mut pairs = Vec::with_capacity(len.min(PREALLOC_CAP));
                for _ in 0..len {
                    let key = self.frame(depth + 1)?;
                    let val = self.frame(depth + 1)?;
                    pairs.push((key, val));
                }
                Ok(Frame::Map(pairs))
            }
            b'_' => {
                self.line()?;
                Ok(Frame::Null)
            }
            b'#' => match self.line()? {
                b"t" => Ok(Frame::Boolean(true)),
                b"f" => Ok(Frame::Boolean(false)),
                _ => Err(ProtocolError::InvalidBoolean),
            },
            other => Err(ProtocolError::InvalidPrefix(other)),
        }
    }

    fn bulk(&mut self) -> Result<Frame, ProtocolError> {
        let len = self.integer_line()?;
        if len == -1 {
            return Ok(Frame::Null);
        }
        if len < 0 {
            return Err(ProtocolError::InvalidFrameLength(len));
        }
        let len = len as usize;
        if len > MAX_BULK_LEN {
            return Err(ProtocolError::BulkStringTooLarge(len));
        }

        let start = self.pos;
        let end = start + len;
        if self.buf.len() < end + 2 {
            return Err(ProtocolError::Incomplete);
        }
        if &self.buf[end..end + 2] != b"\r\n" {
            return Err(ProtocolError::InvalidFrameLength(len as i64));
        }
        self.pos = end + 2;
        Ok(Frame::Bulk(Bytes::copy_from_slice(&self.buf[start..end])))
    }

    /// Reads an aggregate length header. `None` means a RESP2 nil aggregate.
    fn aggregate_len(&mut self, depth: usize) -> Result<Option<usize>, ProtocolError> {
        if depth + 1 > MAX_NESTING_DEPTH {
            return Err(ProtocolError::NestingTooDeep(MAX_NESTING_DEPTH));
        }
        let len = self.integer_line()?;
        if len == -1 {
            return Ok(None);
        }
        if len < 0 {
            return Err(ProtocolError::InvalidFrameLength(len));
        }
        let len = len as usize;
        if len > MAX_AGGREGATE_LEN {
            return Err(ProtocolError::TooManyElements(len));
        }
        Ok(Some(len))
    }

    fn byte(&mut self) -> Result<u8, ProtocolError> {
        let b = *self.buf.get(self.pos).ok_or(ProtocolError::Incomplete)?;
        self.pos += 1;
        Ok(b)
    }

    /// Returns the bytes up to the next `\r\n` and moves past it.
    fn line(&mut self) -> Result<&'a [u8], ProtocolError> {
        let buf: &'a [u8] = self.buf;
        let start = self.pos;
        let mut from = start;
        while let Some(offset) = memchr::memchr(b'\r', &buf[from..]) {
            let cr = from + offset;
            match buf.get(cr + 1) {
                Some(b'\n') => {
                    self.pos = cr + 2;
                    return Ok(&buf[start..cr]);
                }
                Some(_) => from = cr + 1,
                None => break,
            }
        }
        Err(ProtocolError::Incomplete)
    }

    fn text_line(&mut self, what: &'static str) -> Result<String, ProtocolError> {
        let line = self.line()?;
        std::str::from_utf8(line)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidUtf8(what))
    }

    fn integer_line(&mut self) -> Result<i64, ProtocolError> {
        parse_i64(self.line()?)
    }
}

/// Parses a decimal i64 without going through `str`.
///
/// Negative values accumulate downwards so `i64::MIN` doesn't overflow.
fn parse_i64(digits: &[u8]) -> Result<i64, ProtocolError> {
    let (negative, digits) = match digits.split_first() {
        Some((b'-', rest)) => (true, rest),
        Some(_) => (false, digits),
        None => return Err(ProtocolError::InvalidInteger),
    };
    if digits.is_empty() {
        return Err(ProtocolError::InvalidInteger);
    }

    digits.iter().try_fold(0i64, |acc, &b| {
        if !b.is_ascii_digit() {
            return Err(ProtocolError::InvalidInteger);
        }
        let d = (b - b'0') as i64;
        let next = acc.checked_mul(10).and_then(|n| {
            if negative {
                n.checked_sub(d)
            } else {
                n.checked_add(d)
            }
        });
        next.ok_or(ProtocolError::InvalidInteger)
    })
}
