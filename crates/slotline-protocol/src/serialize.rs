//! Direct-to-buffer RESP serialization.
//!
//! Clients only ever send arrays of bulk strings, so [`encode_command`]
//! writes that shape straight from argument slices without building
//! intermediate frames. [`Frame::serialize`] covers everything else
//! (mock servers in tests, diagnostics).

use bytes::{BufMut, BytesMut};

use crate::types::Frame;

/// Writes `args` as a RESP array of bulk strings.
pub fn encode_command<A: AsRef<[u8]>>(args: &[A], dst: &mut BytesMut) {
    dst.put_u8(b'*');
    write_len(args.len(), dst);
    for arg in args {
        let arg = arg.as_ref();
        dst.put_u8(b'$');
        write_len(arg.len(), dst);
        dst.put_slice(arg);
        dst.put_slice(b"\r\n");
    }
}

impl Frame {
    /// Serializes this frame into `dst` using RESP3 encodings.
    pub fn serialize(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(s) => line(b'+', s.as_bytes(), dst),
            Frame::Error(msg) => line(b'-', msg.as_bytes(), dst),
            Frame::Integer(n) => {
                let mut buf = itoa::Buffer::new();
                line(b':', buf.format(*n).as_bytes(), dst);
            }
            Frame::Bulk(data) => {
                dst.put_u8(b'$');
                write_len(data.len(), dst);
                dst.put_slice(data);
                dst.put_slice(b"\r\n");
            }
            Frame::Array(items) => {
                dst.put_u8(b'*');
                write_len(items.len(), dst);
                for item in items {
                    item.serialize(dst);
                }
            }
            Frame::Null => dst.put_slice(b"_\r\n"),
            Frame::Boolean(b) => dst.put_slice(if *b { b"#t\r\n" } else { b"#f\r\n" }),
            Frame::Map(pairs) => {
                dst.put_u8(b'%');
                write_len(pairs.len(), dst);
                for (key, val) in pairs {
                    key.serialize(dst);
                    val.serialize(dst);
                }
            }
        }
    }
}

fn line(prefix: u8, body: &[u8], dst: &mut BytesMut) {
    dst.put_u8(prefix);
    dst.put_slice(body);
    dst.put_slice(b"\r\n");
}

fn write_len(len: usize, dst: &mut BytesMut) {
    let mut buf = itoa::Buffer::new();
    dst.put_slice(buf.format(len).as_bytes());
    dst.put_slice(b"\r\n");
}
