/*!
 * Redis RESP Protocol Implementation
 *
 * This module implements the subset of the Redis Serialization Protocol (RESP2
 * plus the RESP3 map and null types) that kvloop speaks. It provides an
 * incremental buffer parser, a streaming reader that yields one value at a
 * time, and encoders for every reply shape the dispatcher produces.
 */

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::{ErrorKind, Read};

/// Size of the read buffer used by [`FrameReader`]
const READ_BUF: usize = 4096;

/// Largest bulk string accepted from a client (same ceiling as Redis)
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Nesting limit for arrays and maps
const MAX_DEPTH: usize = 32;

/// Longest simple string or error line accepted, CRLF excluded
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// A single RESP value
///
/// Requests arrive as arrays of bulk strings; replies are built from the
/// scalar variants and `Map`.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// +OK\r\n
    Simple(String),
    /// -ERR message\r\n
    Error(String),
    /// :42\r\n
    Integer(i64),
    /// $3\r\nfoo\r\n
    Bulk(Bytes),
    /// $-1\r\n, *-1\r\n or _\r\n
    Null,
    /// *2\r\n...
    Array(Vec<Frame>),
    /// %1\r\n<key><value>
    Map(Vec<(Frame, Frame)>),
}

impl Frame {
    /// Encode this value onto `out`
    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            Frame::Simple(s) => write_simple(s, out),
            Frame::Error(s) => write_error(s, out),
            Frame::Integer(i) => write_integer(*i, out),
            Frame::Bulk(b) => write_bulk(b, out),
            Frame::Null => write_null(out),
            Frame::Array(items) => {
                write_array_len(items.len(), out);
                for item in items {
                    item.encode(out);
                }
            }
            Frame::Map(pairs) => {
                write_map_len(pairs.len(), out);
                for (k, v) in pairs {
                    k.encode(out);
                    v.encode(out);
                }
            }
        }
    }

    /// Raw bytes of a scalar frame, if it has any
    ///
    /// Integers are rendered in decimal so that `SET n 1` works whether the
    /// client sent the value as a bulk string or an integer.
    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            Frame::Bulk(b) => Some(b),
            Frame::Simple(s) => Some(Bytes::from(s)),
            Frame::Integer(i) => Some(Bytes::from(i.to_string())),
            _ => None,
        }
    }
}

/// Parse a single RESP value from byte data
///
/// # Returns
/// * `Ok(Some((consumed_bytes, frame)))` - Successfully parsed value
/// * `Ok(None)` - Incomplete data, need more bytes
/// * `Err(...)` - Malformed input
pub fn parse_frame(data: &[u8]) -> Result<Option<(usize, Frame)>, ProtocolError> {
    parse_at(data, 0)
}

fn parse_at(data: &[u8], depth: usize) -> Result<Option<(usize, Frame)>, ProtocolError> {
    if data.is_empty() {
        return Ok(None);
    }
    if depth > MAX_DEPTH {
        return Err(invalid("nesting too deep"));
    }

    let body = &data[1..];
    match data[0] {
        b'+' | b'-' => {
            // Only the first MAX_LINE_LEN + 2 bytes can hold a legal terminator
            let window = &body[..body.len().min(MAX_LINE_LEN + 2)];
            let end = match find_crlf(window) {
                Some(end) => end,
                None if body.len() > MAX_LINE_LEN + 1 => {
                    return Err(invalid("line too long"));
                }
                None => return Ok(None),
            };
            let text = std::str::from_utf8(&body[..end])
                .map_err(|_| invalid("simple string is not valid utf-8"))?
                .to_string();
            let frame = if data[0] == b'+' {
                Frame::Simple(text)
            } else {
                Frame::Error(text)
            };
            Ok(Some((1 + end + 2, frame)))
        }
        b':' => match read_decimal_line(body)? {
            Some((i, n)) => Ok(Some((1 + i, Frame::Integer(n)))),
            None => Ok(None),
        },
        b'_' => match body {
            [b'\r', b'\n', ..] => Ok(Some((3, Frame::Null))),
            [] | [b'\r'] => Ok(None),
            _ => Err(invalid("expected CRLF after null")),
        },
        b'$' => {
            let Some((i, len)) = read_decimal_line(body)? else {
                return Ok(None);
            };
            let cursor = 1 + i;
            if len == -1 {
                return Ok(Some((cursor, Frame::Null)));
            }
            if !(0..=MAX_BULK_LEN).contains(&len) {
                return Err(invalid("invalid bulk length"));
            }

            // Payload plus trailing \r\n
            let len = len as usize;
            if cursor + len + 2 > data.len() {
                return Ok(None);
            }
            if &data[cursor + len..cursor + len + 2] != b"\r\n" {
                return Err(invalid("bulk string not terminated by CRLF"));
            }
            let payload = Bytes::copy_from_slice(&data[cursor..cursor + len]);
            Ok(Some((cursor + len + 2, Frame::Bulk(payload))))
        }
        b'*' | b'%' => {
            let Some((i, n)) = read_decimal_line(body)? else {
                return Ok(None);
            };
            let mut cursor = 1 + i;
            if n == -1 && data[0] == b'*' {
                return Ok(Some((cursor, Frame::Null)));
            }
            if n < 0 || n > MAX_BULK_LEN {
                return Err(invalid("invalid aggregate length"));
            }

            // Maps carry two values per entry
            let count = if data[0] == b'%' { n as usize * 2 } else { n as usize };

            // Cap pre-allocation; a hostile length must not reserve memory up front
            let mut items = Vec::with_capacity(count.min(64));
            for _ in 0..count {
                match parse_at(&data[cursor..], depth + 1)? {
                    Some((used, item)) => {
                        cursor += used;
                        items.push(item);
                    }
                    None => return Ok(None),
                }
            }

            let frame = if data[0] == b'*' {
                Frame::Array(items)
            } else {
                let mut pairs = Vec::with_capacity(items.len() / 2);
                let mut it = items.into_iter();
                while let (Some(k), Some(v)) = (it.next(), it.next()) {
                    pairs.push((k, v));
                }
                Frame::Map(pairs)
            };
            Ok(Some((cursor, frame)))
        }
        other => Err(invalid(&format!("unexpected type byte 0x{:02x}", other))),
    }
}

/// Read a decimal number followed by \r\n
///
/// Helper function to parse RESP numeric fields like array lengths,
/// bulk string lengths and integers.
///
/// # Returns
/// * `Some((bytes_consumed, parsed_number))`, or `None` if incomplete
fn read_decimal_line(s: &[u8]) -> Result<Option<(usize, i64)>, ProtocolError> {
    let mut i = 0;
    let mut sign: i64 = 1;
    let mut num: i64 = 0;

    if i < s.len() && s[i] == b'-' {
        sign = -1;
        i += 1;
    }

    let start = i;
    while i < s.len() && s[i].is_ascii_digit() {
        num = num
            .checked_mul(10)
            .and_then(|n| n.checked_add((s[i] - b'0') as i64))
            .ok_or_else(|| invalid("number out of range"))?;
        i += 1;
    }

    if i + 1 >= s.len() {
        // Incomplete
        return Ok(None);
    }
    if i == start {
        return Err(invalid("expected digits"));
    }
    if s[i] != b'\r' || s[i + 1] != b'\n' {
        return Err(invalid("expected CRLF"));
    }
    Ok(Some((i + 2, num * sign)))
}

#[inline]
fn find_crlf(s: &[u8]) -> Option<usize> {
    s.windows(2).position(|w| w == b"\r\n")
}

fn invalid(msg: &str) -> ProtocolError {
    ProtocolError::Invalid(msg.to_string())
}

/// Streaming decoder yielding one RESP value at a time
///
/// Wraps any byte source (a `TcpStream` in the server) and buffers partial
/// input until a complete value is available.
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_BUF),
        }
    }

    /// Read the next complete value
    ///
    /// # Returns
    /// * `Ok(Some(frame))` - A value was decoded
    /// * `Ok(None)` - The stream ended cleanly between values
    /// * `Err(ProtocolError::Incomplete)` - The stream ended inside a value
    pub fn read_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        let mut tmp = [0u8; READ_BUF];
        loop {
            if let Some((consumed, frame)) = parse_frame(&self.buf)? {
                self.buf.advance(consumed);
                return Ok(Some(frame));
            }

            let n = match self.inner.read(&mut tmp) {
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                return if self.buf.is_empty() {
                    Ok(None)
                } else {
                    Err(ProtocolError::Incomplete)
                };
            }
            self.buf.extend_from_slice(&tmp[..n]);
        }
    }
}

//
// RESP Response Encoders
//
// These functions append RESP-encoded values to an output buffer.
//

/// Encode a simple string response (+OK\r\n)
pub fn write_simple(s: &str, out: &mut BytesMut) {
    write_simple_bytes(s.as_bytes(), out);
}

/// Encode raw bytes as a simple string
///
/// The caller must ensure `b` contains no CR or LF.
pub fn write_simple_bytes(b: &[u8], out: &mut BytesMut) {
    out.reserve(b.len() + 3);
    out.put_u8(b'+');
    out.extend_from_slice(b);
    out.extend_from_slice(b"\r\n");
}

/// Encode an error response (-ERR message\r\n)
pub fn write_error(s: &str, out: &mut BytesMut) {
    out.reserve(s.len() + 3);
    out.put_u8(b'-');
    out.extend_from_slice(s.as_bytes());
    out.extend_from_slice(b"\r\n");
}

/// Encode a bulk string response ($<len>\r\n<data>\r\n)
pub fn write_bulk(b: &[u8], out: &mut BytesMut) {
    let len_str = b.len().to_string();
    out.reserve(1 + len_str.len() + 2 + b.len() + 2);
    out.put_u8(b'$');
    out.extend_from_slice(len_str.as_bytes());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(b);
    out.extend_from_slice(b"\r\n");
}

/// Encode a null response ($-1\r\n)
pub fn write_null(out: &mut BytesMut) {
    out.extend_from_slice(b"$-1\r\n");
}

/// Encode an integer response (:<number>\r\n)
pub fn write_integer(i: i64, out: &mut BytesMut) {
    write_header(b':', i, out);
}

/// Encode an array header (*<count>\r\n); elements follow
pub fn write_array_len(n: usize, out: &mut BytesMut) {
    write_header(b'*', n as i64, out);
}

/// Encode a RESP3 map header (%<count>\r\n); key/value pairs follow
pub fn write_map_len(n: usize, out: &mut BytesMut) {
    write_header(b'%', n as i64, out);
}

/// Encode a request as an array of bulk strings
///
/// This is the shape clients send, e.g. `["set", "foo", "bar"]`.
pub fn write_command(args: &[&[u8]], out: &mut BytesMut) {
    write_array_len(args.len(), out);
    for arg in args {
        write_bulk(arg, out);
    }
}

#[inline]
fn write_header(tag: u8, n: i64, out: &mut BytesMut) {
    let s = n.to_string();
    out.reserve(1 + s.len() + 2);
    out.put_u8(tag);
    out.extend_from_slice(s.as_bytes());
    out.extend_from_slice(b"\r\n");
}
