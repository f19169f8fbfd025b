//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode client commands and decode server replies incrementally
//! from a growable read buffer, so a connection can feed partial socket reads
//! straight into the decoder.
//!
//! ## Design Principles
//! 1. **Incremental Decoding**: `decode` consumes bytes only once a whole frame
//!    is present; partial frames leave the buffer untouched. `Decoder` also
//!    remembers how far a partial frame was checked, so each read only scans
//!    the new bytes.
//! 2. **Buffer Reuse**: Callers own the encode and decode buffers.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.

use bytes::{Buf, BytesMut};
use thiserror::Error;

/// Largest bulk string the decoder accepts (matches the server default).
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// RESP framing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("line is not terminated by CRLF")]
    MissingCrlf,
    #[error("empty reply line")]
    EmptyLine,
    #[error("invalid integer in reply")]
    InvalidInteger,
    #[error("unexpected reply type byte {0:#04x}")]
    UnexpectedType(u8),
    #[error("bulk length {0} out of range")]
    BulkLength(i64),
}

/// RESP reply value as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// +OK or +PONG style responses.
    Simple(Vec<u8>),
    /// -ERR ... responses.
    Error(Vec<u8>),
    /// :123 responses.
    Integer(i64),
    /// $... bulk strings, with None for null.
    Bulk(Option<Vec<u8>>),
    /// *... arrays, with None for the null array.
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// Returns the error text when this is an error reply.
    pub fn as_error(&self) -> Option<String> {
        match self {
            RespValue::Error(message) => Some(String::from_utf8_lossy(message).into_owned()),
            _ => None,
        }
    }

    /// Serializes the value in RESP2 form.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            RespValue::Simple(text) => {
                out.push(b'+');
                out.extend_from_slice(text);
                out.extend_from_slice(b"\r\n");
            }
            RespValue::Error(text) => {
                out.push(b'-');
                out.extend_from_slice(text);
                out.extend_from_slice(b"\r\n");
            }
            RespValue::Integer(value) => {
                out.push(b':');
                out.extend_from_slice(value.to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            RespValue::Bulk(None) => out.extend_from_slice(b"$-1\r\n"),
            RespValue::Bulk(Some(data)) => {
                out.push(b'$');
                push_usize(out, data.len());
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(data);
                out.extend_from_slice(b"\r\n");
            }
            RespValue::Array(None) => out.extend_from_slice(b"*-1\r\n"),
            RespValue::Array(Some(items)) => {
                out.push(b'*');
                push_usize(out, items.len());
                out.extend_from_slice(b"\r\n");
                for item in items {
                    item.encode(out);
                }
            }
        }
    }
}

/// Encodes a RESP2 array command into the provided buffer.
pub fn encode_command<A: AsRef<[u8]>>(args: &[A], out: &mut Vec<u8>) {
    out.push(b'*');
    push_usize(out, args.len());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        let arg = arg.as_ref();
        out.push(b'$');
        push_usize(out, arg.len());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Decodes one complete value from the front of `buf`.
///
/// Returns `Ok(None)` and leaves `buf` untouched when more bytes are needed.
pub fn decode(buf: &mut BytesMut) -> Result<Option<RespValue>, ProtocolError> {
    match parse_at(&buf[..], 0)? {
        Some((value, consumed)) => {
            buf.advance(consumed);
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Resumable decoder for one stream of replies.
///
/// Completeness is checked incrementally: header lines and bulk payloads
/// already seen are not scanned again on the next read. The value is built
/// once, after the whole frame has arrived.
#[derive(Debug, Default)]
pub struct Decoder {
    /// Bytes of the pending frame already known to be well formed.
    scanned: usize,
    /// Elements each open array still expects, innermost last.
    open: Vec<i64>,
}

impl Decoder {
    pub fn new() -> Self {
        Decoder::default()
    }

    /// Decodes one complete value from the front of `buf`.
    ///
    /// `buf` must only grow at the back between calls that return `Ok(None)`.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RespValue>, ProtocolError> {
        let end = match self.scan(&buf[..]) {
            Ok(Some(end)) => end,
            Ok(None) => return Ok(None),
            Err(err) => {
                self.reset();
                return Err(err);
            }
        };
        self.reset();
        match parse_at(&buf[..end], 0)? {
            Some((value, consumed)) => {
                buf.advance(consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Bytes of a partially received frame that were already checked.
    pub fn pending(&self) -> usize {
        self.scanned
    }

    fn reset(&mut self) {
        self.scanned = 0;
        self.open.clear();
    }

    /// Advances over whole elements. Returns the frame length once complete.
    fn scan(&mut self, data: &[u8]) -> Result<Option<usize>, ProtocolError> {
        loop {
            let (line, next) = match read_line(data, self.scanned)? {
                Some(found) => found,
                None => return Ok(None),
            };
            if line.is_empty() {
                return Err(ProtocolError::EmptyLine);
            }

            let end = match line[0] {
                b'+' | b'-' => next,
                b':' => {
                    parse_i64(&line[1..])?;
                    next
                }
                b'$' => {
                    let len = parse_i64(&line[1..])?;
                    if len < 0 {
                        next
                    } else if len > MAX_BULK_LEN {
                        return Err(ProtocolError::BulkLength(len));
                    } else {
                        let stop = next + len as usize;
                        if data.len() < stop + 2 {
                            return Ok(None);
                        }
                        if &data[stop..stop + 2] != b"\r\n" {
                            return Err(ProtocolError::MissingCrlf);
                        }
                        stop + 2
                    }
                }
                b'*' => {
                    let len = parse_i64(&line[1..])?;
                    if len > 0 {
                        self.open.push(len);
                        self.scanned = next;
                        continue;
                    }
                    next
                }
                other => return Err(ProtocolError::UnexpectedType(other)),
            };
            self.scanned = end;

            // One element finished; close every array it completes.
            loop {
                match self.open.last_mut() {
                    None => return Ok(Some(end)),
                    Some(remaining) => {
                        *remaining -= 1;
                        if *remaining > 0 {
                            break;
                        }
                        self.open.pop();
                    }
                }
            }
        }
    }
}

fn parse_at(data: &[u8], pos: usize) -> Result<Option<(RespValue, usize)>, ProtocolError> {
    let (line, next) = match read_line(data, pos)? {
        Some(found) => found,
        None => return Ok(None),
    };
    if line.is_empty() {
        return Err(ProtocolError::EmptyLine);
    }

    match line[0] {
        b'+' => Ok(Some((RespValue::Simple(line[1..].to_vec()), next))),
        b'-' => Ok(Some((RespValue::Error(line[1..].to_vec()), next))),
        b':' => Ok(Some((RespValue::Integer(parse_i64(&line[1..])?), next))),
        b'$' => {
            let len = parse_i64(&line[1..])?;
            parse_bulk(data, len, next)
        }
        b'*' => {
            let len = parse_i64(&line[1..])?;
            parse_array(data, len, next)
        }
        other => Err(ProtocolError::UnexpectedType(other)),
    }
}

fn parse_bulk(
    data: &[u8],
    len: i64,
    start: usize,
) -> Result<Option<(RespValue, usize)>, ProtocolError> {
    if len < 0 {
        return Ok(Some((RespValue::Bulk(None), start)));
    }
    if len > MAX_BULK_LEN {
        return Err(ProtocolError::BulkLength(len));
    }
    let end = start + len as usize;
    if data.len() < end + 2 {
        return Ok(None);
    }
    if &data[end..end + 2] != b"\r\n" {
        return Err(ProtocolError::MissingCrlf);
    }
    Ok(Some((RespValue::Bulk(Some(data[start..end].to_vec())), end + 2)))
}

fn parse_array(
    data: &[u8],
    len: i64,
    start: usize,
) -> Result<Option<(RespValue, usize)>, ProtocolError> {
    if len < 0 {
        return Ok(Some((RespValue::Array(None), start)));
    }

    // Cap the preallocation; a hostile length must not reserve gigabytes.
    let mut items = Vec::with_capacity((len as usize).min(1024));
    let mut cursor = start;
    for _ in 0..len {
        match parse_at(data, cursor)? {
            Some((item, next)) => {
                items.push(item);
                cursor = next;
            }
            None => return Ok(None),
        }
    }
    Ok(Some((RespValue::Array(Some(items)), cursor)))
}

fn read_line(data: &[u8], pos: usize) -> Result<Option<(&[u8], usize)>, ProtocolError> {
    let rest = &data[pos..];
    let newline = match rest.iter().position(|&b| b == b'\n') {
        Some(idx) => idx,
        None => return Ok(None),
    };
    if newline == 0 || rest[newline - 1] != b'\r' {
        return Err(ProtocolError::MissingCrlf);
    }
    Ok(Some((&rest[..newline - 1], pos + newline + 1)))
}

fn parse_i64(data: &[u8]) -> Result<i64, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::InvalidInteger);
    }
    let (negative, digits) = match data[0] {
        b'-' => (true, &data[1..]),
        _ => (false, data),
    };
    if digits.is_empty() {
        return Err(ProtocolError::InvalidInteger);
    }

    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(ProtocolError::InvalidInteger);
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
    }

    if negative { Ok(-value) } else { Ok(value) }
}

fn push_usize(out: &mut Vec<u8>, mut value: usize) {
    // Write digits into a small stack buffer to avoid heap allocations.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.push(buf[idx]);
    }
}
