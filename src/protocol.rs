//! # Cache Text Protocol Codec
//!
//! Framing for the memcached text protocol: CRLF-terminated command and
//! response lines with opaque binary payload blocks.
//!
//! ## Wire Format
//!
//! Storage commands (`add`, `set`, `replace`):
//!
//! ```text
//! <cmd> <key> <flags> <exptime> <bytes>\r\n
//! <payload>\r\n
//! ```
//!
//! with replies `STORED`, `NOT_STORED`, `ERROR`, `CLIENT_ERROR <msg>`, or
//! `SERVER_ERROR <msg>`.
//!
//! Retrieval:
//!
//! ```text
//! get <key>\r\n
//! ```
//!
//! answered by `END` on a miss, or on a hit:
//!
//! ```text
//! VALUE <key> <flags> <bytes>\r\n
//! <payload>\r\n
//! END\r\n
//! ```
//!
//! ## Store Framing
//!
//! The `<bytes>` field of a storage command is unknown until the payload
//! has been encoded, so the frame is built in two phases: a gap sized for
//! the worst-case header is reserved at the front of the buffer, the
//! payload is streamed in right after it, and once the byte count is known
//! the real header is formatted and backfilled into the gap immediately
//! before the payload. The read cursor is then seeked to the header start,
//! leaving one contiguous region to send.

use crate::buffer::Buffer;
use crate::error::{Error, Result};

/// The three storage command variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Store only if the key does not already exist
    Add,
    /// Store unconditionally
    Set,
    /// Store only if the key already exists
    Replace,
}

impl StoreKind {
    /// The command word on the wire.
    pub fn verb(&self) -> &'static str {
        match self {
            StoreKind::Add => "add",
            StoreKind::Set => "set",
            StoreKind::Replace => "replace",
        }
    }
}

/// A decoded server response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// The value was stored
    Stored,
    /// The store condition failed (key present for `add`, absent for
    /// `replace`); a logical negative, not an error
    NotStored,
    /// A hit, with the flags word stored alongside the value
    Found { flags: u32, payload: Vec<u8> },
    /// A miss; a logical negative, not an error
    NotFound,
}

/// Parsed `VALUE` header of a get response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GetHeader {
    Miss,
    Value { flags: u32, len: usize },
}

/// Worst-case header width: the longest command word, the key, three
/// numeric fields at their widest, separators, and the CRLF.
fn header_gap(key_len: usize) -> usize {
    "replace ".len() + key_len + 1 + 10 + 1 + 10 + 1 + 20 + 2
}

/// Encodes a storage command frame into `buf` using the two-phase layout,
/// with `fill` streaming the payload bytes into the buffer. On return the
/// read cursor sits at the start of the coalesced frame; the returned
/// length is exactly what must be sent.
pub(crate) fn encode_store<F>(
    buf: &mut Buffer,
    kind: StoreKind,
    key: &str,
    flags: u32,
    exptime: u32,
    fill: F,
) -> Result<usize>
where
    F: FnOnce(&mut Buffer) -> Result<()>,
{
    let gap = header_gap(key.len());
    buf.skip(gap)?;

    let payload_start = buf.len();
    fill(buf)?;
    let payload_len = buf.len() - payload_start;
    buf.put_slice(b"\r\n")?;

    let header = format!(
        "{} {} {} {} {}\r\n",
        kind.verb(),
        key,
        flags,
        exptime,
        payload_len
    );
    let frame_start = payload_start
        .checked_sub(header.len())
        .ok_or_else(|| Error::buffer("store header exceeds its reserved gap"))?;
    buf.overwrite(frame_start, header.as_bytes())?;
    buf.seek(frame_start)?;
    Ok(buf.len() - frame_start)
}

/// Encodes a `get` command line into `buf`.
pub(crate) fn encode_get(buf: &mut Buffer, key: &str) -> Result<()> {
    buf.put_slice(b"get ")?;
    buf.put_slice(key.as_bytes())?;
    buf.put_slice(b"\r\n")?;
    Ok(())
}

/// Recognizes the three error replies any command may receive. The line is
/// fully consumed, so the connection itself remains usable.
fn error_line(line: &str) -> Option<Error> {
    if line == "ERROR" {
        return Some(Error::protocol("server rejected the command"));
    }
    if let Some(msg) = line.strip_prefix("CLIENT_ERROR ") {
        return Some(Error::protocol(format!("client error: {msg}")));
    }
    if let Some(msg) = line.strip_prefix("SERVER_ERROR ") {
        return Some(Error::protocol(format!("server error: {msg}")));
    }
    None
}

/// Decodes the single-line reply to a storage command.
pub(crate) fn parse_store_reply(line: &str) -> Result<Response> {
    match line {
        "STORED" => Ok(Response::Stored),
        "NOT_STORED" => Ok(Response::NotStored),
        other => match error_line(other) {
            Some(err) => Err(err),
            None => Err(Error::invalid_response(format!(
                "unexpected reply to store command: '{other}'"
            ))),
        },
    }
}

/// Decodes the first line of a get response. A `VALUE` header must echo
/// the requested key and carry exactly two base-10 integer fields; parse
/// failures are explicit, so a legitimate zero field is never mistaken for
/// one.
pub(crate) fn parse_value_header(line: &str, key: &str) -> Result<GetHeader> {
    if line == "END" {
        return Ok(GetHeader::Miss);
    }
    if let Some(err) = error_line(line) {
        return Err(err);
    }
    let rest = line.strip_prefix("VALUE ").ok_or_else(|| {
        Error::invalid_response(format!("unexpected reply to get command: '{line}'"))
    })?;

    let mut fields = rest.split(' ');
    let echoed = fields.next().unwrap_or("");
    if echoed != key {
        return Err(Error::invalid_response(format!(
            "server answered for key '{echoed}', expected '{key}'"
        )));
    }
    let flags: u32 = fields
        .next()
        .ok_or_else(|| Error::invalid_response("VALUE header is missing the flags field"))?
        .parse()
        .map_err(|_| Error::invalid_response("VALUE header has a non-numeric flags field"))?;
    let len: usize = fields
        .next()
        .ok_or_else(|| Error::invalid_response("VALUE header is missing the byte count"))?
        .parse()
        .map_err(|_| Error::invalid_response("VALUE header has a non-numeric byte count"))?;
    if fields.next().is_some() {
        return Err(Error::invalid_response(
            "VALUE header carries trailing fields",
        ));
    }
    Ok(GetHeader::Value { flags, len })
}
