//! Growable byte buffer with independent read and write cursors.
//!
//! A `Buffer` is the staging area between the protocol codec and a socket.
//! Outbound commands are encoded into it and drained to the wire; inbound
//! responses are read into it and consumed line-by-line or as fixed-length
//! payload blocks. The socket only ever delivers partial data per call, so
//! every read operation here loops, appending at the write cursor and
//! scanning only the newly arrived bytes.
//!
//! Capacity is always a power of two, never below 4 KiB, and only ever
//! grows. The read cursor trails the write cursor at all times.

use std::io::{self, Read, Write};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::sock::is_timeout;

/// Buffers never shrink below 2^12 bytes.
const MIN_CAPACITY: usize = 1 << 12;

/// Growable staging buffer with a write cursor (`count`) marking the end of
/// buffered data and a read cursor (`curpos`) marking how much of it has
/// been consumed.
pub(crate) struct Buffer {
    data: Vec<u8>,
    count: usize,
    curpos: usize,
}

fn round_power_two(n: usize) -> Result<usize> {
    n.max(MIN_CAPACITY)
        .checked_next_power_of_two()
        .ok_or_else(|| Error::buffer("requested capacity overflows usize"))
}

fn find_newline(haystack: &[u8]) -> Option<usize> {
    haystack.iter().position(|&b| b == b'\n')
}

impl Buffer {
    /// Allocates a zeroed buffer whose capacity is `min_capacity` rounded up
    /// to the next power of two, at least 4 KiB.
    pub fn with_capacity(min_capacity: usize) -> Result<Buffer> {
        let cap = round_power_two(min_capacity)?;
        let mut data = Vec::new();
        data.try_reserve_exact(cap)
            .map_err(|_| Error::buffer(format!("cannot allocate {cap}-byte buffer")))?;
        data.resize(cap, 0);
        Ok(Buffer {
            data,
            count: 0,
            curpos: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes written so far (the write cursor).
    pub fn len(&self) -> usize {
        self.count
    }

    /// Bytes consumed so far (the read cursor).
    pub fn pos(&self) -> usize {
        self.curpos
    }

    /// Bytes written but not yet consumed.
    pub fn unread(&self) -> usize {
        self.count - self.curpos
    }

    /// Grows the buffer to the next power of two >= `needed`. Growth never
    /// shrinks and allocation failure propagates as an error rather than
    /// aborting the process.
    pub fn ensure_capacity(&mut self, needed: usize) -> Result<()> {
        if needed <= self.capacity() {
            return Ok(());
        }
        let new_cap = round_power_two(needed)?;
        let grow = new_cap - self.capacity();
        self.data
            .try_reserve_exact(grow)
            .map_err(|_| Error::buffer(format!("cannot grow buffer to {new_cap} bytes")))?;
        self.data.resize(new_cap, 0);
        Ok(())
    }

    /// Appends one byte at the write cursor, growing if needed.
    pub fn put_u8(&mut self, byte: u8) -> Result<()> {
        self.ensure_capacity(self.count + 1)?;
        self.data[self.count] = byte;
        self.count += 1;
        Ok(())
    }

    /// Appends a slice at the write cursor, growing if needed.
    pub fn put_slice(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_capacity(self.count + bytes.len())?;
        self.data[self.count..self.count + bytes.len()].copy_from_slice(bytes);
        self.count += bytes.len();
        Ok(())
    }

    /// Advances the write cursor over `n` zeroed bytes, reserving a gap that
    /// can be filled later with [`overwrite`](Buffer::overwrite).
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.ensure_capacity(self.count + n)?;
        self.count += n;
        Ok(())
    }

    /// Writes `bytes` at absolute position `pos` without moving the write
    /// cursor. The target region must already lie below the write cursor.
    pub fn overwrite(&mut self, pos: usize, bytes: &[u8]) -> Result<()> {
        let end = pos
            .checked_add(bytes.len())
            .ok_or_else(|| Error::buffer("overwrite position overflows"))?;
        if end > self.count {
            return Err(Error::buffer(format!(
                "overwrite of {} bytes at {pos} passes the write cursor ({})",
                bytes.len(),
                self.count
            )));
        }
        self.data[pos..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Moves the read cursor to an absolute position within capacity.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.capacity() {
            return Err(Error::buffer(format!(
                "seek to {pos} outside capacity {}",
                self.capacity()
            )));
        }
        self.curpos = pos;
        Ok(())
    }

    /// Reads one `\n`-terminated line, pulling more bytes from `conn` as
    /// needed. Returns the line with its terminator (and a preceding `\r`,
    /// if any) stripped, and advances the read cursor past it.
    ///
    /// Each socket read appends at the write cursor and only the newly
    /// arrived bytes are scanned for the terminator. If capacity fills up
    /// without one, the line is too long for this buffer and the call fails.
    pub fn read_line<R: Read>(&mut self, conn: &mut R) -> Result<&str> {
        let start = self.curpos;
        let mut scan_from = self.curpos;
        let newline = loop {
            if let Some(offset) = find_newline(&self.data[scan_from..self.count]) {
                break scan_from + offset;
            }
            scan_from = self.count;
            if self.count == self.capacity() {
                return Err(Error::buffer(format!(
                    "no line terminator within {} bytes of capacity",
                    self.capacity()
                )));
            }
            match conn.read(&mut self.data[self.count..]) {
                Ok(0) => return Err(Error::connection("connection closed mid-line")),
                Ok(n) => self.count += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if is_timeout(&e) => {
                    return Err(Error::timeout("timed out waiting for a response line"))
                }
                Err(e) => return Err(Error::io(e)),
            }
        };
        self.curpos = newline + 1;
        let mut line = &self.data[start..newline];
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }
        std::str::from_utf8(line)
            .map_err(|_| Error::invalid_response("response line is not valid UTF-8"))
    }

    /// Reads exactly `n` bytes, pulling more from `conn` as needed, and
    /// advances the read cursor past them. The caller is responsible for
    /// growing the buffer first; running out of capacity here is an error,
    /// not a resize.
    pub fn read_exact<R: Read>(&mut self, conn: &mut R, n: usize) -> Result<&[u8]> {
        while self.count - self.curpos < n {
            if self.count == self.capacity() {
                return Err(Error::buffer(format!(
                    "capacity exhausted with {} of {n} bytes buffered",
                    self.count - self.curpos
                )));
            }
            match conn.read(&mut self.data[self.count..]) {
                Ok(0) => return Err(Error::connection("connection closed mid-payload")),
                Ok(read) => self.count += read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if is_timeout(&e) => {
                    return Err(Error::timeout(format!(
                        "timed out with {} of {n} payload bytes received",
                        self.count - self.curpos
                    )))
                }
                Err(e) => return Err(Error::io(e)),
            }
        }
        let start = self.curpos;
        self.curpos += n;
        Ok(&self.data[start..start + n])
    }

    /// Writes one buffered line (terminator inclusive) to `conn` and
    /// advances the read cursor past it. Having no terminated line buffered
    /// is a framing bug, reported distinctly from socket failures.
    pub fn write_line<W: Write>(&mut self, conn: &mut W) -> Result<usize> {
        let len = find_newline(&self.data[self.curpos..self.count])
            .map(|offset| offset + 1)
            .ok_or_else(|| Error::buffer("no terminated line buffered to write"))?;
        write_fully(conn, &self.data[self.curpos..self.curpos + len])?;
        self.curpos += len;
        Ok(len)
    }

    /// Writes exactly `n` unread bytes to `conn` and advances the read
    /// cursor. Asking for more than is buffered performs no I/O at all.
    pub fn write_exact<W: Write>(&mut self, conn: &mut W, n: usize) -> Result<usize> {
        if self.count < self.curpos + n {
            return Err(Error::buffer(format!(
                "write of {n} bytes requested with only {} buffered",
                self.unread()
            )));
        }
        write_fully(conn, &self.data[self.curpos..self.curpos + n])?;
        self.curpos += n;
        Ok(n)
    }

    /// Async counterpart of [`read_line`](Buffer::read_line). Timeouts are
    /// the caller's concern (the async client bounds whole operations).
    pub async fn read_line_async<R>(&mut self, conn: &mut R) -> Result<&str>
    where
        R: AsyncRead + Unpin,
    {
        let start = self.curpos;
        let mut scan_from = self.curpos;
        let newline = loop {
            if let Some(offset) = find_newline(&self.data[scan_from..self.count]) {
                break scan_from + offset;
            }
            scan_from = self.count;
            if self.count == self.capacity() {
                return Err(Error::buffer(format!(
                    "no line terminator within {} bytes of capacity",
                    self.capacity()
                )));
            }
            match conn.read(&mut self.data[self.count..]).await {
                Ok(0) => return Err(Error::connection("connection closed mid-line")),
                Ok(n) => self.count += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::io(e)),
            }
        };
        self.curpos = newline + 1;
        let mut line = &self.data[start..newline];
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }
        std::str::from_utf8(line)
            .map_err(|_| Error::invalid_response("response line is not valid UTF-8"))
    }

    /// Async counterpart of [`read_exact`](Buffer::read_exact).
    pub async fn read_exact_async<R>(&mut self, conn: &mut R, n: usize) -> Result<&[u8]>
    where
        R: AsyncRead + Unpin,
    {
        while self.count - self.curpos < n {
            if self.count == self.capacity() {
                return Err(Error::buffer(format!(
                    "capacity exhausted with {} of {n} bytes buffered",
                    self.count - self.curpos
                )));
            }
            match conn.read(&mut self.data[self.count..]).await {
                Ok(0) => return Err(Error::connection("connection closed mid-payload")),
                Ok(read) => self.count += read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::io(e)),
            }
        }
        let start = self.curpos;
        self.curpos += n;
        Ok(&self.data[start..start + n])
    }

    /// Async counterpart of [`write_exact`](Buffer::write_exact).
    pub async fn write_exact_async<W>(&mut self, conn: &mut W, n: usize) -> Result<usize>
    where
        W: AsyncWrite + Unpin,
    {
        if self.count < self.curpos + n {
            return Err(Error::buffer(format!(
                "write of {n} bytes requested with only {} buffered",
                self.unread()
            )));
        }
        conn.write_all(&self.data[self.curpos..self.curpos + n])
            .await?;
        conn.flush().await?;
        self.curpos += n;
        Ok(n)
    }
}

/// Sends every byte of `bytes`, retrying interruptions. A send that stalls
/// past the socket's timeout surfaces as a timeout, never a silent short
/// write.
fn write_fully<W: Write>(conn: &mut W, bytes: &[u8]) -> Result<()> {
    let mut sent = 0;
    while sent < bytes.len() {
        match conn.write(&bytes[sent..]) {
            Ok(0) => return Err(Error::connection("connection closed while sending")),
            Ok(n) => sent += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_timeout(&e) => {
                return Err(Error::timeout(format!(
                    "send stalled after {sent} of {} bytes",
                    bytes.len()
                )))
            }
            Err(e) => return Err(Error::io(e)),
        }
    }
    conn.flush()?;
    Ok(())
}
