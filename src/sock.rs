//! TCP socket layer: bounded connects plus timeout-aware reads and writes.
//!
//! All waiting happens here, bounded by the timeout configured on the
//! client. Connects use the non-blocking connect-then-poll sequence std
//! wraps in [`TcpStream::connect_timeout`]; established sockets carry the
//! same bound as their read and write timeouts, so a stalled peer surfaces
//! as a timeout instead of hanging the caller.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use log::debug;

use crate::error::{Error, Result};

/// True for the error kinds a bounded wait reports on expiry. Platforms
/// disagree on which of the two a timed-out socket read yields.
pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// One established connection to a cache server.
///
/// The `Read`/`Write` impls retry interruptions against an absolute
/// deadline, so repeated signals cannot stretch a wait past the configured
/// timeout.
#[derive(Debug)]
pub(crate) struct Stream {
    tcp: TcpStream,
    timeout: Duration,
}

impl Stream {
    /// Resolves `host` (DNS or literal address) and connects to the first
    /// address that answers within `timeout`. The same bound is installed
    /// as the socket's read and write timeout.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Stream> {
        let addrs = (host, port).to_socket_addrs().map_err(|e| {
            Error::connection(format!("failed to resolve {host}:{port}: {e}"))
        })?;

        let mut last_err: Option<io::Error> = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(tcp) => {
                    tcp.set_read_timeout(Some(timeout))?;
                    tcp.set_write_timeout(Some(timeout))?;
                    // Commands are small; waiting for coalescing only adds latency.
                    tcp.set_nodelay(true)?;
                    debug!("connected to {host}:{port} via {addr}");
                    return Ok(Stream { tcp, timeout });
                }
                Err(e) => {
                    debug!("connect to {addr} failed: {e}");
                    last_err = Some(e);
                }
            }
        }

        Err(match last_err {
            Some(e) if is_timeout(&e) => {
                Error::timeout(format!("connect to {host}:{port} timed out"))
            }
            Some(e) => Error::connection(format!("failed to connect to {host}:{port}: {e}")),
            None => Error::connection(format!("{host}:{port} resolved to no addresses")),
        })
    }

    /// Closes both directions; errors on an already-dead socket are moot.
    pub fn shutdown(&self) {
        let _ = self.tcp.shutdown(Shutdown::Both);
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match self.tcp.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    if Instant::now() >= deadline {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "read deadline exceeded",
                        ));
                    }
                }
                other => return other,
            }
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match self.tcp.write(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    if Instant::now() >= deadline {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "write deadline exceeded",
                        ));
                    }
                }
                other => return other,
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.tcp.flush()
    }
}
