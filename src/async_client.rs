//! Asynchronous shardcache client implementation

use std::time::Duration;

use log::{debug, info};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{error::Elapsed, timeout};

use crate::buffer::Buffer;
use crate::client::{validate_key, DEFAULT_TIMEOUT};
use crate::error::{Error, Result};
use crate::hash::{checked_shard, DefaultKeyHasher, HashFn, KeyHasher};
use crate::pool::parse_server_list;
use crate::protocol::{self, GetHeader, Response, StoreKind};

/// One cache server slot. The mutex guards the lazily-opened connection
/// for the whole of each protocol exchange, so concurrent tasks hashing to
/// the same server cannot interleave frames.
struct Shard {
    host: String,
    port: u16,
    conn: Mutex<Option<TcpStream>>,
}

impl Shard {
    fn new(host: String, port: u16) -> Shard {
        Shard {
            host,
            port,
            conn: Mutex::new(None),
        }
    }
}

/// Asynchronous sharded cache client for non-blocking operations
///
/// Mirrors [`Client`](crate::Client) operation-for-operation over tokio.
/// Operations on different shards proceed concurrently; operations on the
/// same shard are serialized by that shard's lock. Every operation is
/// bounded by the configured timeout, connect included.
///
/// # Example
///
/// ```rust,no_run
/// use shardcache_client::{AsyncClient, Result};
///
/// #[tokio::main]
/// async fn main() -> Result<()> {
///     let client = AsyncClient::connect(&["127.0.0.1:11211"])?;
///
///     client.set("key", b"value").await?;
///     let value = client.get("key").await?;
///
///     Ok(())
/// }
/// ```
pub struct AsyncClient {
    shards: Vec<Shard>,
    hasher: Box<dyn KeyHasher>,
    timeout: Duration,
}

impl std::fmt::Debug for AsyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncClient")
            .field("servers", &self.shards.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl AsyncClient {
    /// Create a client for the given `"host:port"` servers with the
    /// default 2-second timeout. Connections open lazily on first use, so
    /// this validates the list without touching the network.
    pub fn connect<S: AsRef<str>>(servers: &[S]) -> Result<Self> {
        Self::connect_with_timeout(servers, DEFAULT_TIMEOUT)
    }

    /// Create a client with a custom per-operation timeout.
    pub fn connect_with_timeout<S: AsRef<str>>(servers: &[S], timeout: Duration) -> Result<Self> {
        let shards = parse_server_list(servers)?
            .into_iter()
            .map(|(host, port)| Shard::new(host, port))
            .collect::<Vec<_>>();
        info!("async client configured with {} cache servers", shards.len());
        Ok(AsyncClient {
            shards,
            hasher: Box::new(DefaultKeyHasher),
            timeout,
        })
    }

    /// Store a value unconditionally. See [`Client::set`](crate::Client::set).
    pub async fn set<S: AsRef<str>>(&self, key: S, value: &[u8]) -> Result<bool> {
        self.store(StoreKind::Set, key.as_ref(), value, 0, 0).await
    }

    /// Store a value only if the key does not already exist. Returns
    /// `false` (not an error) when the key is present.
    pub async fn add<S: AsRef<str>>(&self, key: S, value: &[u8]) -> Result<bool> {
        self.store(StoreKind::Add, key.as_ref(), value, 0, 0).await
    }

    /// Store a value only if the key already exists. Returns `false` (not
    /// an error) when the key is absent.
    pub async fn replace<S: AsRef<str>>(&self, key: S, value: &[u8]) -> Result<bool> {
        self.store(StoreKind::Replace, key.as_ref(), value, 0, 0).await
    }

    /// [`set`](AsyncClient::set) with explicit flags and expiration time.
    pub async fn set_with<S: AsRef<str>>(
        &self,
        key: S,
        value: &[u8],
        flags: u32,
        exptime: u32,
    ) -> Result<bool> {
        self.store(StoreKind::Set, key.as_ref(), value, flags, exptime)
            .await
    }

    /// [`add`](AsyncClient::add) with explicit flags and expiration time.
    pub async fn add_with<S: AsRef<str>>(
        &self,
        key: S,
        value: &[u8],
        flags: u32,
        exptime: u32,
    ) -> Result<bool> {
        self.store(StoreKind::Add, key.as_ref(), value, flags, exptime)
            .await
    }

    /// [`replace`](AsyncClient::replace) with explicit flags and
    /// expiration time.
    pub async fn replace_with<S: AsRef<str>>(
        &self,
        key: S,
        value: &[u8],
        flags: u32,
        exptime: u32,
    ) -> Result<bool> {
        self.store(StoreKind::Replace, key.as_ref(), value, flags, exptime)
            .await
    }

    /// Get a value by key. Returns `None` on a miss (a miss is not an
    /// error).
    pub async fn get<S: AsRef<str>>(&self, key: S) -> Result<Option<Vec<u8>>> {
        Ok(self.get_with_flags(key).await?.map(|(_, payload)| payload))
    }

    /// Get a value together with the flags word stored alongside it.
    pub async fn get_with_flags<S: AsRef<str>>(&self, key: S) -> Result<Option<(u32, Vec<u8>)>> {
        let key = key.as_ref();
        validate_key(key)?;
        let idx = checked_shard(self.hasher.as_ref(), key, self.shards.len())?;
        debug!("get '{key}' -> shard {idx}");

        // Encode before touching the connection: a buffer failure here
        // leaves the endpoint exactly as it was.
        let mut obuf = Buffer::with_capacity(key.len() + 8)?;
        protocol::encode_get(&mut obuf, key)?;
        let frame_len = obuf.unread();

        let shard = &self.shards[idx];
        let mut guard = shard.conn.lock().await;
        let outcome = timeout(
            self.timeout,
            get_on(&mut guard, &shard.host, shard.port, &mut obuf, frame_len, key),
        )
        .await;
        settle(&mut guard, outcome, || format!("get '{key}' timed out"))
    }

    /// Replace the server list. The new list is validated as a whole
    /// first; on failure the current pool is untouched. On success the new
    /// pool starts cold and the previous connections are dropped.
    pub fn set_servers<S: AsRef<str>>(&mut self, servers: &[S]) -> Result<()> {
        self.shards = parse_server_list(servers)?
            .into_iter()
            .map(|(host, port)| Shard::new(host, port))
            .collect();
        info!(
            "async client reconfigured with {} cache servers",
            self.shards.len()
        );
        Ok(())
    }

    /// Install a custom shard hasher in place of the default.
    pub fn set_hasher<H: KeyHasher + 'static>(&mut self, hasher: H) {
        self.hasher = Box::new(hasher);
    }

    /// Install a plain function or closure as the shard hasher.
    pub fn set_hash_fn<F>(&mut self, f: F)
    where
        F: Fn(&str, usize) -> Result<usize> + Send + Sync + 'static,
    {
        self.hasher = Box::new(HashFn(f));
    }

    /// The shard index `key` currently maps to, without any I/O.
    pub fn shard_for<S: AsRef<str>>(&self, key: S) -> Result<usize> {
        let key = key.as_ref();
        validate_key(key)?;
        checked_shard(self.hasher.as_ref(), key, self.shards.len())
    }

    /// The configured servers as `"host:port"` strings.
    pub fn servers(&self) -> Vec<String> {
        self.shards
            .iter()
            .map(|s| format!("{}:{}", s.host, s.port))
            .collect()
    }

    /// The configured operation timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Close every open connection, keeping the pool configured. The next
    /// operation reconnects lazily.
    pub async fn disconnect(&self) {
        debug!("closing all cache connections");
        for shard in &self.shards {
            *shard.conn.lock().await = None;
        }
    }

    async fn store(
        &self,
        kind: StoreKind,
        key: &str,
        value: &[u8],
        flags: u32,
        exptime: u32,
    ) -> Result<bool> {
        validate_key(key)?;
        let idx = checked_shard(self.hasher.as_ref(), key, self.shards.len())?;
        debug!("{} '{key}' ({} bytes) -> shard {idx}", kind.verb(), value.len());

        // Encode before touching the connection: a buffer failure here
        // leaves the endpoint exactly as it was.
        let mut obuf = Buffer::with_capacity(value.len() + 128)?;
        let frame_len = protocol::encode_store(&mut obuf, kind, key, flags, exptime, |buf| {
            buf.put_slice(value)
        })?;

        let shard = &self.shards[idx];
        let mut guard = shard.conn.lock().await;
        let outcome = timeout(
            self.timeout,
            store_on(&mut guard, &shard.host, shard.port, &mut obuf, frame_len, kind, key),
        )
        .await;
        settle(&mut guard, outcome, || {
            format!("{} '{key}' timed out", kind.verb())
        })
    }
}

/// Async twin of the sync client's connection-retention policy, folding in
/// the operation-level timeout: a timed-out operation was cut off mid
/// protocol, so its connection is dropped along with those of all hard
/// errors; well-formed server error lines keep theirs.
fn settle<T>(
    conn: &mut Option<TcpStream>,
    outcome: std::result::Result<Result<T>, Elapsed>,
    timeout_msg: impl FnOnce() -> String,
) -> Result<T> {
    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => {
            if !matches!(err, Error::Protocol { .. }) {
                *conn = None;
            }
            Err(err)
        }
        Err(_) => {
            *conn = None;
            Err(Error::timeout(timeout_msg()))
        }
    }
}

async fn connection<'a>(
    conn: &'a mut Option<TcpStream>,
    host: &str,
    port: u16,
) -> Result<&'a mut TcpStream> {
    if conn.is_none() {
        debug!("opening connection to {host}:{port}");
        let stream = TcpStream::connect((host, port)).await.map_err(|e| {
            Error::connection(format!("failed to connect to {host}:{port}: {e}"))
        })?;
        stream.set_nodelay(true)?;
        *conn = Some(stream);
    }
    conn.as_mut()
        .ok_or_else(|| Error::connection("connection unavailable"))
}

async fn store_on(
    conn: &mut Option<TcpStream>,
    host: &str,
    port: u16,
    obuf: &mut Buffer,
    frame_len: usize,
    kind: StoreKind,
    key: &str,
) -> Result<bool> {
    let conn = connection(conn, host, port).await?;
    obuf.write_exact_async(conn, frame_len).await?;

    let mut ibuf = Buffer::with_capacity(1)?;
    let reply = {
        let line = ibuf.read_line_async(conn).await?;
        protocol::parse_store_reply(line)?
    };
    match reply {
        Response::Stored => Ok(true),
        Response::NotStored => {
            debug!("'{key}' not stored ({} condition failed)", kind.verb());
            Ok(false)
        }
        other => Err(Error::invalid_response(format!(
            "store reply decoded as {other:?}"
        ))),
    }
}

async fn get_on(
    conn: &mut Option<TcpStream>,
    host: &str,
    port: u16,
    obuf: &mut Buffer,
    frame_len: usize,
    key: &str,
) -> Result<Option<(u32, Vec<u8>)>> {
    let conn = connection(conn, host, port).await?;
    obuf.write_exact_async(conn, frame_len).await?;

    let mut ibuf = Buffer::with_capacity(1)?;
    let header = {
        let line = ibuf.read_line_async(conn).await?;
        protocol::parse_value_header(line, key)?
    };
    let (flags, len) = match header {
        GetHeader::Miss => return Ok(None),
        GetHeader::Value { flags, len } => (flags, len),
    };

    // Room for the payload, its CRLF, and the closing "END\r\n".
    ibuf.ensure_capacity(ibuf.pos() + len + 7)?;
    let payload = ibuf.read_exact_async(conn, len).await?.to_vec();

    let tail = ibuf.read_exact_async(conn, 2).await?;
    if tail != b"\r\n" {
        return Err(Error::invalid_response("payload is not terminated by CRLF"));
    }
    let end = ibuf.read_line_async(conn).await?;
    if end != "END" {
        return Err(Error::invalid_response(format!(
            "expected END after the value, got '{end}'"
        )));
    }

    debug!("got '{key}' ({len} bytes, flags {flags})");
    Ok(Some((flags, payload)))
}
