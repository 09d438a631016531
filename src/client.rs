//! Synchronous shardcache client implementation

use std::time::Duration;

use log::{debug, info};

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::hash::{HashFn, KeyHasher};
use crate::pool::{Endpoint, ServerPool};
use crate::protocol::{self, GetHeader, Response, StoreKind};

/// Connect/read/write timeout applied when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Keys travel on the command line, so they must be token-safe and within
/// the protocol's length bound.
const MAX_KEY_LEN: usize = 250;

/// Configuration for a client session.
///
/// One timeout bounds connects, reads, and writes for every operation;
/// there is no hidden global state.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Cache servers as `"host:port"` strings.
    pub servers: Vec<String>,
    /// Connect/read/write timeout.
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            servers: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Synchronous sharded cache client for blocking operations
///
/// Keys are hashed to one of the configured servers; each server's
/// connection opens lazily on first use and is dropped on failure so the
/// next operation reconnects. All operations block until completion or
/// timeout.
///
/// A `Client` assumes serialized use: hand it to one thread at a time (it
/// is `Send`, so moving it between threads is fine).
///
/// # Example
///
/// ```rust,no_run
/// use shardcache_client::{Client, Result};
///
/// fn main() -> Result<()> {
///     let mut client = Client::connect(&["127.0.0.1:11211", "127.0.0.1:11212"])?;
///
///     client.set("key", b"value")?;
///     let value = client.get("key")?;
///     let added = client.add("key", b"other")?; // false: key exists
///
///     Ok(())
/// }
/// ```
pub struct Client {
    pool: ServerPool,
    timeout: Duration,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("servers", &self.pool.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Client {
    /// Create a client for the given `"host:port"` servers with the default
    /// 2-second timeout.
    ///
    /// The server list is validated as a whole; connections open lazily on
    /// first use, so this does not touch the network.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use shardcache_client::Client;
    ///
    /// let client = Client::connect(&["localhost:11211"])?;
    /// # Ok::<(), shardcache_client::Error>(())
    /// ```
    pub fn connect<S: AsRef<str>>(servers: &[S]) -> Result<Self> {
        Self::connect_with_timeout(servers, DEFAULT_TIMEOUT)
    }

    /// Create a client with a custom connect/read/write timeout.
    pub fn connect_with_timeout<S: AsRef<str>>(servers: &[S], timeout: Duration) -> Result<Self> {
        let mut pool = ServerPool::new();
        pool.configure(servers)?;
        info!("client configured with {} cache servers", pool.len());
        Ok(Client { pool, timeout })
    }

    /// Create a client from a [`ClientConfig`].
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        Self::connect_with_timeout(&config.servers, config.timeout)
    }

    /// Store a value unconditionally.
    ///
    /// # Arguments
    ///
    /// * `key` - The key to store under
    /// * `value` - Opaque payload bytes; the client never interprets them
    ///
    /// # Returns
    ///
    /// `true` once the server confirms the store. (`set` is unconditional,
    /// so `false` only occurs for server-side refusals such as a key in a
    /// delete queue.)
    ///
    /// # Errors
    ///
    /// * `Error::Connection` / `Error::Timeout` if the shard is unreachable
    /// * `Error::Io` if network communication fails
    /// * `Error::Protocol` if the server reports an error
    /// * `Error::InvalidResponse` if the reply cannot be decoded
    pub fn set<S: AsRef<str>>(&mut self, key: S, value: &[u8]) -> Result<bool> {
        self.store(StoreKind::Set, key.as_ref(), value, 0, 0)
    }

    /// Store a value only if the key does not already exist.
    ///
    /// Returns `false` (not an error) when the key is already present.
    pub fn add<S: AsRef<str>>(&mut self, key: S, value: &[u8]) -> Result<bool> {
        self.store(StoreKind::Add, key.as_ref(), value, 0, 0)
    }

    /// Store a value only if the key already exists.
    ///
    /// Returns `false` (not an error) when the key is absent.
    pub fn replace<S: AsRef<str>>(&mut self, key: S, value: &[u8]) -> Result<bool> {
        self.store(StoreKind::Replace, key.as_ref(), value, 0, 0)
    }

    /// [`set`](Client::set) with explicit flags and expiration time
    /// (seconds, or a unix timestamp past 30 days; 0 means never).
    pub fn set_with<S: AsRef<str>>(
        &mut self,
        key: S,
        value: &[u8],
        flags: u32,
        exptime: u32,
    ) -> Result<bool> {
        self.store(StoreKind::Set, key.as_ref(), value, flags, exptime)
    }

    /// [`add`](Client::add) with explicit flags and expiration time.
    pub fn add_with<S: AsRef<str>>(
        &mut self,
        key: S,
        value: &[u8],
        flags: u32,
        exptime: u32,
    ) -> Result<bool> {
        self.store(StoreKind::Add, key.as_ref(), value, flags, exptime)
    }

    /// [`replace`](Client::replace) with explicit flags and expiration time.
    pub fn replace_with<S: AsRef<str>>(
        &mut self,
        key: S,
        value: &[u8],
        flags: u32,
        exptime: u32,
    ) -> Result<bool> {
        self.store(StoreKind::Replace, key.as_ref(), value, flags, exptime)
    }

    /// Get a value by key.
    ///
    /// # Returns
    ///
    /// The payload bytes, or `None` on a miss (a miss is not an error).
    ///
    /// # Errors
    ///
    /// * `Error::Connection` / `Error::Timeout` if the shard is unreachable
    /// * `Error::Io` if network communication fails
    /// * `Error::Protocol` if the server reports an error
    /// * `Error::InvalidResponse` if the response framing is malformed
    pub fn get<S: AsRef<str>>(&mut self, key: S) -> Result<Option<Vec<u8>>> {
        Ok(self.get_with_flags(key)?.map(|(_, payload)| payload))
    }

    /// Get a value together with the flags word stored alongside it.
    pub fn get_with_flags<S: AsRef<str>>(&mut self, key: S) -> Result<Option<(u32, Vec<u8>)>> {
        let key = key.as_ref();
        validate_key(key)?;
        let shard = self.pool.select_shard(key)?;
        debug!("get '{key}' -> shard {shard}");

        // Encode before touching the connection: a buffer failure here
        // leaves the endpoint exactly as it was.
        let mut obuf = Buffer::with_capacity(key.len() + 8)?;
        protocol::encode_get(&mut obuf, key)?;

        let timeout = self.timeout;
        let endpoint = self.pool.endpoint_mut(shard);
        let result = get_on(endpoint, timeout, &mut obuf, key);
        settle(endpoint, result)
    }

    /// Replace the server list.
    ///
    /// The new list is validated as a whole first: on any invalid entry the
    /// call fails and the current pool (and its connections) is untouched.
    /// On success every previous connection is closed and the new pool
    /// starts cold.
    pub fn set_servers<S: AsRef<str>>(&mut self, servers: &[S]) -> Result<()> {
        self.pool.configure(servers)
    }

    /// Install a custom shard hasher in place of the default.
    pub fn set_hasher<H: KeyHasher + 'static>(&mut self, hasher: H) {
        self.pool.set_hasher(Box::new(hasher));
    }

    /// Install a plain function or closure as the shard hasher.
    ///
    /// The function receives `(key, nservers)` and must return an index in
    /// `[0, nservers)`; failures or out-of-range results surface as
    /// `Error::Hash` on the operation that used them.
    pub fn set_hash_fn<F>(&mut self, f: F)
    where
        F: Fn(&str, usize) -> Result<usize> + Send + Sync + 'static,
    {
        self.pool.set_hasher(Box::new(HashFn(f)));
    }

    /// The shard index `key` currently maps to, without any I/O.
    pub fn shard_for<S: AsRef<str>>(&self, key: S) -> Result<usize> {
        let key = key.as_ref();
        validate_key(key)?;
        self.pool.select_shard(key)
    }

    /// The configured servers as `"host:port"` strings.
    pub fn servers(&self) -> Vec<String> {
        self.pool.servers()
    }

    /// The configured operation timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Close every open connection, keeping the pool configured. The next
    /// operation reconnects lazily.
    pub fn disconnect(&mut self) {
        debug!("closing all cache connections");
        self.pool.close_all();
    }

    fn store(
        &mut self,
        kind: StoreKind,
        key: &str,
        value: &[u8],
        flags: u32,
        exptime: u32,
    ) -> Result<bool> {
        validate_key(key)?;
        let shard = self.pool.select_shard(key)?;
        debug!("{} '{key}' ({} bytes) -> shard {shard}", kind.verb(), value.len());

        // Encode before touching the connection: a buffer failure here
        // leaves the endpoint exactly as it was.
        let mut obuf = Buffer::with_capacity(value.len() + 128)?;
        let frame_len = protocol::encode_store(&mut obuf, kind, key, flags, exptime, |buf| {
            buf.put_slice(value)
        })?;

        let timeout = self.timeout;
        let endpoint = self.pool.endpoint_mut(shard);
        let result = store_on(endpoint, timeout, &mut obuf, frame_len, kind, key);
        settle(endpoint, result)
    }
}

/// Applies the connection-retention policy to an operation result: a
/// well-formed server error line (`Error::Protocol`) leaves the stream
/// positioned cleanly, so the connection is kept; anything else leaves the
/// stream in an unknown state and the cached connection is dropped so the
/// next operation reconnects lazily.
fn settle<T>(endpoint: &mut Endpoint, result: Result<T>) -> Result<T> {
    if let Err(ref err) = result {
        if !matches!(err, Error::Protocol { .. }) {
            endpoint.invalidate();
        }
    }
    result
}

fn store_on(
    endpoint: &mut Endpoint,
    timeout: Duration,
    obuf: &mut Buffer,
    frame_len: usize,
    kind: StoreKind,
    key: &str,
) -> Result<bool> {
    let conn = endpoint.connection(timeout)?;
    obuf.write_exact(conn, frame_len)?;

    let mut ibuf = Buffer::with_capacity(1)?;
    let reply = {
        let line = ibuf.read_line(conn)?;
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

fn get_on(
    endpoint: &mut Endpoint,
    timeout: Duration,
    obuf: &mut Buffer,
    key: &str,
) -> Result<Option<(u32, Vec<u8>)>> {
    let conn = endpoint.connection(timeout)?;
    obuf.write_line(conn)?;

    let mut ibuf = Buffer::with_capacity(1)?;
    let header = {
        let line = ibuf.read_line(conn)?;
        protocol::parse_value_header(line, key)?
    };
    let (flags, len) = match header {
        GetHeader::Miss => return Ok(None),
        GetHeader::Value { flags, len } => (flags, len),
    };

    // Room for the payload, its CRLF, and the closing "END\r\n".
    ibuf.ensure_capacity(ibuf.pos() + len + 7)?;
    let payload = ibuf.read_exact(conn, len)?.to_vec();

    let tail = ibuf.read_exact(conn, 2)?;
    if tail != b"\r\n" {
        return Err(Error::invalid_response("payload is not terminated by CRLF"));
    }
    let end = ibuf.read_line(conn)?;
    if end != "END" {
        return Err(Error::invalid_response(format!(
            "expected END after the value, got '{end}'"
        )));
    }

    debug!("got '{key}' ({len} bytes, flags {flags})");
    Ok(Some((flags, payload)))
}

/// Keys are command-line tokens: non-empty, at most 250 bytes, no
/// whitespace or control characters.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::invalid_parameter("key cannot be empty"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(Error::invalid_parameter(format!(
            "key exceeds {MAX_KEY_LEN} bytes"
        )));
    }
    if key.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
        return Err(Error::invalid_parameter(
            "key must not contain whitespace or control characters",
        ));
    }
    Ok(())
}
