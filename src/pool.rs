//! Server pool: endpoint parsing, lazy connections, shard selection.

use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::hash::{DefaultKeyHasher, KeyHasher};
use crate::sock::Stream;

/// Splits a `"host:port"` entry at its first colon. The host must be
/// non-empty and the port must parse as a base-10 `u16`.
pub(crate) fn parse_server(entry: &str) -> Result<(String, u16)> {
    let (host, port) = entry.split_once(':').ok_or_else(|| {
        Error::config(format!("server entry '{entry}' must be 'host:port'"))
    })?;
    if host.is_empty() {
        return Err(Error::config(format!("server entry '{entry}' has an empty host")));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| Error::config(format!("server entry '{entry}' has an invalid port")))?;
    Ok((host.to_string(), port))
}

/// Validates a whole server list up front. Any invalid entry rejects the
/// list as a unit, so a caller's existing configuration is never half
/// replaced.
pub(crate) fn parse_server_list<S: AsRef<str>>(servers: &[S]) -> Result<Vec<(String, u16)>> {
    if servers.is_empty() {
        return Err(Error::config("server list is empty"));
    }
    let mut parsed = Vec::with_capacity(servers.len());
    for entry in servers {
        parsed.push(parse_server(entry.as_ref())?);
    }
    Ok(parsed)
}

/// One cache server, holding at most one live connection. `None` is the
/// only not-connected state; the connection opens lazily on first use and
/// is dropped on failure so the next operation reconnects.
pub(crate) struct Endpoint {
    host: String,
    port: u16,
    stream: Option<Stream>,
}

impl Endpoint {
    fn new(host: String, port: u16) -> Endpoint {
        Endpoint {
            host,
            port,
            stream: None,
        }
    }

    /// The live connection, opening one if none is cached.
    pub fn connection(&mut self, timeout: Duration) -> Result<&mut Stream> {
        if self.stream.is_none() {
            debug!("opening connection to {}:{}", self.host, self.port);
            let stream = Stream::connect(&self.host, self.port, timeout)?;
            self.stream = Some(stream);
        }
        self.stream
            .as_mut()
            .ok_or_else(|| Error::connection("connection unavailable"))
    }

    /// Drops the cached connection so the next operation reconnects.
    pub fn invalidate(&mut self) {
        if self.stream.take().is_some() {
            warn!("dropping connection to {}:{}", self.host, self.port);
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.shutdown();
        }
    }
}

/// Ordered set of endpoints plus the hasher that assigns keys to them.
pub(crate) struct ServerPool {
    endpoints: Vec<Endpoint>,
    hasher: Box<dyn KeyHasher>,
}

impl ServerPool {
    pub fn new() -> ServerPool {
        ServerPool {
            endpoints: Vec::new(),
            hasher: Box::new(DefaultKeyHasher),
        }
    }

    /// Replaces the endpoint list. Validation runs over the entire list
    /// first; only once every entry has passed is the previous pool torn
    /// down (closing its connections) and repopulated.
    pub fn configure<S: AsRef<str>>(&mut self, servers: &[S]) -> Result<()> {
        let parsed = parse_server_list(servers)?;
        self.close_all();
        self.endpoints = parsed
            .into_iter()
            .map(|(host, port)| Endpoint::new(host, port))
            .collect();
        info!("configured {} cache servers", self.endpoints.len());
        Ok(())
    }

    pub fn set_hasher(&mut self, hasher: Box<dyn KeyHasher>) {
        self.hasher = hasher;
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// The configured endpoints as `"host:port"` strings.
    pub fn servers(&self) -> Vec<String> {
        self.endpoints
            .iter()
            .map(|e| format!("{}:{}", e.host, e.port))
            .collect()
    }

    /// Picks the shard owning `key`. A custom hasher that fails or returns
    /// an index outside `[0, nservers)` aborts the operation with a hash
    /// error; it never touches a connection.
    pub fn select_shard(&self, key: &str) -> Result<usize> {
        crate::hash::checked_shard(self.hasher.as_ref(), key, self.endpoints.len())
    }

    pub fn endpoint_mut(&mut self, shard: usize) -> &mut Endpoint {
        &mut self.endpoints[shard]
    }

    /// Closes every open connection, keeping the endpoints configured for
    /// lazy reconnection.
    pub fn close_all(&mut self) {
        for endpoint in &mut self.endpoints {
            endpoint.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashFn;

    #[test]
    fn parses_host_and_port() {
        assert_eq!(
            parse_server("cache1.internal:11211").unwrap(),
            ("cache1.internal".to_string(), 11211)
        );
    }

    #[test]
    fn rejects_malformed_entries() {
        for entry in ["badentry", ":11211", "host:", "host:notaport", "host:70000"] {
            let err = parse_server(entry).unwrap_err();
            assert!(matches!(err, Error::Config { .. }), "{entry} -> {err:?}");
        }
    }

    #[test]
    fn port_comes_from_the_first_colon() {
        // Everything after the first colon must be the port.
        assert!(parse_server("host:11211:extra").is_err());
    }

    #[test]
    fn configure_is_all_or_nothing() {
        let mut pool = ServerPool::new();
        pool.configure(&["a:1", "b:2"]).unwrap();

        let err = pool.configure(&["c:3", "badentry"]).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert_eq!(pool.servers(), vec!["a:1", "b:2"]);

        pool.configure(&["c:3"]).unwrap();
        assert_eq!(pool.servers(), vec!["c:3"]);
    }

    #[test]
    fn empty_list_is_rejected() {
        let mut pool = ServerPool::new();
        let err = pool.configure(&[] as &[&str]).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn selection_without_servers_is_a_configuration_error() {
        let pool = ServerPool::new();
        let err = pool.select_shard("key").unwrap_err();
        assert!(matches!(err, Error::Config { .. }), "got {err:?}");
    }

    #[test]
    fn default_hasher_spreads_keys_in_range() {
        let mut pool = ServerPool::new();
        pool.configure(&["a:1", "b:2", "c:3"]).unwrap();
        for key in ["alpha", "beta", "gamma", "delta"] {
            assert!(pool.select_shard(key).unwrap() < 3);
        }
    }

    #[test]
    fn out_of_range_custom_hasher_is_a_hash_error() {
        let mut pool = ServerPool::new();
        pool.configure(&["a:1", "b:2"]).unwrap();
        pool.set_hasher(Box::new(HashFn(|_: &str, n: usize| Ok(n + 7))));
        let err = pool.select_shard("key").unwrap_err();
        assert!(matches!(err, Error::Hash { .. }), "got {err:?}");
    }

    #[test]
    fn failing_custom_hasher_is_a_hash_error() {
        let mut pool = ServerPool::new();
        pool.configure(&["a:1"]).unwrap();
        pool.set_hasher(Box::new(HashFn(|_: &str, _: usize| {
            Err(Error::invalid_parameter("refusing every key"))
        })));
        let err = pool.select_shard("key").unwrap_err();
        assert!(matches!(err, Error::Hash { .. }), "got {err:?}");
    }
}
