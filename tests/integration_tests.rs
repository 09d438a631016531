use shardcache_client::{AsyncClient, Client, Error};

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Integration tests for the shardcache Rust client library
///
/// Each test runs against a minimal in-process cache server speaking the
/// memcached text protocol over a loopback socket, so the full framing
/// path (buffering, partial reads, sharding, response parsing) is
/// exercised end-to-end without external infrastructure.

type Store = Arc<Mutex<HashMap<String, (u32, Vec<u8>)>>>;

/// Spawns a cache server that accepts any number of connections and
/// serves set/add/replace/get against a shared in-memory store.
fn spawn_cache_server() -> (String, Store) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());
    let store: Store = Arc::new(Mutex::new(HashMap::new()));
    let accept_store = Arc::clone(&store);
    thread::spawn(move || {
        for conn in listener.incoming() {
            let Ok(conn) = conn else { break };
            let store = Arc::clone(&accept_store);
            thread::spawn(move || serve_connection(conn, store));
        }
    });
    (addr, store)
}

fn serve_connection(conn: TcpStream, store: Store) {
    let mut reader = BufReader::new(conn.try_clone().unwrap());
    let mut conn = conn;
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).unwrap_or(0) == 0 {
            return;
        }
        let request = line.trim_end().to_string();
        let parts: Vec<&str> = request.split(' ').collect();
        let result = match parts.as_slice() {
            ["get", key] => {
                let reply = match store.lock().unwrap().get(*key) {
                    Some((flags, payload)) => {
                        let mut reply = format!("VALUE {} {} {}\r\n", key, flags, payload.len())
                            .into_bytes();
                        reply.extend_from_slice(payload);
                        reply.extend_from_slice(b"\r\nEND\r\n");
                        reply
                    }
                    None => b"END\r\n".to_vec(),
                };
                conn.write_all(&reply)
            }
            [cmd, key, flags, _exptime, bytes]
                if matches!(*cmd, "set" | "add" | "replace") =>
            {
                let flags: u32 = flags.parse().unwrap();
                let len: usize = bytes.parse().unwrap();
                let mut payload = vec![0u8; len + 2];
                if reader.read_exact(&mut payload).is_err() {
                    return;
                }
                payload.truncate(len);

                let mut store = store.lock().unwrap();
                let exists = store.contains_key(*key);
                let accepted = match *cmd {
                    "add" => !exists,
                    "replace" => exists,
                    _ => true,
                };
                if accepted {
                    store.insert((*key).to_string(), (flags, payload));
                    conn.write_all(b"STORED\r\n")
                } else {
                    conn.write_all(b"NOT_STORED\r\n")
                }
            }
            _ => conn.write_all(b"ERROR\r\n"),
        };
        if result.is_err() {
            return;
        }
    }
}

/// Spawns a server that answers the first request with a fixed byte
/// sequence, delivered one byte per write.
fn spawn_trickle_server(response: &'static [u8]) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());
    thread::spawn(move || {
        let (mut conn, _) = listener.accept().unwrap();
        let mut request = [0u8; 512];
        let _ = conn.read(&mut request);
        for &byte in response {
            if conn.write_all(&[byte]).is_err() {
                return;
            }
            conn.flush().unwrap();
            thread::sleep(Duration::from_millis(1));
        }
    });
    addr
}

/// Spawns a server that accepts, reads the request, and never answers.
fn spawn_silent_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());
    thread::spawn(move || {
        let (mut conn, _) = listener.accept().unwrap();
        let mut request = [0u8; 512];
        let _ = conn.read(&mut request);
        thread::sleep(Duration::from_secs(10));
    });
    addr
}

mod sync_client_tests {
    use super::*;

    #[test]
    fn store_then_get_round_trips() {
        let (addr, _) = spawn_cache_server();
        let mut client = Client::connect(&[addr]).unwrap();

        let payload = b"hello\r\nworld\x00\xffbinary".to_vec();
        assert!(client.set("round", &payload).unwrap());
        assert_eq!(client.get("round").unwrap(), Some(payload));
    }

    #[test]
    fn miss_is_none_not_an_error() {
        let (addr, _) = spawn_cache_server();
        let mut client = Client::connect(&[addr]).unwrap();
        assert_eq!(client.get("never-stored").unwrap(), None);
    }

    #[test]
    fn add_on_existing_key_is_a_logical_negative() {
        let (addr, _) = spawn_cache_server();
        let mut client = Client::connect(&[addr]).unwrap();

        assert!(client.add("once", b"first").unwrap());
        assert!(!client.add("once", b"second").unwrap());
        assert_eq!(client.get("once").unwrap(), Some(b"first".to_vec()));
    }

    #[test]
    fn replace_on_missing_key_is_a_logical_negative() {
        let (addr, _) = spawn_cache_server();
        let mut client = Client::connect(&[addr]).unwrap();
        assert!(!client.replace("absent", b"value").unwrap());
    }

    #[test]
    fn flags_round_trip() {
        let (addr, _) = spawn_cache_server();
        let mut client = Client::connect(&[addr]).unwrap();

        assert!(client.set_with("flagged", b"payload", 42, 0).unwrap());
        assert_eq!(
            client.get_with_flags("flagged").unwrap(),
            Some((42, b"payload".to_vec()))
        );
    }

    #[test]
    fn empty_payload_round_trips() {
        let (addr, _) = spawn_cache_server();
        let mut client = Client::connect(&[addr]).unwrap();

        assert!(client.set("empty", b"").unwrap());
        assert_eq!(client.get("empty").unwrap(), Some(Vec::new()));
    }

    #[test]
    fn large_payload_grows_buffers_and_round_trips() {
        let (addr, _) = spawn_cache_server();
        let mut client = Client::connect(&[addr]).unwrap();

        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        assert!(client.set("large", &payload).unwrap());
        assert_eq!(client.get("large").unwrap(), Some(payload));
    }

    #[test]
    fn garbage_reply_is_an_invalid_response() {
        let addr = spawn_trickle_server(b"GARBAGE\r\n");
        let mut client = Client::connect(&[addr]).unwrap();
        let err = client.get("key").unwrap_err();
        assert!(matches!(err, Error::InvalidResponse { .. }), "got {err:?}");
    }

    #[test]
    fn one_byte_at_a_time_responses_still_assemble() {
        let addr = spawn_trickle_server(b"VALUE key 3 5\r\nhello\r\nEND\r\n");
        let mut client = Client::connect(&[addr]).unwrap();
        assert_eq!(
            client.get_with_flags("key").unwrap(),
            Some((3, b"hello".to_vec()))
        );
    }

    #[test]
    fn silent_server_times_out_within_the_configured_bound() {
        let addr = spawn_silent_server();
        let mut client =
            Client::connect_with_timeout(&[addr], Duration::from_millis(300)).unwrap();

        let started = Instant::now();
        let err = client.set("key", b"value").unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, Error::Timeout { .. }), "got {err:?}");
        assert!(elapsed >= Duration::from_millis(200), "returned too fast");
        assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
    }

    #[test]
    fn failed_reconfiguration_leaves_the_pool_working() {
        let (addr, _) = spawn_cache_server();
        let mut client = Client::connect(&[addr.clone()]).unwrap();
        client.set("sticky", b"value").unwrap();

        let err = client.set_servers(&["badentry"]).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert_eq!(client.servers(), vec![addr]);
        assert_eq!(client.get("sticky").unwrap(), Some(b"value".to_vec()));
    }

    #[test]
    fn successful_reconfiguration_switches_pools() {
        let (addr_a, _) = spawn_cache_server();
        let (addr_b, _) = spawn_cache_server();
        let mut client = Client::connect(&[addr_a]).unwrap();

        client.set("moved", b"value").unwrap();
        client.set_servers(&[addr_b]).unwrap();

        // The new pool is cold and the new server never saw the key.
        assert_eq!(client.get("moved").unwrap(), None);
    }

    #[test]
    fn keys_shard_across_servers_deterministically() {
        let (addr_a, store_a) = spawn_cache_server();
        let (addr_b, store_b) = spawn_cache_server();
        let mut client = Client::connect(&[addr_a, addr_b]).unwrap();

        // 'b' hashes to shard 0 and 'a' to shard 1 under the default hash.
        assert_eq!(client.shard_for("b").unwrap(), 0);
        assert_eq!(client.shard_for("a").unwrap(), 1);

        client.set("a", b"on shard one").unwrap();
        client.set("b", b"on shard zero").unwrap();

        assert!(store_a.lock().unwrap().contains_key("b"));
        assert!(store_b.lock().unwrap().contains_key("a"));
        assert_eq!(client.get("a").unwrap(), Some(b"on shard one".to_vec()));
        assert_eq!(client.get("b").unwrap(), Some(b"on shard zero".to_vec()));
    }

    #[test]
    fn custom_hasher_routes_every_key_to_its_shard() {
        let (addr_a, store_a) = spawn_cache_server();
        let (addr_b, _) = spawn_cache_server();
        let mut client = Client::connect(&[addr_a, addr_b]).unwrap();

        client.set_hash_fn(|_key, _nservers| Ok(0));
        for key in ["one", "two", "three"] {
            client.set(key, b"pinned").unwrap();
        }
        assert_eq!(store_a.lock().unwrap().len(), 3);
    }

    #[test]
    fn out_of_range_hasher_fails_without_touching_the_network() {
        // Nothing listens on this address; the hash error must come first.
        let mut client = Client::connect(&["127.0.0.1:1"]).unwrap();
        client.set_hash_fn(|_key, nservers| Ok(nservers + 1));
        let err = client.set("key", b"value").unwrap_err();
        assert!(matches!(err, Error::Hash { .. }), "got {err:?}");
    }

    #[test]
    fn one_connection_carries_many_operations() {
        let (addr, store) = spawn_cache_server();
        let mut client = Client::connect(&[addr]).unwrap();

        // Miss, store, and hit all travel the same lazily-opened
        // connection; the END trailer of each get must be fully drained
        // for the next operation to parse cleanly.
        assert_eq!(client.get("warmup").unwrap(), None);
        assert!(client.set("warmup", b"ok").unwrap());
        assert_eq!(client.get("warmup").unwrap(), Some(b"ok".to_vec()));
        assert_eq!(client.get("warmup").unwrap(), Some(b"ok".to_vec()));
        assert_eq!(store.lock().unwrap().len(), 1);
    }
}

mod async_client_tests {
    use super::*;

    #[tokio::test]
    async fn store_then_get_round_trips() {
        let (addr, _) = spawn_cache_server();
        let client = AsyncClient::connect(&[addr]).unwrap();

        let payload = b"async\r\nbinary\x00payload".to_vec();
        assert!(client.set("round", &payload).await.unwrap());
        assert_eq!(client.get("round").await.unwrap(), Some(payload));
    }

    #[tokio::test]
    async fn add_on_existing_key_is_a_logical_negative() {
        let (addr, _) = spawn_cache_server();
        let client = AsyncClient::connect(&[addr]).unwrap();

        assert!(client.add("once", b"first").await.unwrap());
        assert!(!client.add("once", b"second").await.unwrap());
    }

    #[tokio::test]
    async fn miss_is_none_not_an_error() {
        let (addr, _) = spawn_cache_server();
        let client = AsyncClient::connect(&[addr]).unwrap();
        assert_eq!(client.get("never-stored").await.unwrap(), None);
    }

    #[tokio::test]
    async fn garbage_reply_is_an_invalid_response() {
        let addr = spawn_trickle_server(b"GARBAGE\r\n");
        let client = AsyncClient::connect(&[addr]).unwrap();
        let err = client.get("key").await.unwrap_err();
        assert!(matches!(err, Error::InvalidResponse { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let addr = spawn_silent_server();
        let client =
            AsyncClient::connect_with_timeout(&[addr], Duration::from_millis(300)).unwrap();

        let started = Instant::now();
        let err = client.set("key", b"value").await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }), "got {err:?}");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn concurrent_tasks_share_one_client() {
        let (addr, _) = spawn_cache_server();
        let client = Arc::new(AsyncClient::connect(&[addr]).unwrap());

        let mut handles = Vec::new();
        for i in 0..8 {
            let client = Arc::clone(&client);
            handles.push(tokio::spawn(async move {
                let key = format!("task:{i}");
                let value = format!("value for {i}").into_bytes();
                client.set(&key, &value).await.unwrap();
                (client.get(&key).await.unwrap(), value)
            }));
        }
        for handle in handles {
            let (got, expected) = handle.await.unwrap();
            assert_eq!(got, Some(expected));
        }
    }

    #[tokio::test]
    async fn flags_round_trip() {
        let (addr, _) = spawn_cache_server();
        let client = AsyncClient::connect(&[addr]).unwrap();

        assert!(client.set_with("flagged", b"payload", 7, 0).await.unwrap());
        assert_eq!(
            client.get_with_flags("flagged").await.unwrap(),
            Some((7, b"payload".to_vec()))
        );
    }
}
