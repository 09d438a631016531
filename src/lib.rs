//! # Shardcache Rust Client Library
//!
//! This library provides both synchronous and asynchronous clients for
//! memcached-compatible cache clusters. Keys are sharded across a pool of
//! servers by a pluggable hash function, and values travel as opaque byte
//! payloads over the standard cache text protocol.
//!
//! # Features
//!
//! - **Synchronous Client**: Simple, blocking operations perfect for scripts and simple applications
//! - **Asynchronous Client**: Non-blocking operations over tokio with per-shard connection serialization
//! - **Sharding**: Deterministic key-to-server hashing with a pluggable hash function
//! - **Lazy Connections**: Each server's connection opens on first use and reconnects after failures
//! - **Binary-Safe Payloads**: Values are opaque bytes; the client never interprets them
//! - **Error Handling**: Comprehensive error types with detailed context
//! - **Timeout Control**: One configurable bound covers connects, reads, and writes
//!
//! # Quick Start
//!
//! ## Synchronous Client
//!
//! ```rust,no_run
//! use shardcache_client::{Client, Result};
//!
//! fn main() -> Result<()> {
//!     let mut client = Client::connect(&["127.0.0.1:11211", "127.0.0.1:11212"])?;
//!
//!     // Store a value (unconditionally)
//!     client.set("hello", b"world")?;
//!
//!     // Fetch it back; a miss is Ok(None), not an error
//!     if let Some(value) = client.get("hello")? {
//!         println!("Value: {}", String::from_utf8_lossy(&value));
//!     }
//!
//!     // Conditional stores report refusal as Ok(false)
//!     let added = client.add("hello", b"again")?;
//!     println!("Added: {}", added); // Output: Added: false
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Asynchronous Client
//!
//! ```rust,no_run
//! use shardcache_client::{AsyncClient, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = AsyncClient::connect(&["127.0.0.1:11211"])?;
//!
//!     client.set("async_hello", b"async_world").await?;
//!
//!     let value = client.get("async_hello").await?;
//!     assert_eq!(value.as_deref(), Some(&b"async_world"[..]));
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Custom Sharding
//!
//! ```rust,no_run
//! use shardcache_client::{Client, Result};
//!
//! # fn main() -> Result<()> {
//! let mut client = Client::connect(&["a.cache:11211", "b.cache:11211"])?;
//!
//! // Route keys by their prefix instead of the built-in hash.
//! client.set_hash_fn(|key, nservers| {
//!     Ok(if key.starts_with("sessions:") { 0 } else { 1 % nservers })
//! });
//! # Ok(())
//! # }
//! ```

pub mod error;

mod async_client;
mod buffer;
mod client;
mod hash;
mod pool;
mod protocol;
mod sock;

// Re-export main types
pub use async_client::AsyncClient;
pub use client::{Client, ClientConfig, DEFAULT_TIMEOUT};
pub use error::{Error, Result};
pub use hash::{DefaultKeyHasher, HashFn, KeyHasher};
pub use protocol::{Response, StoreKind};
