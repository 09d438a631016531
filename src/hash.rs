//! Key hashing and shard selection.
//!
//! Shard choice is a capability: anything implementing [`KeyHasher`] can
//! map a key to a server index, and the client accepts a user-supplied
//! implementation in place of the built-in one. A custom hasher that fails
//! or strays out of range surfaces as a hash error on the operation that
//! used it; it can never crash the client or corrupt the pool.

use crate::error::{Error, Result};

/// Maps keys to shard indices.
pub trait KeyHasher: Send + Sync {
    /// Returns the shard index for `key`, in `[0, nservers)`.
    ///
    /// `nservers` is always at least 1; the pool rejects selection on an
    /// empty server list before any hasher runs.
    fn shard(&self, key: &str, nservers: usize) -> Result<usize>;
}

/// The built-in hash: a 32-bit multiplicative string hash that folds the
/// accumulator's high nibble back into the low bits whenever it fills,
/// reduced modulo the server count. Deterministic and dependency-free, it
/// gives equal weight to every server.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultKeyHasher;

impl DefaultKeyHasher {
    fn hash_bytes(key: &[u8]) -> u32 {
        let mut h: u32 = 0;
        for &byte in key {
            h = (h << 4).wrapping_add(u32::from(byte));
            let g = h & 0xf000_0000;
            if g != 0 {
                h ^= g >> 24;
                h ^= g;
            }
        }
        h
    }
}

impl KeyHasher for DefaultKeyHasher {
    fn shard(&self, key: &str, nservers: usize) -> Result<usize> {
        if nservers == 0 {
            return Err(Error::config("no cache servers configured"));
        }
        Ok(Self::hash_bytes(key.as_bytes()) as usize % nservers)
    }
}

/// Adapter letting a plain function or closure serve as a [`KeyHasher`].
///
/// ```
/// use shardcache_client::{HashFn, KeyHasher};
///
/// let by_length = HashFn(|key: &str, nservers: usize| Ok(key.len() % nservers));
/// assert_eq!(by_length.shard("abcd", 3).unwrap(), 1);
/// ```
pub struct HashFn<F>(pub F);

impl<F> KeyHasher for HashFn<F>
where
    F: Fn(&str, usize) -> Result<usize> + Send + Sync,
{
    fn shard(&self, key: &str, nservers: usize) -> Result<usize> {
        (self.0)(key, nservers)
    }
}

/// Runs a hasher and enforces its contract: selection on an empty pool is
/// a configuration error, and a hasher that fails or strays out of
/// `[0, nservers)` yields a hash error instead of a bogus index.
pub(crate) fn checked_shard(
    hasher: &dyn KeyHasher,
    key: &str,
    nservers: usize,
) -> Result<usize> {
    if nservers == 0 {
        return Err(Error::config("no cache servers configured"));
    }
    let shard = hasher.shard(key, nservers).map_err(|e| match e {
        Error::Hash { .. } | Error::Config { .. } => e,
        other => Error::hash(format!("hash function failed: {other}")),
    })?;
    if shard >= nservers {
        return Err(Error::hash(format!(
            "hash function returned shard {shard}, valid range is 0..{nservers}"
        )));
    }
    Ok(shard)
}
