//! Error types for shardcache client operations

use thiserror::Error;

/// Result type alias for shardcache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error types for shardcache client operations
///
/// Logical negatives are not errors: a store refused with `NOT_STORED`
/// surfaces as `Ok(false)` and a cache miss as `Ok(None)`.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors (malformed server entry, empty pool)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Shard selection errors from a custom hash function
    #[error("Hash error: {message}")]
    Hash { message: String },

    /// Connection-related errors
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Operation timeout errors
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// I/O operation errors
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Buffer management errors (allocation failure, capacity exhausted,
    /// cursor misuse)
    #[error("Buffer error: {message}")]
    Buffer { message: String },

    /// Protocol-level errors reported by the server
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Invalid parameter errors
    #[error("Invalid parameter: {message}")]
    InvalidParameter { message: String },

    /// Invalid server response errors (malformed or unexpected framing)
    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },
}

impl Error {
    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config { message: msg.into() }
    }

    /// Create a hash error
    pub fn hash<S: Into<String>>(msg: S) -> Self {
        Error::Hash { message: msg.into() }
    }

    /// Create a connection error
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Error::Connection { message: msg.into() }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Error::Timeout { message: msg.into() }
    }

    /// Create a buffer error
    pub fn buffer<S: Into<String>>(msg: S) -> Self {
        Error::Buffer { message: msg.into() }
    }

    /// Create a protocol error
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Error::Protocol { message: msg.into() }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter<S: Into<String>>(msg: S) -> Self {
        Error::InvalidParameter { message: msg.into() }
    }

    /// Create an invalid response error
    pub fn invalid_response<S: Into<String>>(msg: S) -> Self {
        Error::InvalidResponse { message: msg.into() }
    }

    /// Create an I/O error
    pub fn io(err: std::io::Error) -> Self {
        Error::Io { source: err }
    }
}
