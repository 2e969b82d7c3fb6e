//! Error types for Redis operations

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for Redis operations
pub type RedisResult<T> = Result<T, RedisError>;

/// Every failure a caller of the pool, executor or pipeline can observe.
///
/// The variants fall into four groups that callers are expected to branch on:
///
/// - configuration problems ([`RedisError::Config`]), raised only while a
///   client is being constructed;
/// - pool conditions ([`RedisError::PoolExhausted`], [`RedisError::PoolClosed`]);
/// - transport failures ([`RedisError::Io`], [`RedisError::Connection`],
///   [`RedisError::Protocol`], [`RedisError::Timeout`]), which invalidate the
///   connection they happened on (see [`RedisError::is_transport`]);
/// - domain conditions ([`RedisError::Server`], [`RedisError::NotOk`],
///   [`RedisError::Nil`]), which are well-formed answers from the store and
///   leave the connection usable.
#[derive(Error, Debug)]
pub enum RedisError {
    /// IO error during network operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Protocol parsing error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// A socket read or write exceeded the operation timeout
    #[error("Operation timed out")]
    Timeout,

    /// Server returned an error reply
    #[error("Server error: {0}")]
    Server(String),

    /// The store answered, but not with the expected `OK` marker
    #[error("Not OK: server replied {0}")]
    NotOk(String),

    /// The key is absent or the reply carried no data
    #[error("Nil value")]
    Nil,

    /// Type conversion error
    #[error("Type conversion error: {0}")]
    Type(String),

    /// Unexpected response from server
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// No connection became available within the wait budget
    #[error("Connection pool exhausted after waiting {0:?}")]
    PoolExhausted(Duration),

    /// The pool has been shut down
    #[error("Connection pool is closed")]
    PoolClosed,

    /// The pipeline has been closed
    #[error("Pipeline is closed")]
    PipelineClosed,

    /// Every attempt of a pipelined batch failed at the transport level
    #[error("Pipeline failed after {attempts} attempt(s): {source}")]
    PipelineFailed {
        /// Number of attempts made
        attempts: usize,
        /// Error of the last attempt
        #[source]
        source: Box<RedisError>,
    },
}

impl RedisError {
    /// Whether this error came from the connection itself rather than from
    /// the store's answer. A connection that produced such an error must not
    /// be reused.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Connection(_) | Self::Protocol(_) | Self::Timeout
        )
    }

    /// Check if this is the nil sentinel
    #[must_use]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Check if this is the not-OK sentinel
    #[must_use]
    pub const fn is_not_ok(&self) -> bool {
        matches!(self, Self::NotOk(_))
    }

    /// Check if the pool wait budget elapsed
    #[must_use]
    pub const fn is_pool_exhausted(&self) -> bool {
        matches!(self, Self::PoolExhausted(_))
    }

    /// Copy of this error suitable for attributing to several results.
    ///
    /// `io::Error` is not `Clone`, so the copy keeps its kind and message.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        match self {
            Self::Io(e) => Self::Io(io::Error::new(e.kind(), e.to_string())),
            Self::Protocol(m) => Self::Protocol(m.clone()),
            Self::Connection(m) => Self::Connection(m.clone()),
            Self::Timeout => Self::Timeout,
            Self::Server(m) => Self::Server(m.clone()),
            Self::NotOk(m) => Self::NotOk(m.clone()),
            Self::Nil => Self::Nil,
            Self::Type(m) => Self::Type(m.clone()),
            Self::UnexpectedResponse(m) => Self::UnexpectedResponse(m.clone()),
            Self::Config(m) => Self::Config(m.clone()),
            Self::Auth(m) => Self::Auth(m.clone()),
            Self::PoolExhausted(d) => Self::PoolExhausted(*d),
            Self::PoolClosed => Self::PoolClosed,
            Self::PipelineClosed => Self::PipelineClosed,
            Self::PipelineFailed { attempts, source } => Self::PipelineFailed {
                attempts: *attempts,
                source: Box::new(source.duplicate()),
            },
        }
    }
}
