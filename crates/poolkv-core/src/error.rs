//! Error types for PoolKV.

use std::fmt;

/// The main error type for PoolKV operations.
///
/// An absent key is never an error: lookups return `Ok(None)` and
/// removals return `Ok(false)`.
#[derive(Debug)]
pub enum Error {
    /// Malformed or missing configuration field
    Config(String),

    /// No backend is registered under the requested name
    UnknownBackend(String),

    /// Pool path unusable (permissions, layout, size mismatch on reopen)
    Pool(String),

    /// A mutation needs more capacity than the pool has left
    OutOfSpace {
        /// Bytes the pool would hold after the mutation
        requested: u64,
        /// Pool capacity in bytes
        available: u64,
    },

    /// Empty or otherwise disallowed key
    InvalidKey(String),

    /// Key filter pattern failed to compile
    InvalidPattern(String),

    /// Operation attempted on a closed engine
    Closed,

    /// Persistent state failed validation
    Corruption(String),

    /// Storage medium failure while reading or writing pool files
    Storage(String),

    /// I/O error
    Io(std::io::Error),

    /// Serialization/deserialization error
    Serialization(String),

    /// A lock was poisoned (internal error)
    LockPoisoned,
}

/// Discriminant of [`Error`] for programmatic matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`Error::Config`]
    Config,
    /// See [`Error::UnknownBackend`]
    UnknownBackend,
    /// See [`Error::Pool`] and [`Error::Corruption`]
    Pool,
    /// See [`Error::OutOfSpace`]
    OutOfSpace,
    /// See [`Error::InvalidKey`]
    InvalidKey,
    /// See [`Error::InvalidPattern`]
    InvalidPattern,
    /// See [`Error::Closed`]
    Closed,
    /// Storage, I/O, serialization and lock failures
    Internal,
}

impl Error {
    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Config,
            Error::UnknownBackend(_) => ErrorKind::UnknownBackend,
            Error::Pool(_) | Error::Corruption(_) => ErrorKind::Pool,
            Error::OutOfSpace { .. } => ErrorKind::OutOfSpace,
            Error::InvalidKey(_) => ErrorKind::InvalidKey,
            Error::InvalidPattern(_) => ErrorKind::InvalidPattern,
            Error::Closed => ErrorKind::Closed,
            Error::Storage(_)
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::LockPoisoned => ErrorKind::Internal,
        }
    }

    /// Returns true if the caller may retry after freeing space.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::OutOfSpace { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::UnknownBackend(name) => write!(f, "Unknown backend: {}", name),
            Error::Pool(msg) => write!(f, "Pool error: {}", msg),
            Error::OutOfSpace {
                requested,
                available,
            } => write!(
                f,
                "Out of space: {} bytes needed, pool capacity is {} bytes",
                requested, available
            ),
            Error::InvalidKey(msg) => write!(f, "Invalid key: {}", msg),
            Error::InvalidPattern(msg) => write!(f, "Invalid pattern: {}", msg),
            Error::Closed => write!(f, "Engine is closed"),
            Error::Corruption(msg) => write!(f, "Corruption: {}", msg),
            Error::Storage(msg) => write!(f, "Storage error: {}", msg),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::LockPoisoned => write!(f, "Lock poisoned"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

/// A specialized `Result` type for PoolKV operations.
pub type Result<T> = std::result::Result<T, Error>;
