//! Error types for the core layer.

use thiserror::Error;
use vstore_extent::ExtentError;

/// Errors at the core layer.
///
/// `Unsupported` is not fatal: it means a class does not implement an
/// operation, and callers are expected to check for it and fall back.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed run list, encoding, name or flags.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// The store's class does not implement this operation.
    #[error("operation not supported: {operation}")]
    Unsupported { operation: &'static str },

    /// Backend I/O failure, including any access to a hole.
    #[error("i/o error: {message}")]
    Io { message: String },

    /// An address lies outside the store.
    #[error("address {addr} out of range (end {end})")]
    AddressOutOfRange { addr: i64, end: i64 },

    /// An allocation could not be satisfied.
    #[error("out of memory")]
    NoMemory,

    /// A name is already registered.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A named resource could not be found or reacquired.
    #[error("not found: {0}")]
    NotFound(String),

    /// The store refuses modification.
    #[error("store is read-only")]
    ReadOnly,

    /// The store's backend type is not understood locally.
    #[error("unsupported store type: {0}")]
    UnsupportedFileType(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn unsupported(operation: &'static str) -> Self {
        Error::Unsupported { operation }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Error::Io {
            message: message.into(),
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::Unsupported { .. })
    }
}

impl From<ExtentError> for Error {
    fn from(e: ExtentError) -> Self {
        match e {
            ExtentError::OutOfRange { addr, end } => Error::AddressOutOfRange { addr, end },
            ExtentError::SpansWrap { .. } => Error::Unsupported {
                operation: "remap across a wrap boundary",
            },
            other => Error::invalid(other.to_string()),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(e.to_string()),
            std::io::ErrorKind::OutOfMemory => Error::NoMemory,
            std::io::ErrorKind::PermissionDenied => Error::ReadOnly,
            _ => Error::io(e.to_string()),
        }
    }
}
