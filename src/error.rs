use std::str::Utf8Error;

use packed_struct::PackingError;

/// When things go awry
#[derive(Debug)]
pub enum VaultaireError {
    /// Failed to bring up the object-store connection or pool
    StartupError(String),
    /// A `stat`/`read_full`/lock call against the object store failed
    StoreError(String),
    /// The day-map cache for an origin is inconsistent with the store
    CacheInconsistent(String),
    /// A lock lease watchdog fired
    LockWatchdog(String),
    BytePackingError(String),
    IoError(std::io::Error),
    Utf8Error(Utf8Error),
    /// LZ4 compression produced no output, or decompression failed
    CompressionError(String),
    /// Malformed wire bytes from a client request
    WireDecodeError(String),
    /// Failed to send across a tokio channel
    SendError(String),
    /// A linked task panicked or returned an error; carries the task name
    LinkedTaskFailure(String),
    ConfigError(String),
    Generic(String),
}

impl From<std::io::Error> for VaultaireError {
    fn from(error: std::io::Error) -> Self {
        VaultaireError::IoError(error)
    }
}

impl From<PackingError> for VaultaireError {
    fn from(error: PackingError) -> Self {
        VaultaireError::BytePackingError(error.to_string())
    }
}

impl From<Utf8Error> for VaultaireError {
    fn from(error: Utf8Error) -> Self {
        VaultaireError::Utf8Error(error)
    }
}

impl From<config::ConfigError> for VaultaireError {
    fn from(error: config::ConfigError) -> Self {
        VaultaireError::ConfigError(error.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for VaultaireError {
    fn from(error: tokio::sync::mpsc::error::SendError<T>) -> Self {
        VaultaireError::SendError(error.to_string())
    }
}

impl From<VaultaireError> for std::io::Error {
    fn from(error: VaultaireError) -> Self {
        match error {
            VaultaireError::IoError(err) => err,
            _ => std::io::Error::other(format!("{error:?}")),
        }
    }
}

impl std::fmt::Display for VaultaireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for VaultaireError {}
