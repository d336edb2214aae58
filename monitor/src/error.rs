//! Error types for the FIM monitor.
//!
//! Each module owns a narrow error enum; [`MonitorError`] gathers them for
//! the binary and anything that drives several modules at once.

use thiserror::Error;

use crate::config::ConfigError;
use crate::digest::DigestError;
use crate::replication::ReplicationError;
use crate::sink::SinkError;
use crate::store::StoreError;
use crate::watcher::WatcherError;

/// Errors that can occur during monitor operations.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Configuration-related error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing or serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Subscribing to or reading from the watch directory failed.
    #[error("file watch error: {0}")]
    Watch(#[from] WatcherError),

    /// A digest could not be computed.
    #[error("digest error: {0}")]
    Digest(#[from] DigestError),

    /// The event sink rejected an event.
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// The event store failed outside the append path.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Replication to the secondary store failed.
    #[error("replication error: {0}")]
    Replication(#[from] ReplicationError),
}

/// A specialized `Result` type for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;
