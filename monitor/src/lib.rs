//! FIM Monitor - file integrity change detection.
//!
//! This crate watches a directory tree and records every file creation,
//! content modification and deletion as an immutable event, identified by
//! SHA-256 content digests.
//!
//! # Overview
//!
//! Raw filesystem notifications are repetitive and unordered, so they are not
//! reported directly. The [`pipeline::WatcherLoop`] digests each notified path,
//! compares it with the last known digest in the [`state::StateTable`], and
//! lets the [`classifier`] decide whether a real change happened. Metadata-only
//! touches and duplicate notifications produce nothing.
//!
//! Events are appended to the SQLite [`store::EventStore`] and forwarded to
//! console [`alert`]s. An optional [`replication`] task copies them to a
//! secondary store.
//!
//! # Modules
//!
//! - [`types`]: Event model
//! - [`digest`]: Chunked SHA-256 content digests
//! - [`state`]: Last known digest per path
//! - [`classifier`]: Notification + digest + state to change
//! - [`sink`]: The append-only event sink trait
//! - [`store`]: SQLite event store and dashboard queries
//! - [`watcher`]: Recursive filesystem subscription
//! - [`pipeline`]: The watcher loop
//! - [`retry`]: Backoff policy for appends and replication
//! - [`alert`]: Console alert lines
//! - [`replication`]: Optional forwarding to a secondary store
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types for monitor operations

pub mod alert;
pub mod classifier;
pub mod config;
pub mod digest;
pub mod error;
pub mod pipeline;
pub mod replication;
pub mod retry;
pub mod sink;
pub mod state;
pub mod store;
pub mod types;
pub mod watcher;

pub use classifier::{classify, Notification};
pub use config::{Config, ReplicationConfig};
pub use digest::{ChunkedSha256, Digester, DigestError};
pub use error::{MonitorError, Result};
pub use pipeline::{EmittedEvent, LoopPhase, LoopReport, WatcherLoop};
pub use replication::{ReplicationError, Replicator};
pub use retry::RetryPolicy;
pub use sink::{EventSink, SinkError};
pub use state::{FileStateTable, StateTable};
pub use store::{EventQuery, EventStore, StoreError};
pub use types::{Change, Digest, EventType, FileEvent, Provenance, StoredEvent};
pub use watcher::{FileWatcher, WatcherError};
