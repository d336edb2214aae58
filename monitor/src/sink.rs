//! The pipeline's single persistence dependency.

use thiserror::Error;

use crate::store::StoreError;
use crate::types::FileEvent;

/// Errors from appending an event.
#[derive(Error, Debug)]
pub enum SinkError {
    /// The event was not persisted. The sink stays usable for later calls.
    #[error("failed to write event: {0}")]
    Write(#[from] StoreError),
}

/// Durable, append-only destination for classified events.
///
/// Implementations serialize their own physical writes, so `append` may be
/// called from several threads at once.
pub trait EventSink: Send + Sync {
    /// Appends `event`, returning its store identity.
    ///
    /// Once this returns `Ok`, the event is durable and visible to readers.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Write`] if the event could not be recorded.
    fn append(&self, event: &FileEvent) -> Result<i64, SinkError>;
}
