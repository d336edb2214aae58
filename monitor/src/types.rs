//! Event types for file integrity monitoring.
//!
//! This module defines the records that flow out of the change-detection
//! pipeline: the classifier's [`Change`], the persisted [`FileEvent`], and the
//! [`StoredEvent`] read back from the event store. All types serialize to
//! snake_case JSON.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// Kind of transition recorded by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Created,
    Modified,
    Deleted,
}

impl EventType {
    /// All event types, in display order.
    pub const ALL: [EventType; 3] = [Self::Created, Self::Modified, Self::Deleted];

    /// The upper-case name used in storage and alerts.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Modified => "MODIFIED",
            Self::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name an event type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown event type: {0}")]
pub struct ParseEventTypeError(pub String);

impl FromStr for EventType {
    type Err = ParseEventTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CREATED" => Ok(Self::Created),
            "MODIFIED" => Ok(Self::Modified),
            "DELETED" => Ok(Self::Deleted),
            _ => Err(ParseEventTypeError(s.to_string())),
        }
    }
}

/// Lower-case hex SHA-256 of a file's content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Wraps an already-encoded hex digest.
    #[must_use]
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Returns the hex encoding.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A classified transition of a single file.
///
/// Each variant carries exactly the hashes its event type allows: a creation
/// has no prior content and a deletion has no resulting content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Created {
        path: PathBuf,
        hash_after: Digest,
    },
    Modified {
        path: PathBuf,
        hash_before: Digest,
        hash_after: Digest,
    },
    Deleted {
        path: PathBuf,
        hash_before: Digest,
    },
}

impl Change {
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Created { .. } => EventType::Created,
            Self::Modified { .. } => EventType::Modified,
            Self::Deleted { .. } => EventType::Deleted,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Created { path, .. } | Self::Modified { path, .. } | Self::Deleted { path, .. } => {
                path
            }
        }
    }
}

/// Where an event was observed.
///
/// Resolved once at startup and attached unchanged to every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Configured endpoint name for this agent.
    pub endpoint: String,
    /// Host the monitor runs on.
    pub hostname: String,
    /// Account the monitor runs as.
    pub username: String,
}

impl Provenance {
    #[must_use]
    pub fn new(endpoint: String, hostname: String, username: String) -> Self {
        Self {
            endpoint,
            hostname,
            username,
        }
    }

    /// Builds provenance for the current host and user.
    #[must_use]
    pub fn detect(endpoint: String) -> Self {
        Self::new(endpoint, current_hostname(), whoami::username())
    }
}

/// Gets the system hostname, falling back to "unknown" if it cannot be determined.
#[must_use]
pub fn current_hostname() -> String {
    gethostname::gethostname()
        .into_string()
        .unwrap_or_else(|_| "unknown".to_string())
}

/// An immutable record of one file transition.
///
/// `hash_before` is absent exactly for [`EventType::Created`] and `hash_after`
/// exactly for [`EventType::Deleted`]. Build it with [`FileEvent::from_change`]
/// so that holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    pub event_type: EventType,
    #[serde(serialize_with = "serialize_path_lossy")]
    pub file_path: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub endpoint: String,
    pub hostname: String,
    pub username: String,
    pub hash_before: Option<Digest>,
    pub hash_after: Option<Digest>,
}

impl FileEvent {
    /// Stamps a classified change with provenance and detection time.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::path::PathBuf;
    /// use chrono::Utc;
    /// use fim_monitor::types::{Change, Digest, EventType, FileEvent, Provenance};
    ///
    /// let change = Change::Deleted {
    ///     path: PathBuf::from("/watched/a.txt"),
    ///     hash_before: Digest::from_hex("ab"),
    /// };
    /// let provenance = Provenance::new("agent".into(), "host".into(), "user".into());
    /// let event = FileEvent::from_change(change, &provenance, Utc::now());
    ///
    /// assert_eq!(event.event_type, EventType::Deleted);
    /// assert!(event.hash_after.is_none());
    /// ```
    #[must_use]
    pub fn from_change(change: Change, provenance: &Provenance, timestamp: DateTime<Utc>) -> Self {
        let event_type = change.event_type();
        let (file_path, hash_before, hash_after) = match change {
            Change::Created { path, hash_after } => (path, None, Some(hash_after)),
            Change::Modified {
                path,
                hash_before,
                hash_after,
            } => (path, Some(hash_before), Some(hash_after)),
            Change::Deleted { path, hash_before } => (path, Some(hash_before), None),
        };

        Self {
            event_type,
            file_path,
            timestamp,
            endpoint: provenance.endpoint.clone(),
            hostname: provenance.hostname.clone(),
            username: provenance.username.clone(),
            hash_before,
            hash_after,
        }
    }
}

/// Serializes a path as a string, replacing bytes that are not UTF-8 with
/// U+FFFD instead of failing.
///
/// # Errors
///
/// Only errors the serializer itself reports.
pub fn serialize_path_lossy<S>(path: &Path, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&path.to_string_lossy())
}

/// A [`FileEvent`] as held by the event store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Auto-incrementing store identity.
    pub id: i64,
    /// Whether a replication task has forwarded this event.
    pub synced: bool,
    #[serde(flatten)]
    pub event: FileEvent,
}
