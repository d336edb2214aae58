//! Filesystem notification source for the watched directory.
//!
//! This module subscribes to a directory tree with the [`notify`] crate and
//! turns its events into [`Notification`]s for the watcher loop.
//!
//! # Architecture
//!
//! The notify callback is kept lightweight: it maps each raw event to zero or
//! more notifications, drops editor noise, and pushes the rest into a bounded
//! channel. Digesting and classification happen on the
//! receiving side. The callback runs on notify's own thread and uses
//! `blocking_send`, so a full channel slows the watcher down instead of losing
//! notifications.
//!
//! Renames are reported as a removal of the old path followed by an
//! appearance of the new one. A directory that appears (created, or moved in)
//! is walked and each regular file below it is reported as appeared; a
//! directory that goes away is reported as removed once, and the watcher loop
//! deletes whatever it tracked below it.
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use tokio::sync::mpsc;
//! use fim_monitor::classifier::Notification;
//! use fim_monitor::watcher::FileWatcher;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (tx, mut rx) = mpsc::channel(1024);
//!     let _watcher = FileWatcher::new(PathBuf::from("/srv/watched"), tx)?;
//!
//!     while let Some(notification) = rx.recv().await {
//!         match notification {
//!             Notification::Appeared(path) => println!("appeared: {:?}", path),
//!             Notification::Changed(path) => println!("changed: {:?}", path),
//!             Notification::Removed(path) => println!("removed: {:?}", path),
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use notify::{
    event::{ModifyKind, RenameMode},
    Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};
use walkdir::WalkDir;

use crate::classifier::Notification;

/// Errors that can occur while subscribing to the watch directory.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// Failed to initialize the filesystem watcher or subscribe to the directory.
    #[error("failed to create watcher: {0}")]
    WatcherInit(#[from] notify::Error),

    /// The watch directory does not exist.
    #[error("watch directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),

    /// The watch path exists but is not a directory.
    #[error("watch path is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Resolving the watch directory failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The watcher loop was run before it had a notification source.
    #[error("watcher loop is not subscribed to a notification source")]
    NotSubscribed,

    /// The watcher loop already has a notification source, or has stopped.
    #[error("watcher loop is not idle")]
    NotIdle,
}

/// Result type for watcher operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Live recursive subscription to a directory tree.
///
/// Dropping the watcher ends the subscription; no further notifications are
/// sent after that.
#[derive(Debug)]
pub struct FileWatcher {
    /// Kept alive to maintain the subscription.
    #[allow(dead_code)]
    watcher: RecommendedWatcher,

    /// Canonical path of the watched root.
    watch_dir: PathBuf,
}

impl FileWatcher {
    /// Subscribes to `watch_dir` recursively, sending notifications to `sender`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory does not exist, is not a directory,
    /// or cannot be subscribed to (for example, missing permissions).
    pub fn new(watch_dir: PathBuf, sender: mpsc::Sender<Notification>) -> Result<Self> {
        if !watch_dir.exists() {
            return Err(WatcherError::DirectoryNotFound(watch_dir));
        }
        if !watch_dir.is_dir() {
            return Err(WatcherError::NotADirectory(watch_dir));
        }
        let watch_dir = fs::canonicalize(&watch_dir)?;

        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| {
                handle_notify_event(res, &sender);
            },
            Config::default(),
        )?;
        watcher.watch(&watch_dir, RecursiveMode::Recursive)?;

        info!(watch_dir = %watch_dir.display(), "Started recursive file watch");

        Ok(Self { watcher, watch_dir })
    }

    /// Returns the canonical directory being watched.
    #[must_use]
    pub fn watch_dir(&self) -> &Path {
        &self.watch_dir
    }
}

/// Handles one callback from notify.
fn handle_notify_event(
    res: std::result::Result<Event, notify::Error>,
    sender: &mpsc::Sender<Notification>,
) {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            error!(error = %e, "File watcher error");
            return;
        }
    };

    trace!(kind = ?event.kind, paths = ?event.paths, "Received notify event");

    for notification in notifications_for(&event) {
        if sender.blocking_send(notification).is_err() {
            debug!("Notification channel closed, dropping event");
            return;
        }
    }
}

/// Maps a raw notify event to the notifications the classifier understands.
///
/// Ignored names never produce a notification. An appeared directory expands
/// to its files; a changed one produces nothing.
pub(crate) fn notifications_for(event: &Event) -> Vec<Notification> {
    let mapped: Vec<Notification> = match event.kind {
        EventKind::Create(_) => event.paths.iter().cloned().map(Notification::Appeared).collect(),

        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            event.paths.iter().cloned().map(Notification::Removed).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.iter().cloned().map(Notification::Appeared).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
            [from, to] => vec![
                Notification::Removed(from.clone()),
                Notification::Appeared(to.clone()),
            ],
            _ => Vec::new(),
        },
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|path| {
                if path.exists() {
                    Notification::Appeared(path.clone())
                } else {
                    Notification::Removed(path.clone())
                }
            })
            .collect(),

        EventKind::Modify(_) => event.paths.iter().cloned().map(Notification::Changed).collect(),

        EventKind::Remove(_) => event.paths.iter().cloned().map(Notification::Removed).collect(),

        _ => {
            trace!(kind = ?event.kind, "Ignoring event kind");
            Vec::new()
        }
    };

    mapped
        .into_iter()
        .filter(|n| !is_ignored(n.path()))
        .flat_map(expand_directory)
        .collect()
}

fn expand_directory(notification: Notification) -> Vec<Notification> {
    match notification {
        Notification::Appeared(dir) if dir.is_dir() => files_under(&dir)
            .into_iter()
            .map(Notification::Appeared)
            .collect(),
        Notification::Changed(dir) if dir.is_dir() => Vec::new(),
        other => vec![other],
    }
}

/// Regular files below `dir`, skipping ignored names and not following
/// symlinks.
fn files_under(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_ignored(entry.path()))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!(error = %e, "Skipping unreadable entry in new directory");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .collect()
}

/// Returns true for editor swap files, backups, hidden files and bytecode
/// caches, which are never reported.
#[must_use]
pub fn is_ignored(path: &Path) -> bool {
    if path
        .components()
        .any(|c| c.as_os_str() == "__pycache__")
    {
        return true;
    }

    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };

    name.starts_with('.')
        || name.ends_with('~')
        || [".swp", ".swo", ".pyc", ".pyo"]
            .iter()
            .any(|ext| name.ends_with(ext))
}
