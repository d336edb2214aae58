//! Turns raw filesystem notifications into classified changes.
//!
//! Notification streams are unreliable: they repeat, coalesce, and arrive out
//! of order. [`classify`] gives every notification a defined outcome against
//! the current [`StateTable`], which may simply be "no event".
//!
//! | Notification | Prior record | Digest | Outcome |
//! |--------------|--------------|--------|---------|
//! | `Appeared` / `Changed` | any | unreadable | nothing |
//! | `Appeared` / `Changed` | none | `h` | `Created(h)` |
//! | `Appeared` / `Changed` | `h` | `h` | nothing (metadata-only touch) |
//! | `Appeared` / `Changed` | `h1` | `h2` | `Modified(h1 → h2)` |
//! | `Removed` | `h` | - | `Deleted(h)` |
//! | `Removed` | none | - | nothing |
//!
//! An unreadable `Changed` keeps its record: the file is about to disappear,
//! and the `Removed` that follows reports the last known hash.
//!
//! A `Removed` for an untracked path may name a directory that was moved or
//! deleted as a whole; [`removed_subtree`] reports the files it held.

use std::path::{Path, PathBuf};

use tracing::trace;

use crate::digest::DigestError;
use crate::state::StateTable;
use crate::types::{Change, Digest};

/// A raw filesystem signal for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Appeared(PathBuf),
    Changed(PathBuf),
    Removed(PathBuf),
}

impl Notification {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Appeared(path) | Self::Changed(path) | Self::Removed(path) => path,
        }
    }

    /// Whether classification needs the file's current digest.
    #[must_use]
    pub fn needs_digest(&self) -> bool {
        !matches!(self, Self::Removed(_))
    }
}

/// Classifies `notification` against `state`, updating it in place.
///
/// `reading` is the result of digesting the path just after the notification
/// arrived; it is ignored for [`Notification::Removed`] and may be `None`
/// there. A missing reading for the other kinds counts as unreadable.
///
/// # Example
///
/// ```
/// use std::path::PathBuf;
/// use fim_monitor::classifier::{classify, Notification};
/// use fim_monitor::state::FileStateTable;
/// use fim_monitor::types::{Digest, EventType};
///
/// let mut table = FileStateTable::new();
/// let path = PathBuf::from("/watched/a.txt");
///
/// let change = classify(&mut table, &Notification::Appeared(path.clone()), Some(Ok(Digest::from_hex("aa"))));
/// assert_eq!(change.unwrap().event_type(), EventType::Created);
///
/// let touch = classify(&mut table, &Notification::Changed(path), Some(Ok(Digest::from_hex("aa"))));
/// assert!(touch.is_none());
/// ```
pub fn classify<S: StateTable + ?Sized>(
    state: &mut S,
    notification: &Notification,
    reading: Option<Result<Digest, DigestError>>,
) -> Option<Change> {
    match notification {
        Notification::Appeared(path) | Notification::Changed(path) => {
            let digest = match reading {
                Some(Ok(digest)) => digest,
                Some(Err(e)) => {
                    trace!(path = %path.display(), error = %e, "Content not readable, no event");
                    return None;
                }
                None => return None,
            };
            classify_content(state, path, digest)
        }
        Notification::Removed(path) => match state.remove(path) {
            Some(hash_before) => Some(Change::Deleted {
                path: path.clone(),
                hash_before,
            }),
            None => {
                trace!(path = %path.display(), "Removal of untracked path, no event");
                None
            }
        },
    }
}

/// Deletes every tracked file below `dir`, in path order.
///
/// Returns nothing when `dir` held no tracked files, including when it was
/// a plain file.
///
/// ```
/// use std::path::{Path, PathBuf};
/// use fim_monitor::classifier::removed_subtree;
/// use fim_monitor::state::{FileStateTable, StateTable};
/// use fim_monitor::types::Digest;
///
/// let mut table = FileStateTable::from_records(vec![
///     (PathBuf::from("/w/docs/a.txt"), Digest::from_hex("aa")),
///     (PathBuf::from("/w/other.txt"), Digest::from_hex("bb")),
/// ]);
///
/// let changes = removed_subtree(&mut table, Path::new("/w/docs"));
/// assert_eq!(changes.len(), 1);
/// assert_eq!(table.len(), 1);
/// ```
pub fn removed_subtree<S: StateTable + ?Sized>(state: &mut S, dir: &Path) -> Vec<Change> {
    let removed = state.remove_under(dir);
    if !removed.is_empty() {
        trace!(dir = %dir.display(), files = removed.len(), "Directory removed");
    }
    removed
        .into_iter()
        .map(|(path, hash_before)| Change::Deleted { path, hash_before })
        .collect()
}

/// Compares freshly read content with the last known digest.
fn classify_content<S: StateTable + ?Sized>(
    state: &mut S,
    path: &Path,
    digest: Digest,
) -> Option<Change> {
    match state.lookup(path) {
        None => {
            state.set(path, digest.clone());
            Some(Change::Created {
                path: path.to_path_buf(),
                hash_after: digest,
            })
        }
        Some(previous) if previous == digest => {
            trace!(path = %path.display(), "Content unchanged, no event");
            None
        }
        Some(previous) => {
            state.set(path, digest.clone());
            Some(Change::Modified {
                path: path.to_path_buf(),
                hash_before: previous,
                hash_after: digest,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::FileStateTable;
    use crate::types::EventType;
    use std::io;

    fn digest(hex: &str) -> Option<Result<Digest, DigestError>> {
        Some(Ok(Digest::from_hex(hex)))
    }

    fn unreadable(path: &Path) -> Option<Result<Digest, DigestError>> {
        Some(Err(DigestError::NotReadable {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotFound, "gone"),
        }))
    }

    fn path() -> PathBuf {
        PathBuf::from("/a/f.txt")
    }

    #[test]
    fn appeared_without_record_is_created() {
        let mut table = FileStateTable::new();

        let change = classify(&mut table, &Notification::Appeared(path()), digest("h1"));

        assert_eq!(
            change,
            Some(Change::Created {
                path: path(),
                hash_after: Digest::from_hex("h1"),
            })
        );
        assert_eq!(table.lookup(&path()), Some(Digest::from_hex("h1")));
    }

    #[test]
    fn appeared_but_unreadable_is_noise() {
        let mut table = FileStateTable::new();

        let change = classify(&mut table, &Notification::Appeared(path()), unreadable(&path()));

        assert!(change.is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn appeared_with_record_and_new_content_is_modified() {
        let mut table = FileStateTable::new();
        table.set(&path(), Digest::from_hex("h1"));

        let change = classify(&mut table, &Notification::Appeared(path()), digest("h2"));

        assert_eq!(change.map(|c| c.event_type()), Some(EventType::Modified));
        assert_eq!(table.lookup(&path()), Some(Digest::from_hex("h2")));
    }

    #[test]
    fn appeared_with_record_and_same_content_is_suppressed() {
        let mut table = FileStateTable::new();
        table.set(&path(), Digest::from_hex("h1"));

        assert!(classify(&mut table, &Notification::Appeared(path()), digest("h1")).is_none());
    }

    #[test]
    fn changed_with_same_digest_is_suppressed() {
        let mut table = FileStateTable::new();
        table.set(&path(), Digest::from_hex("h1"));

        let change = classify(&mut table, &Notification::Changed(path()), digest("h1"));

        assert!(change.is_none());
        assert_eq!(table.lookup(&path()), Some(Digest::from_hex("h1")));
    }

    #[test]
    fn changed_with_new_digest_is_modified() {
        let mut table = FileStateTable::new();
        table.set(&path(), Digest::from_hex("h1"));

        let change = classify(&mut table, &Notification::Changed(path()), digest("h2"));

        assert_eq!(
            change,
            Some(Change::Modified {
                path: path(),
                hash_before: Digest::from_hex("h1"),
                hash_after: Digest::from_hex("h2"),
            })
        );
        assert_eq!(table.lookup(&path()), Some(Digest::from_hex("h2")));
    }

    #[test]
    fn changed_without_record_is_created() {
        let mut table = FileStateTable::new();

        let change = classify(&mut table, &Notification::Changed(path()), digest("h1"));

        assert_eq!(change.map(|c| c.event_type()), Some(EventType::Created));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn changed_but_unreadable_keeps_record_for_deletion() {
        let mut table = FileStateTable::new();
        table.set(&path(), Digest::from_hex("h1"));

        assert!(classify(&mut table, &Notification::Changed(path()), unreadable(&path())).is_none());
        assert_eq!(table.lookup(&path()), Some(Digest::from_hex("h1")));

        let change = classify(&mut table, &Notification::Removed(path()), None);
        assert_eq!(
            change,
            Some(Change::Deleted {
                path: path(),
                hash_before: Digest::from_hex("h1"),
            })
        );
    }

    #[test]
    fn missing_reading_counts_as_unreadable() {
        let mut table = FileStateTable::new();
        assert!(classify(&mut table, &Notification::Changed(path()), None).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn removed_with_record_is_deleted_and_forgotten() {
        let mut table = FileStateTable::new();
        table.set(&path(), Digest::from_hex("h9"));

        let change = classify(&mut table, &Notification::Removed(path()), None);

        assert_eq!(
            change,
            Some(Change::Deleted {
                path: path(),
                hash_before: Digest::from_hex("h9"),
            })
        );
        assert!(table.lookup(&path()).is_none());
    }

    #[test]
    fn removed_without_record_is_suppressed() {
        let mut table = FileStateTable::new();
        assert!(classify(&mut table, &Notification::Removed(path()), None).is_none());
    }

    #[test]
    fn duplicate_removal_emits_once() {
        let mut table = FileStateTable::new();
        table.set(&path(), Digest::from_hex("h1"));

        assert!(classify(&mut table, &Notification::Removed(path()), None).is_some());
        assert!(classify(&mut table, &Notification::Removed(path()), None).is_none());
    }

    #[test]
    fn create_touch_remove_yields_created_then_deleted() {
        let mut table = FileStateTable::new();
        let notifications = [
            (Notification::Appeared(path()), digest("h1")),
            (Notification::Changed(path()), digest("h1")),
            (Notification::Removed(path()), None),
        ];

        let types: Vec<EventType> = notifications
            .into_iter()
            .filter_map(|(n, reading)| classify(&mut table, &n, reading))
            .map(|c| c.event_type())
            .collect();

        assert_eq!(types, vec![EventType::Created, EventType::Deleted]);
    }

    #[test]
    fn distinct_paths_do_not_interfere() {
        let mut table = FileStateTable::new();
        let a = PathBuf::from("/a/one");
        let b = PathBuf::from("/a/two");

        classify(&mut table, &Notification::Appeared(a.clone()), digest("x"));
        let change = classify(&mut table, &Notification::Appeared(b.clone()), digest("x"));

        assert_eq!(change.map(|c| c.event_type()), Some(EventType::Created));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn removed_subtree_deletes_descendants_only() {
        let mut table = FileStateTable::new();
        table.set(Path::new("/w/sub/a"), Digest::from_hex("h1"));
        table.set(Path::new("/w/sub/b"), Digest::from_hex("h2"));
        table.set(Path::new("/w/subway/c"), Digest::from_hex("h3"));

        let changes = removed_subtree(&mut table, Path::new("/w/sub"));

        assert_eq!(
            changes,
            vec![
                Change::Deleted {
                    path: PathBuf::from("/w/sub/a"),
                    hash_before: Digest::from_hex("h1"),
                },
                Change::Deleted {
                    path: PathBuf::from("/w/sub/b"),
                    hash_before: Digest::from_hex("h2"),
                },
            ]
        );
        assert_eq!(table.len(), 1);
        assert!(removed_subtree(&mut table, Path::new("/w/sub")).is_empty());
    }

    #[test]
    fn notification_accessors() {
        assert!(Notification::Appeared(path()).needs_digest());
        assert!(Notification::Changed(path()).needs_digest());
        assert!(!Notification::Removed(path()).needs_digest());
        assert_eq!(Notification::Removed(path()).path(), path().as_path());
    }
}
