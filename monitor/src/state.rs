//! Last-known content hash per file.
//!
//! The table is owned by value by the watcher loop, which is its only writer.
//! Nothing here is shared or locked; handing the table to a second task means
//! moving it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::types::Digest;

/// Per-path memory of the last successfully computed digest.
///
/// Implemented by [`FileStateTable`]; tests may supply their own.
pub trait StateTable {
    /// Returns the last known digest for `path`, if any.
    fn lookup(&self, path: &Path) -> Option<Digest>;

    /// Records `digest` as the current content of `path`.
    fn set(&mut self, path: &Path, digest: Digest);

    /// Forgets `path`, returning its last digest.
    fn remove(&mut self, path: &Path) -> Option<Digest>;

    /// Forgets every path strictly below the directory `dir`, returning them
    /// sorted by path.
    fn remove_under(&mut self, dir: &Path) -> Vec<(PathBuf, Digest)>;

    /// Number of tracked paths.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory [`StateTable`] keyed by absolute path.
#[derive(Debug, Default, Clone)]
pub struct FileStateTable {
    records: HashMap<PathBuf, Digest>,
}

impl FileStateTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the table from `(path, digest)` pairs, e.g. the last persisted
    /// hash of every file the event store still considers present.
    #[must_use]
    pub fn from_records(records: impl IntoIterator<Item = (PathBuf, Digest)>) -> Self {
        Self {
            records: records.into_iter().collect(),
        }
    }

    /// Iterates over tracked paths in no particular order.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.records.keys().map(PathBuf::as_path)
    }
}

impl StateTable for FileStateTable {
    fn lookup(&self, path: &Path) -> Option<Digest> {
        self.records.get(path).cloned()
    }

    fn set(&mut self, path: &Path, digest: Digest) {
        self.records.insert(path.to_path_buf(), digest);
    }

    fn remove(&mut self, path: &Path) -> Option<Digest> {
        self.records.remove(path)
    }

    fn remove_under(&mut self, dir: &Path) -> Vec<(PathBuf, Digest)> {
        let doomed: Vec<PathBuf> = self
            .records
            .keys()
            .filter(|path| path.as_path() != dir && path.starts_with(dir))
            .cloned()
            .collect();

        let mut removed: Vec<(PathBuf, Digest)> = doomed
            .into_iter()
            .filter_map(|path| self.records.remove(&path).map(|digest| (path, digest)))
            .collect();
        removed.sort_by(|a, b| a.0.cmp(&b.0));
        removed
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}
