//! Streaming SHA-256 content digests.
//!
//! Files are read in fixed-size chunks and folded into a single hash, so
//! memory use does not depend on file size. The chunk size never affects the
//! result.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use fim_monitor::digest::{ChunkedSha256, Digester};
//!
//! let digester = ChunkedSha256::default();
//! let digest = digester.digest(Path::new("/etc/hosts")).unwrap();
//! println!("{digest}");
//! ```

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest as _, Sha256};
use thiserror::Error;

use crate::types::Digest;

/// Default read chunk size (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Errors from computing a digest.
#[derive(Error, Debug)]
pub enum DigestError {
    /// The file vanished or cannot be read. Expected during bursts of
    /// filesystem activity; callers treat it as "no readable content".
    #[error("file not readable: {path}: {source}")]
    NotReadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Computes content digests for paths.
///
/// The watcher loop holds this behind an `Arc` so tests can swap in a fake.
pub trait Digester: Send + Sync {
    /// Hashes the current content of `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError::NotReadable`] if the path is missing, is not a
    /// regular file, or cannot be read.
    fn digest(&self, path: &Path) -> Result<Digest, DigestError>;
}

/// SHA-256 digester that streams files in chunks of `chunk_size` bytes.
#[derive(Debug, Clone, Copy)]
pub struct ChunkedSha256 {
    chunk_size: usize,
}

impl ChunkedSha256 {
    /// Creates a digester with the given chunk size. A size of zero is
    /// treated as one byte.
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl Default for ChunkedSha256 {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl Digester for ChunkedSha256 {
    fn digest(&self, path: &Path) -> Result<Digest, DigestError> {
        digest_file(path, self.chunk_size)
    }
}

/// Hashes a file on disk in chunks of `chunk_size` bytes.
///
/// # Errors
///
/// Returns [`DigestError::NotReadable`] if the file cannot be opened or read,
/// or if the path is not a regular file.
pub fn digest_file(path: &Path, chunk_size: usize) -> Result<Digest, DigestError> {
    let not_readable = |source: io::Error| DigestError::NotReadable {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(not_readable)?;
    let metadata = file.metadata().map_err(not_readable)?;
    if !metadata.is_file() {
        return Err(not_readable(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a regular file",
        )));
    }

    digest_reader(file, chunk_size).map_err(not_readable)
}

/// Folds everything readable from `reader` into a SHA-256 digest.
///
/// # Errors
///
/// Propagates any read error other than `Interrupted`.
pub fn digest_reader<R: Read>(mut reader: R, chunk_size: usize) -> io::Result<Digest> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; chunk_size.max(1)];

    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..read]);
    }

    Ok(Digest::from_hex(hex::encode(hasher.finalize())))
}
