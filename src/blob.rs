//! Content-addressed blob storage.
//!
//! Documents (JSON) and screenshots (PNG) are stored once per distinct
//! content under a short [`Digest`], in a two-level fan-out:
//!
//! ```text
//! data/screenshots/
//! ├── .staging/          # in-flight writes, never addressed
//! ├── aB/
//! │   └── 3dEf7hIj       # blob "aB3dEf7hIj"
//! └── Zq/
//!     └── 09xYwvUt
//! ```
//!
//! ## Write protocol
//!
//! Content is first written in full to a staging file, then hard-linked to
//! its digest path. The link is create-only: it fails with `AlreadyExists`
//! when the slot is taken, which makes it the single concurrency primitive.
//! No in-process lock is involved, so any number of threads or processes can
//! store concurrently.
//!
//! - Link succeeds → first writer wins, return the digest.
//! - Slot taken, same bytes → deduplication hit, return the same digest.
//! - Slot taken, different bytes → a genuine collision of the folded digest.
//!   One more salt byte is appended to the hash input and the next digest is
//!   tried. Round `n` appends byte `n`, so the sequence is deterministic.
//!
//! Collisions are resolved here and never surface to the caller. Blobs are
//! immutable once linked.

use crate::digest::{self, Digest};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directory (inside the store root) holding staged writes.
const STAGING_DIR: &str = ".staging";

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Blob not found: {0}")]
    NotFound(String),
}

/// Hash function mapping `(content, salt)` to a digest.
pub type DigestFn = fn(&[u8], &[u8]) -> Digest;

/// A content-addressed store rooted at one directory.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
    digest_fn: DigestFn,
}

impl BlobStore {
    /// Open (creating if needed) a store at `root` using the folded SHA-1 digest.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, BlobError> {
        Self::with_digest_fn(root, digest::content_digest)
    }

    /// Open a store with a custom digest function.
    ///
    /// Tests use this to force collisions that SHA-1 would make impractical.
    pub fn with_digest_fn(
        root: impl Into<PathBuf>,
        digest_fn: DigestFn,
    ) -> Result<Self, BlobError> {
        let root = root.into();
        fs::create_dir_all(root.join(STAGING_DIR))?;
        Ok(Self { root, digest_fn })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store `data`, returning the digest it is retrievable under.
    ///
    /// Idempotent: identical bytes always come back with the same digest and
    /// occupy a single file.
    pub fn store(&self, data: &[u8]) -> Result<Digest, BlobError> {
        let mut staged = tempfile::NamedTempFile::new_in(self.root.join(STAGING_DIR))?;
        staged.write_all(data)?;
        staged.as_file().sync_all()?;

        let mut salt: Vec<u8> = Vec::new();
        loop {
            let digest = (self.digest_fn)(data, &salt);
            let dir = self.root.join(digest.prefix());
            fs::create_dir_all(&dir)?;
            let path = dir.join(digest.rest());

            match fs::hard_link(staged.path(), &path) {
                Ok(()) => {
                    tracing::debug!(
                        store = %self.root.display(),
                        digest = %digest,
                        size = data.len(),
                        "blob written"
                    );
                    return Ok(digest);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    let existing = fs::read(&path)?;
                    if existing == data {
                        tracing::debug!(digest = %digest, "blob already stored");
                        return Ok(digest);
                    }
                    tracing::warn!(
                        store = %self.root.display(),
                        digest = %digest,
                        round = salt.len(),
                        "digest collision, rehashing with salt"
                    );
                    salt.push(salt.len() as u8);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Read back the full content stored under `id`.
    pub fn retrieve(&self, id: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.locate(id)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(BlobError::NotFound(id.into())),
            Err(e) => Err(e.into()),
        }
    }

    /// Path of an existing blob, for callers that serve byte ranges themselves.
    ///
    /// Malformed ids are rejected before the filesystem is consulted.
    pub fn locate(&self, id: &str) -> Result<PathBuf, BlobError> {
        let digest = Digest::parse(id).ok_or_else(|| BlobError::NotFound(id.into()))?;
        let path = self.root.join(digest.prefix()).join(digest.rest());
        if path.is_file() {
            Ok(path)
        } else {
            Err(BlobError::NotFound(id.into()))
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.locate(id).is_ok()
    }
}
