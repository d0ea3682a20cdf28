//! Content-addressed storage of submission files.

use std::path::Path;

use frag_store::{ContentDigest, StorageResult, UnitOfWork};
use tracing::trace;

/// A named file of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub name: String,
    pub data: Vec<u8>,
}

impl File {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Read a file from disk, named after its final path component.
    pub fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("{} has no file name", path.display()),
                )
            })?;
        Ok(Self {
            name,
            data: std::fs::read(path)?,
        })
    }
}

/// Deduplicating content store.
///
/// Guarantees:
/// - `put(data)` always returns the SHA-256 digest of `data`.
/// - A digest is stored at most once no matter how many submissions carry it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentStore;

impl ContentStore {
    /// Stage `data` in the unit of work and return its digest.
    ///
    /// Callers never learn whether the row was new.
    pub async fn put(&self, uow: &mut dyn UnitOfWork, data: &[u8]) -> StorageResult<ContentDigest> {
        let digest = ContentDigest::from_bytes(data);
        uow.put_content(&digest, data).await?;
        trace!(digest = %digest.short(), bytes = data.len(), "content staged");
        Ok(digest)
    }
}
