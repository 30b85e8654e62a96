//! The sharded content-addressed filesystem.
//!
//! Layout under the data root:
//!
//! ```text
//! <root>/blobs/<hh>/<hh2>/<full-hex>   committed blobs
//! <root>/tmp/<uuid>                    in-flight temp files
//! ```
//!
//! `<hh>` and `<hh2>` are the first two byte-pairs of the hex hash, keeping
//! directory fan-out bounded. Temp files live on the same filesystem so the
//! final rename is atomic.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use alexander_core::types::ContentHash;

use crate::error::BlobError;

/// Fixed per-blob overhead of the SSE envelope: 12-byte nonce + 16-byte tag.
pub const SSE_OVERHEAD: u64 = 28;

// ---------------------------------------------------------------------------
// TempFileGuard
// ---------------------------------------------------------------------------

/// Deletes its temp file on drop unless the write was committed.
///
/// Every in-flight upload owns one of these; a cancelled request future or
/// an early error path drops the guard and the temp file disappears with no
/// metadata side effects.
#[derive(Debug)]
pub struct TempFileGuard {
    path: PathBuf,
    committed: bool,
}

impl TempFileGuard {
    /// Guard the file at `path`.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            committed: false,
        }
    }

    /// The guarded path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Disarm the guard; the file now belongs to its final location.
    pub fn commit(&mut self) {
        self.committed = true;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove temp file");
            }
        } else {
            trace!(path = %self.path.display(), "removed abandoned temp file");
        }
    }
}

// ---------------------------------------------------------------------------
// AdmitOutcome
// ---------------------------------------------------------------------------

/// What happened when a staged blob was admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitOutcome {
    /// The temp file was renamed into place; this node now stores the bytes.
    Stored,
    /// An identical blob already existed; the temp file was discarded.
    Deduplicated,
}

// ---------------------------------------------------------------------------
// BlobStore
// ---------------------------------------------------------------------------

/// Durable store of byte chunks keyed by SHA-256.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Open (and create if needed) the store under `root`.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::Io`] when the directory tree cannot be created.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, BlobError> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join("blobs")).await?;
        tokio::fs::create_dir_all(root.join("tmp")).await?;
        debug!(root = %root.display(), "opened blob store");
        Ok(Self { root })
    }

    /// Final path for a content hash.
    #[must_use]
    pub fn blob_path(&self, hash: &ContentHash) -> PathBuf {
        let hex = hash.to_hex();
        self.root
            .join("blobs")
            .join(&hex[0..2])
            .join(&hex[2..4])
            .join(hex)
    }

    /// Allocate a fresh temp path on the store's filesystem.
    #[must_use]
    pub fn new_temp_path(&self) -> PathBuf {
        self.root
            .join("tmp")
            .join(Uuid::new_v4().simple().to_string())
    }

    /// Whether a file exists for `hash`.
    pub async fn exists(&self, hash: &ContentHash) -> bool {
        tokio::fs::try_exists(self.blob_path(hash))
            .await
            .unwrap_or(false)
    }

    /// Write a whole buffer as a blob: temp file, `fsync`, atomic rename.
    ///
    /// Idempotent: when the target already exists with a matching length the
    /// write is skipped. Returns the number of bytes the call persisted
    /// (zero on the idempotent path).
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::Io`] on filesystem failure.
    pub async fn put(&self, hash: &ContentHash, data: &[u8]) -> Result<u64, BlobError> {
        let target = self.blob_path(hash);
        if let Ok(meta) = tokio::fs::metadata(&target).await {
            if meta.len() == data.len() as u64 {
                trace!(hash = %hash, "blob already present, skipping write");
                return Ok(0);
            }
        }

        let temp = self.new_temp_path();
        let mut guard = TempFileGuard::new(temp.clone());
        {
            let mut file = tokio::fs::File::create(&temp).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
        }
        self.rename_into_place(&temp, &target).await?;
        guard.commit();

        debug!(hash = %hash, size = data.len(), "stored blob");
        Ok(data.len() as u64)
    }

    /// Admit an already-synced temp file under its content hash.
    ///
    /// The winner of a concurrent race renames; every later arrival sees the
    /// existing target and discards its temp file. An existing file whose
    /// length disagrees with `expected_len` (a partial from a crash, or a
    /// leftover with a different encryption envelope) is replaced by the
    /// rename instead of trusted.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::Io`] on filesystem failure.
    pub async fn admit_temp(
        &self,
        guard: &mut TempFileGuard,
        hash: &ContentHash,
        expected_len: u64,
    ) -> Result<AdmitOutcome, BlobError> {
        let target = self.blob_path(hash);
        if let Ok(meta) = tokio::fs::metadata(&target).await {
            if meta.len() == expected_len {
                trace!(hash = %hash, "identical blob already on disk");
                return Ok(AdmitOutcome::Deduplicated);
            }
            warn!(
                hash = %hash,
                found = meta.len(),
                expected = expected_len,
                "replacing blob file with unexpected length"
            );
        }

        self.rename_into_place(guard.path(), &target).await?;
        guard.commit();
        debug!(hash = %hash, "admitted staged blob");
        Ok(AdmitOutcome::Stored)
    }

    /// Read the full blob content.
    ///
    /// `expected_len`, when known from the metadata row, is checked against
    /// the file; a disagreement is [`BlobError::Corrupt`], never `NotFound`.
    ///
    /// # Errors
    ///
    /// - [`BlobError::NotFound`] when no file exists for the hash.
    /// - [`BlobError::Corrupt`] when the file length disagrees with the row.
    /// - [`BlobError::Io`] on other filesystem failures.
    pub async fn read(
        &self,
        hash: &ContentHash,
        expected_len: Option<u64>,
    ) -> Result<Vec<u8>, BlobError> {
        let path = self.blob_path(hash);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // When the metadata store vouched for this blob, a missing
                // file is corruption, not absence.
                if expected_len.is_some() {
                    return Err(BlobError::Corrupt {
                        content_hash: hash.to_hex(),
                        detail: "blob row exists but file is missing".to_owned(),
                    });
                }
                return Err(BlobError::NotFound {
                    content_hash: hash.to_hex(),
                });
            }
            Err(e) => return Err(BlobError::Io(e)),
        };

        if let Some(expected) = expected_len {
            if data.len() as u64 != expected {
                return Err(BlobError::Corrupt {
                    content_hash: hash.to_hex(),
                    detail: format!("file is {} bytes, row says {expected}", data.len()),
                });
            }
        }
        Ok(data)
    }

    /// Unlink the blob file. Tolerant of the file already being gone.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::Io`] on filesystem failures other than
    /// `NotFound`.
    pub async fn delete(&self, hash: &ContentHash) -> Result<(), BlobError> {
        match tokio::fs::remove_file(self.blob_path(hash)).await {
            Ok(()) => {
                debug!(hash = %hash, "deleted blob file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BlobError::Io(e)),
        }
    }

    async fn rename_into_place(&self, temp: &Path, target: &Path) -> Result<(), BlobError> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(temp, target).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    fn hash_of(data: &[u8]) -> ContentHash {
        ContentHash(Sha256::digest(data).into())
    }

    async fn store() -> (tempfile::TempDir, BlobStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = BlobStore::open(dir.path()).await.expect("open store");
        (dir, store)
    }

    #[tokio::test]
    async fn test_should_store_and_read_blob() {
        let (_dir, store) = store().await;
        let data = b"hello blob".to_vec();
        let hash = hash_of(&data);

        let written = store.put(&hash, &data).await.expect("put");
        assert_eq!(written, data.len() as u64);

        let read = store.read(&hash, Some(data.len() as u64)).await.expect("read");
        assert_eq!(read, data);
    }

    #[tokio::test]
    async fn test_should_shard_path_by_hash_prefix() {
        let (_dir, store) = store().await;
        let hash = ContentHash([0xAB; 32]);
        let path = store.blob_path(&hash);
        let rel: Vec<_> = path
            .components()
            .rev()
            .take(3)
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        assert_eq!(rel[0], "ab".repeat(32));
        assert_eq!(rel[1], "ab");
        assert_eq!(rel[2], "ab");
    }

    #[tokio::test]
    async fn test_should_skip_rewrite_of_existing_blob() {
        let (_dir, store) = store().await;
        let data = b"idempotent".to_vec();
        let hash = hash_of(&data);

        store.put(&hash, &data).await.expect("first put");
        let written = store.put(&hash, &data).await.expect("second put");
        assert_eq!(written, 0);
    }

    #[tokio::test]
    async fn test_should_return_not_found_for_unknown_hash() {
        let (_dir, store) = store().await;
        let result = store.read(&ContentHash([1; 32]), None).await;
        assert!(matches!(result, Err(BlobError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_should_surface_missing_file_as_corrupt_when_row_exists() {
        let (_dir, store) = store().await;
        // expected_len simulates a metadata row vouching for the blob.
        let result = store.read(&ContentHash([2; 32]), Some(10)).await;
        assert!(matches!(result, Err(BlobError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_should_surface_length_mismatch_as_corrupt() {
        let (_dir, store) = store().await;
        let data = b"short".to_vec();
        let hash = hash_of(&data);
        store.put(&hash, &data).await.expect("put");

        let result = store.read(&hash, Some(9999)).await;
        assert!(matches!(result, Err(BlobError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_should_tolerate_delete_of_missing_blob() {
        let (_dir, store) = store().await;
        store
            .delete(&ContentHash([3; 32]))
            .await
            .expect("delete of absent blob is a no-op");
    }

    #[tokio::test]
    async fn test_should_delete_existing_blob() {
        let (_dir, store) = store().await;
        let data = b"to delete".to_vec();
        let hash = hash_of(&data);
        store.put(&hash, &data).await.expect("put");
        assert!(store.exists(&hash).await);

        store.delete(&hash).await.expect("delete");
        assert!(!store.exists(&hash).await);
    }

    #[tokio::test]
    async fn test_should_dedup_concurrent_admit() {
        let (_dir, store) = store().await;
        let data = b"raced content".to_vec();
        let hash = hash_of(&data);

        // First admit wins the rename.
        let temp1 = store.new_temp_path();
        tokio::fs::write(&temp1, &data).await.expect("write temp1");
        let mut guard1 = TempFileGuard::new(temp1);
        let outcome1 = store
            .admit_temp(&mut guard1, &hash, data.len() as u64)
            .await
            .expect("admit 1");
        assert_eq!(outcome1, AdmitOutcome::Stored);

        // Second admit observes the existing file and discards its temp.
        let temp2 = store.new_temp_path();
        tokio::fs::write(&temp2, &data).await.expect("write temp2");
        let temp2_path = temp2.clone();
        let mut guard2 = TempFileGuard::new(temp2);
        let outcome2 = store
            .admit_temp(&mut guard2, &hash, data.len() as u64)
            .await
            .expect("admit 2");
        assert_eq!(outcome2, AdmitOutcome::Deduplicated);

        drop(guard2);
        assert!(!temp2_path.exists(), "losing temp file should be cleaned up");
        assert!(store.exists(&hash).await);
    }

    #[tokio::test]
    async fn test_should_clean_up_uncommitted_temp_on_drop() {
        let (_dir, store) = store().await;
        let temp = store.new_temp_path();
        tokio::fs::write(&temp, b"abandoned").await.expect("write");
        let path = temp.clone();

        drop(TempFileGuard::new(temp));
        assert!(!path.exists());
    }
}
