//! The deduplicating streaming writer.
//!
//! Inbound bodies stream through [`DedupSink`], which feeds SHA-256 and MD5
//! in lockstep with a temp-file write. Nothing touches the blob tree or the
//! metadata store until [`DedupSink::finish`] returns a [`StagedBlob`] and
//! the caller admits it, so a client disconnect mid-body costs only a temp
//! file that the drop guard removes.
//!
//! The upload pipeline is layered exactly as: hash filter → optional
//! encrypt step → file writer. Encryption runs at finalize time because the
//! data key is derived from the plaintext hash, which is only known once
//! the body ends.

use md5::Md5;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

use alexander_core::types::ContentHash;

use crate::crypto;
use crate::error::BlobError;
use crate::store::{AdmitOutcome, BlobStore, TempFileGuard};

// ---------------------------------------------------------------------------
// StagedBlob
// ---------------------------------------------------------------------------

/// A fully received body, hashed and written to a temp file, ready to be
/// admitted into the blob tree or discarded.
#[derive(Debug)]
pub struct StagedBlob {
    /// SHA-256 of the plaintext: the dedup key.
    pub content_hash: ContentHash,
    /// Hex MD5 of the plaintext, the single-PUT ETag value.
    pub md5_hex: String,
    /// Plaintext length in bytes.
    pub size: u64,
    /// On-disk length (plaintext, or plaintext + envelope overhead).
    pub stored_size: u64,
    /// Whether the temp file holds sealed bytes.
    pub encrypted: bool,
    guard: TempFileGuard,
}

impl StagedBlob {
    /// Check the body against a client-supplied hex MD5.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::DigestMismatch`] when the digests differ.
    pub fn verify_md5(&self, expected_hex: &str) -> Result<(), BlobError> {
        if self.md5_hex.eq_ignore_ascii_case(expected_hex) {
            Ok(())
        } else {
            Err(BlobError::DigestMismatch)
        }
    }

    /// Check the body against a client-supplied hex SHA-256
    /// (`x-amz-content-sha256`).
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::DigestMismatch`] when the digests differ.
    pub fn verify_sha256(&self, expected_hex: &str) -> Result<(), BlobError> {
        if self.content_hash.to_hex().eq_ignore_ascii_case(expected_hex) {
            Ok(())
        } else {
            Err(BlobError::DigestMismatch)
        }
    }

    /// Move the staged bytes into the blob tree (or discard them when an
    /// identical blob is already present).
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::Io`] on filesystem failure.
    pub async fn admit(mut self, store: &BlobStore) -> Result<AdmitOutcome, BlobError> {
        store
            .admit_temp(&mut self.guard, &self.content_hash, self.stored_size)
            .await
    }
}

// ---------------------------------------------------------------------------
// DedupSink
// ---------------------------------------------------------------------------

/// Streaming sink: hash + temp-file write, optional seal at finalize.
pub struct DedupSink {
    store: BlobStore,
    guard: TempFileGuard,
    file: tokio::fs::File,
    sha: Sha256,
    md5: Md5,
    size: u64,
}

impl std::fmt::Debug for DedupSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupSink")
            .field("temp", &self.guard.path())
            .field("size", &self.size)
            .finish()
    }
}

impl DedupSink {
    /// Open a sink writing to a fresh temp file in `store`.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::Io`] when the temp file cannot be created.
    pub async fn begin(store: &BlobStore) -> Result<Self, BlobError> {
        let temp = store.new_temp_path();
        let file = tokio::fs::File::create(&temp).await?;
        trace!(temp = %temp.display(), "opened dedup sink");
        Ok(Self {
            store: store.clone(),
            guard: TempFileGuard::new(temp),
            file,
            sha: Sha256::new(),
            md5: Md5::new(),
            size: 0,
        })
    }

    /// Feed one body chunk through the hash filters into the temp file.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::Io`] on write failure (disk full included); the
    /// sink is unusable afterwards and its drop cleans the temp file.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), BlobError> {
        self.sha.update(chunk);
        self.md5.update(chunk);
        self.file.write_all(chunk).await?;
        self.size += chunk.len() as u64;
        Ok(())
    }

    /// Finalize the body. With `sse_master_key` set, the plaintext temp is
    /// replaced by its sealed form before returning.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::Io`] on filesystem failure or
    /// [`BlobError::Corrupt`] if sealing fails.
    pub async fn finish(
        mut self,
        sse_master_key: Option<&[u8; 32]>,
    ) -> Result<StagedBlob, BlobError> {
        self.file.flush().await?;
        self.file.sync_all().await?;

        let content_hash = ContentHash(self.sha.finalize().into());
        let md5_hex = hex::encode(self.md5.finalize());
        let size = self.size;

        let (guard, stored_size, encrypted) = match sse_master_key {
            None => (self.guard, size, false),
            Some(master_key) => {
                // The data key depends on the plaintext hash, so sealing
                // happens once the body is complete: read the plaintext
                // temp, seal, stage the sealed bytes in a second temp file.
                let plaintext = tokio::fs::read(self.guard.path()).await?;
                let sealed = crypto::seal(master_key, &content_hash, &plaintext)?;

                let sealed_path = self.store.new_temp_path();
                let sealed_guard = TempFileGuard::new(sealed_path.clone());
                {
                    let mut file = tokio::fs::File::create(&sealed_path).await?;
                    file.write_all(&sealed).await?;
                    file.sync_all().await?;
                }
                let stored = sealed.len() as u64;
                // Dropping the plaintext guard removes the plaintext temp;
                // the sealed temp is now the staged file.
                drop(self.guard);
                (sealed_guard, stored, true)
            }
        };

        debug!(
            hash = %content_hash,
            size,
            stored_size,
            encrypted,
            "staged blob"
        );

        Ok(StagedBlob {
            content_hash,
            md5_hex,
            size,
            stored_size,
            encrypted,
            guard,
        })
    }
}
