//! Blob-layer error type.

use alexander_core::StorageError;

/// Errors raised by the blob store and the dedup writer.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// No file exists for the requested content hash.
    #[error("no blob file for content hash {content_hash}")]
    NotFound {
        /// Hex content hash.
        content_hash: String,
    },

    /// The file is missing or disagrees with the metadata row, or an
    /// encrypted blob failed authentication on read.
    #[error("blob {content_hash} is corrupt: {detail}")]
    Corrupt {
        /// Hex content hash.
        content_hash: String,
        /// What disagreed.
        detail: String,
    },

    /// The supplied digest did not match the received bytes.
    #[error("content digest mismatch")]
    DigestMismatch,

    /// Underlying filesystem failure.
    #[error("blob I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<BlobError> for StorageError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::NotFound { content_hash } => Self::NoSuchKey { key: content_hash },
            BlobError::Corrupt {
                content_hash,
                detail,
            } => Self::Corrupt {
                content_hash,
                detail,
            },
            BlobError::DigestMismatch => Self::BadDigest,
            BlobError::Io(e) => Self::Internal(e.into()),
        }
    }
}
