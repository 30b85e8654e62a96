//! Content-addressed blob storage for Alexander Storage.
//!
//! Blobs are immutable byte chunks keyed by the SHA-256 of their plaintext
//! content and stored in a two-level sharded directory tree. Every write
//! goes through a temp file on the same filesystem and lands with an
//! `fsync` + atomic rename, so a crash never leaves a partial blob at its
//! final path.
//!
//! The filesystem is authoritative for bytes but not for existence: the
//! metadata store decides which blobs exist. A file without a metadata row
//! is an orphan awaiting GC; a row without a file is corruption and
//! surfaces as [`BlobError::Corrupt`] on read.

pub mod crypto;
pub mod error;
pub mod store;
pub mod writer;

pub use error::BlobError;
pub use store::{AdmitOutcome, BlobStore, TempFileGuard};
pub use writer::{DedupSink, StagedBlob};
