//! AWS Signature Version 4 verification for Alexander Storage.
//!
//! The authenticator is the wire contract that gates the storage engine:
//! every request is either signed with an access-key / secret-key pair
//! (header scheme or presigned-URL query scheme) or rejected before any
//! engine code runs.
//!
//! The crate is transport-neutral: verification consumes
//! [`http::request::Parts`] plus the payload hash the transport computed
//! while draining the body, and resolves secrets through the
//! [`credentials::CredentialProvider`] capability so callers decide where
//! keys live.
//!
//! Streaming uploads (`STREAMING-AWS4-HMAC-SHA256-PAYLOAD`) are verified
//! incrementally with [`chunked::ChunkSignatureVerifier`].

pub mod canonical;
pub mod chunked;
pub mod credentials;
pub mod error;
pub mod presigned;
pub mod sigv4;

pub use credentials::{CredentialProvider, StaticKeyring};
pub use error::AuthError;
pub use sigv4::{V4Verifier, VerifiedRequest};

/// Payload-hash sentinel for unsigned bodies.
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Payload-hash sentinel for chunk-signed streaming bodies.
pub const STREAMING_PAYLOAD: &str = "STREAMING-AWS4-HMAC-SHA256-PAYLOAD";
