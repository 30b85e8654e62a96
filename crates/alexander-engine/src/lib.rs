//! The Alexander Storage engine.
//!
//! [`ObjectService`] is the public API the HTTP transport calls once the
//! authenticator has produced a principal: bucket CRUD, object
//! put/get/head/delete/copy, listings, multipart coordination, and the
//! bucket configuration surface (ACL, versioning, lifecycle).
//! [`Sweeper`] runs the two background reclamation sweeps, and
//! [`RequestAuthenticator`] gates the whole thing with SigV4.
//!
//! Request bodies enter as [`BodyStream`]s and flow through the blob
//! layer's deduplicating sink; nothing in this crate buffers a body before
//! its hash is known.

pub mod access;
pub mod authn;
pub mod bucket;
pub mod list;
pub mod multipart;
pub mod object;
pub mod service;
pub mod sweeper;
pub mod util;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;

pub use authn::RequestAuthenticator;
pub use service::ObjectService;
pub use sweeper::Sweeper;

/// A request body: an ordered stream of chunks.
pub type BodyStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Wrap a fully buffered body as a [`BodyStream`].
#[must_use]
pub fn body_from_bytes(bytes: impl Into<Bytes> + Send + 'static) -> BodyStream {
    futures::stream::once(async move { Ok(bytes.into()) }).boxed()
}

/// Wrap a chunk sequence as a [`BodyStream`].
#[must_use]
pub fn body_from_chunks(chunks: Vec<Bytes>) -> BodyStream {
    futures::stream::iter(chunks.into_iter().map(Ok)).boxed()
}
