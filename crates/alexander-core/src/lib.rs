//! Core types for Alexander Storage.
//!
//! This crate holds everything the engine crates share: the service
//! configuration, the domain error type with its S3 wire mapping, the
//! string-backed domain enums, content-hash newtype, and the engine
//! metrics counters.

pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

pub use config::AlexanderConfig;
pub use error::{StorageError, StorageResult};
