//! Service wiring.

use std::sync::Arc;

use alexander_blob::BlobStore;
use alexander_core::metrics::EngineMetrics;
use alexander_core::{AlexanderConfig, StorageResult};
use alexander_metadata::MetadataStore;
use tracing::info;

/// The storage engine: every S3 operation the transport dispatches lands on
/// a method of this type (spread across the `bucket`, `object`, `list`, and
/// `multipart` modules).
#[derive(Debug, Clone)]
pub struct ObjectService {
    pub(crate) config: AlexanderConfig,
    pub(crate) meta: MetadataStore,
    pub(crate) blobs: BlobStore,
    pub(crate) metrics: Arc<EngineMetrics>,
}

impl ObjectService {
    /// Open the metadata store and blob root described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`alexander_core::StorageError::Internal`] when either store
    /// fails to open.
    pub async fn open(config: AlexanderConfig) -> StorageResult<Self> {
        let meta = MetadataStore::connect(&config.metadata_dsn)
            .await
            .map_err(alexander_core::StorageError::from)?;
        let blobs = BlobStore::open(&config.data_root)
            .await
            .map_err(alexander_core::StorageError::from)?;

        info!(
            data_root = %config.data_root.display(),
            dsn = %config.metadata_dsn,
            "object service ready"
        );
        Ok(Self {
            config,
            meta,
            blobs,
            metrics: Arc::new(EngineMetrics::default()),
        })
    }

    /// Build a service over already-opened stores (tests, embedding).
    #[must_use]
    pub fn with_stores(config: AlexanderConfig, meta: MetadataStore, blobs: BlobStore) -> Self {
        Self {
            config,
            meta,
            blobs,
            metrics: Arc::new(EngineMetrics::default()),
        }
    }

    /// The engine counters, shared with the external metrics exporter.
    #[must_use]
    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// The service configuration.
    #[must_use]
    pub fn config(&self) -> &AlexanderConfig {
        &self.config
    }

    /// The metadata store, for collaborators (authenticator, sweeper).
    #[must_use]
    pub fn metadata(&self) -> &MetadataStore {
        &self.meta
    }

    /// The blob store, for the sweeper.
    #[must_use]
    pub fn blob_store(&self) -> &BlobStore {
        &self.blobs
    }
}
