//! Lifecycle expiration and orphan-blob reclamation.
//!
//! Two periodic sweeps, each single-threaded and guarded by a named
//! advisory-lock row so concurrent nodes cannot double-reclaim:
//!
//! - **Expiration sweep**: applies enabled lifecycle rules, deleting
//!   expired current versions on unversioned buckets and hiding them
//!   behind delete markers on versioned ones. Historical versions are
//!   never hard-deleted by lifecycle.
//! - **Orphan sweep**: aborts multipart sessions past the session timeout,
//!   then reclaims blobs whose ref count has been zero for longer than the
//!   grace window: file first, then row, tolerating either already being
//!   gone.
//!
//! The grace window is the safety argument: a blob released and re-admitted
//! within it refreshes `last_accessed` inside the admit transaction, so the
//! sweep never selects a blob that became referenced again.

use tracing::{debug, info, warn};
use uuid::Uuid;

use alexander_blob::BlobStore;
use alexander_core::metrics::EngineMetrics;
use alexander_core::types::ContentHash;
use alexander_core::{AlexanderConfig, StorageResult};
use alexander_metadata::{
    BlobRepo, BucketRepo, LifecycleRepo, LockRepo, MetadataStore, MultipartRepo, ObjectRepo,
};

use crate::service::ObjectService;

/// Lock row guarding the expiration sweep.
const LIFECYCLE_LOCK: &str = "lifecycle-sweep";

/// Lock row guarding the orphan sweep.
const GC_LOCK: &str = "gc-sweep";

/// Rows fetched per reclaim batch.
const SWEEP_BATCH: i64 = 1000;

/// Result of one expiration sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpirationStats {
    /// The sweep yielded to another holder.
    pub skipped: bool,
    /// Versions expired (deleted or hidden behind markers).
    pub expired_versions: u64,
}

/// Result of one orphan sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    /// The sweep yielded to another holder.
    pub skipped: bool,
    /// Blobs reclaimed.
    pub collected_blobs: u64,
    /// Bytes reclaimed.
    pub freed_bytes: u64,
    /// Abandoned multipart sessions aborted.
    pub aborted_sessions: u64,
}

/// The background reclamation engine.
#[derive(Debug)]
pub struct Sweeper {
    meta: MetadataStore,
    blobs: BlobStore,
    config: AlexanderConfig,
    metrics: std::sync::Arc<EngineMetrics>,
    holder: String,
}

impl Sweeper {
    /// Build a sweeper sharing the service's stores and counters.
    #[must_use]
    pub fn new(service: &ObjectService) -> Self {
        Self {
            meta: service.metadata().clone(),
            blobs: service.blob_store().clone(),
            config: service.config().clone(),
            metrics: service.metrics(),
            holder: Uuid::new_v4().simple().to_string(),
        }
    }

    /// Run both sweeps on their configured intervals until dropped.
    pub async fn run(&self) {
        let mut gc_tick = tokio::time::interval(self.config.gc_interval);
        let mut lifecycle_tick = tokio::time::interval(self.config.lifecycle_interval);
        // The immediate first tick of each interval would sweep at startup;
        // consume them so the first sweep waits a full period.
        gc_tick.tick().await;
        lifecycle_tick.tick().await;

        info!(
            gc_interval = ?self.config.gc_interval,
            lifecycle_interval = ?self.config.lifecycle_interval,
            "sweeper running"
        );
        loop {
            tokio::select! {
                _ = gc_tick.tick() => {
                    if let Err(e) = self.orphan_sweep_once().await {
                        warn!(error = %e, "orphan sweep failed");
                    }
                }
                _ = lifecycle_tick.tick() => {
                    if let Err(e) = self.expiration_sweep_once().await {
                        warn!(error = %e, "expiration sweep failed");
                    }
                }
            }
        }
    }

    /// One expiration sweep.
    pub async fn expiration_sweep_once(&self) -> StorageResult<ExpirationStats> {
        let acquired = self
            .meta
            .try_acquire_lock(LIFECYCLE_LOCK, &self.holder, self.config.lifecycle_interval * 2)
            .await
            .map_err(alexander_core::StorageError::from)?;
        if !acquired {
            debug!("expiration sweep already running elsewhere");
            return Ok(ExpirationStats {
                skipped: true,
                ..ExpirationStats::default()
            });
        }

        let result = self.run_expiration(chrono::Utc::now()).await;
        self.meta
            .release_lock(LIFECYCLE_LOCK, &self.holder)
            .await
            .map_err(alexander_core::StorageError::from)?;
        result
    }

    async fn run_expiration(&self, now: chrono::DateTime<chrono::Utc>) -> StorageResult<ExpirationStats> {
        let mut stats = ExpirationStats::default();

        for rule in self
            .meta
            .enabled_rules()
            .await
            .map_err(alexander_core::StorageError::from)?
        {
            let Some(days) = rule.expiration_days else {
                continue;
            };
            let Some(bucket) = self
                .meta
                .get_bucket_by_id(&rule.bucket_id)
                .await
                .map_err(alexander_core::StorageError::from)?
            else {
                continue;
            };

            let cutoff = now - chrono::Duration::days(days);
            loop {
                let expired = self
                    .meta
                    .expired_current_versions(&bucket.id, &rule.prefix, cutoff, SWEEP_BATCH)
                    .await
                    .map_err(alexander_core::StorageError::from)?;
                if expired.is_empty() {
                    break;
                }

                for version in expired {
                    self.meta
                        .delete_object(&bucket, &version.key)
                        .await
                        .map_err(alexander_core::StorageError::from)?;
                    stats.expired_versions += 1;
                    EngineMetrics::incr(&self.metrics.expired_versions);
                    debug!(
                        bucket = %bucket.name,
                        key = %version.key,
                        rule = %rule.rule_id,
                        "expired version"
                    );
                }
            }
        }

        if stats.expired_versions > 0 {
            info!(expired = stats.expired_versions, "expiration sweep done");
        }
        Ok(stats)
    }

    /// One orphan sweep: session timeouts first, then blob reclamation.
    pub async fn orphan_sweep_once(&self) -> StorageResult<GcStats> {
        let acquired = self
            .meta
            .try_acquire_lock(GC_LOCK, &self.holder, self.config.gc_interval * 3)
            .await
            .map_err(alexander_core::StorageError::from)?;
        if !acquired {
            debug!("orphan sweep already running elsewhere");
            return Ok(GcStats {
                skipped: true,
                ..GcStats::default()
            });
        }

        let result = self.run_gc(chrono::Utc::now()).await;
        self.meta
            .release_lock(GC_LOCK, &self.holder)
            .await
            .map_err(alexander_core::StorageError::from)?;
        result
    }

    async fn run_gc(&self, now: chrono::DateTime<chrono::Utc>) -> StorageResult<GcStats> {
        let mut stats = GcStats::default();

        // Abandoned multipart sessions release their part refs before the
        // orphan scan so those blobs age into the same grace window.
        let session_cutoff = now
            - chrono::Duration::from_std(self.config.multipart_timeout)
                .unwrap_or_else(|_| chrono::Duration::days(7));
        for session in self
            .meta
            .expired_sessions(session_cutoff)
            .await
            .map_err(alexander_core::StorageError::from)?
        {
            if self
                .meta
                .abort_session(&session.upload_id)
                .await
                .map_err(alexander_core::StorageError::from)?
            {
                stats.aborted_sessions += 1;
                EngineMetrics::incr(&self.metrics.expired_multipart_sessions);
                debug!(upload_id = %session.upload_id, "aborted abandoned multipart session");
            }
        }

        let orphan_cutoff = now
            - chrono::Duration::from_std(self.config.orphan_grace)
                .unwrap_or_else(|_| chrono::Duration::hours(1));
        let orphans = self
            .meta
            .orphaned_blobs(orphan_cutoff, SWEEP_BATCH)
            .await
            .map_err(alexander_core::StorageError::from)?;

        for blob in orphans {
            let hash = ContentHash::from_hex(&blob.content_hash)?;
            // File first, then row; both deletions tolerate the target
            // already being gone.
            self.blobs
                .delete(&hash)
                .await
                .map_err(alexander_core::StorageError::from)?;
            if self
                .meta
                .remove_orphan(&blob.content_hash)
                .await
                .map_err(alexander_core::StorageError::from)?
            {
                stats.collected_blobs += 1;
                let freed = u64::try_from(blob.size).unwrap_or_default();
                stats.freed_bytes += freed;
                EngineMetrics::incr(&self.metrics.gc_collected_blobs);
                EngineMetrics::add(&self.metrics.gc_freed_bytes, freed);
                debug!(hash = %blob.content_hash, size = blob.size, "collected orphan blob");
            }
        }

        if stats.collected_blobs > 0 || stats.aborted_sessions > 0 {
            info!(
                collected = stats.collected_blobs,
                freed_bytes = stats.freed_bytes,
                aborted_sessions = stats.aborted_sessions,
                "orphan sweep done"
            );
        }
        Ok(stats)
    }
}
