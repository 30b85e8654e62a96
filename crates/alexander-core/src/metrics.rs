//! Engine counters.
//!
//! Plain atomic counters read by the external metrics exporter. Components
//! increment these on the hot path; nothing here blocks or allocates.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared counters for the storage engine.
///
/// All counters are monotonic. Readers use [`EngineMetrics::snapshot`] for a
/// consistent-enough view; individual loads are `Relaxed` since the counters
/// carry no ordering relationship to each other.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Bytes accepted by PutObject and UploadPart bodies.
    pub put_bytes: AtomicU64,
    /// Bytes served by GetObject (after decryption, before range slicing).
    pub get_bytes: AtomicU64,
    /// Uploads that matched an existing blob and skipped the write.
    pub dedup_hits: AtomicU64,
    /// Bytes reclaimed by the orphan-blob sweep.
    pub gc_freed_bytes: AtomicU64,
    /// Blobs removed by the orphan-blob sweep.
    pub gc_collected_blobs: AtomicU64,
    /// Versions expired by the lifecycle sweep.
    pub expired_versions: AtomicU64,
    /// Multipart sessions aborted for exceeding the session timeout.
    pub expired_multipart_sessions: AtomicU64,
    /// Corrupt-blob reads observed (see the error-handling policy).
    pub corrupt_reads: AtomicU64,
}

/// A point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Bytes accepted by PutObject and UploadPart bodies.
    pub put_bytes: u64,
    /// Bytes served by GetObject.
    pub get_bytes: u64,
    /// Dedup cache hits.
    pub dedup_hits: u64,
    /// Bytes reclaimed by GC.
    pub gc_freed_bytes: u64,
    /// Blobs collected by GC.
    pub gc_collected_blobs: u64,
    /// Versions expired by lifecycle.
    pub expired_versions: u64,
    /// Multipart sessions aborted by timeout.
    pub expired_multipart_sessions: u64,
    /// Corrupt-blob reads observed.
    pub corrupt_reads: u64,
}

impl EngineMetrics {
    /// Add to a counter.
    pub fn add(counter: &AtomicU64, delta: u64) {
        counter.fetch_add(delta, Ordering::Relaxed);
    }

    /// Increment a counter by one.
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            put_bytes: self.put_bytes.load(Ordering::Relaxed),
            get_bytes: self.get_bytes.load(Ordering::Relaxed),
            dedup_hits: self.dedup_hits.load(Ordering::Relaxed),
            gc_freed_bytes: self.gc_freed_bytes.load(Ordering::Relaxed),
            gc_collected_blobs: self.gc_collected_blobs.load(Ordering::Relaxed),
            expired_versions: self.expired_versions.load(Ordering::Relaxed),
            expired_multipart_sessions: self.expired_multipart_sessions.load(Ordering::Relaxed),
            corrupt_reads: self.corrupt_reads.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_count_and_snapshot() {
        let metrics = EngineMetrics::default();
        EngineMetrics::add(&metrics.put_bytes, 1024);
        EngineMetrics::add(&metrics.put_bytes, 512);
        EngineMetrics::incr(&metrics.dedup_hits);

        let snap = metrics.snapshot();
        assert_eq!(snap.put_bytes, 1536);
        assert_eq!(snap.dedup_hits, 1);
        assert_eq!(snap.gc_freed_bytes, 0);
    }
}
