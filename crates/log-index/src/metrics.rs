//! Runtime counters, GC backlog gauges and the health report.

use crate::state::ServiceMode;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotone operation counters.
#[derive(Debug, Default)]
pub struct Counters {
    /// Blocks applied through the visibility barrier.
    pub ingested_blocks: AtomicU64,
    /// Log records written.
    pub ingested_logs: AtomicU64,
    /// Chunks sealed and published.
    pub chunks_sealed: AtomicU64,
    /// Tail checkpoints written.
    pub tail_checkpoints: AtomicU64,
    /// Manifest CAS attempts that had to reload and retry.
    pub manifest_cas_retries: AtomicU64,
    /// Queries served.
    pub query_requests: AtomicU64,
    /// Logs emitted by queries.
    pub query_results: AtomicU64,
    /// Queries that ran the block-driven scan path.
    pub query_block_scans: AtomicU64,
    /// Point reads of log records.
    pub log_point_reads: AtomicU64,
    /// Transient backend errors retried by the retry gateway.
    pub backend_retries: AtomicU64,
    /// Mutations rejected for a stale fence.
    pub fence_rejections: AtomicU64,
    /// GC runs completed.
    pub gc_runs: AtomicU64,
    /// Orphan chunk blobs deleted by GC.
    pub gc_deleted_chunks: AtomicU64,
    /// Orphan manifest segments deleted by GC.
    pub gc_deleted_segments: AtomicU64,
    /// Stale tail checkpoints deleted by GC.
    pub gc_deleted_tails: AtomicU64,
    /// `block_hash_to_num` records pruned by GC.
    pub gc_pruned_block_hashes: AtomicU64,
}

/// Point-in-time copy of [`Counters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct CountersSnapshot {
    pub ingested_blocks: u64,
    pub ingested_logs: u64,
    pub chunks_sealed: u64,
    pub tail_checkpoints: u64,
    pub manifest_cas_retries: u64,
    pub query_requests: u64,
    pub query_results: u64,
    pub query_block_scans: u64,
    pub log_point_reads: u64,
    pub backend_retries: u64,
    pub fence_rejections: u64,
    pub gc_runs: u64,
    pub gc_deleted_chunks: u64,
    pub gc_deleted_segments: u64,
    pub gc_deleted_tails: u64,
    pub gc_pruned_block_hashes: u64,
}

impl Counters {
    /// Increment a counter by one.
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Add to a counter.
    pub fn add(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    /// Take a consistent-enough snapshot for reporting.
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            ingested_blocks: self.ingested_blocks.load(Ordering::Relaxed),
            ingested_logs: self.ingested_logs.load(Ordering::Relaxed),
            chunks_sealed: self.chunks_sealed.load(Ordering::Relaxed),
            tail_checkpoints: self.tail_checkpoints.load(Ordering::Relaxed),
            manifest_cas_retries: self.manifest_cas_retries.load(Ordering::Relaxed),
            query_requests: self.query_requests.load(Ordering::Relaxed),
            query_results: self.query_results.load(Ordering::Relaxed),
            query_block_scans: self.query_block_scans.load(Ordering::Relaxed),
            log_point_reads: self.log_point_reads.load(Ordering::Relaxed),
            backend_retries: self.backend_retries.load(Ordering::Relaxed),
            fence_rejections: self.fence_rejections.load(Ordering::Relaxed),
            gc_runs: self.gc_runs.load(Ordering::Relaxed),
            gc_deleted_chunks: self.gc_deleted_chunks.load(Ordering::Relaxed),
            gc_deleted_segments: self.gc_deleted_segments.load(Ordering::Relaxed),
            gc_deleted_tails: self.gc_deleted_tails.load(Ordering::Relaxed),
            gc_pruned_block_hashes: self.gc_pruned_block_hashes.load(Ordering::Relaxed),
        }
    }
}

/// GC backlog gauges, updated on every GC scan.
#[derive(Debug, Default)]
pub struct GcBacklog {
    /// Bytes held by orphan chunk blobs.
    pub orphan_chunk_bytes: AtomicU64,
    /// Orphan manifest segment records.
    pub orphan_manifest_segments: AtomicU64,
    /// Stale tail checkpoint keys.
    pub stale_tail_keys: AtomicU64,
}

/// Point-in-time copy of [`GcBacklog`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct GcBacklogSnapshot {
    pub orphan_chunk_bytes: u64,
    pub orphan_manifest_segments: u64,
    pub stale_tail_keys: u64,
}

impl GcBacklog {
    /// Record backlog observed by a GC scan.
    pub fn record(&self, snapshot: GcBacklogSnapshot) {
        self.orphan_chunk_bytes.store(snapshot.orphan_chunk_bytes, Ordering::Relaxed);
        self.orphan_manifest_segments
            .store(snapshot.orphan_manifest_segments, Ordering::Relaxed);
        self.stale_tail_keys.store(snapshot.stale_tail_keys, Ordering::Relaxed);
    }

    /// Take a snapshot for reporting.
    pub fn snapshot(&self) -> GcBacklogSnapshot {
        GcBacklogSnapshot {
            orphan_chunk_bytes: self.orphan_chunk_bytes.load(Ordering::Relaxed),
            orphan_manifest_segments: self.orphan_manifest_segments.load(Ordering::Relaxed),
            stale_tail_keys: self.stale_tail_keys.load(Ordering::Relaxed),
        }
    }
}

/// The service health report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// The current operating mode.
    pub mode: ServiceMode,
    /// Why the service left normal mode, if it has.
    pub reason: Option<String>,
    /// Whether the writer currently holds its lease.
    pub lease_held: bool,
    /// GC backlog as of the last scan.
    pub gc_backlog: GcBacklogSnapshot,
    /// Unix time of the last successful ingest.
    pub last_ingest_unix: Option<u64>,
    /// Operation counters.
    pub counters: CountersSnapshot,
}
