//! Orphan reclamation under guardrails.
//!
//! Everything reachable from a manifest header is live; GC reclaims what is
//! not. Because ingest creates the manifest header before any tail
//! checkpoint or segment for a stream, absence of a header proves an
//! artifact is orphaned. Around in-flight publishes GC is conservative:
//! `last_chunk_seq + 1` may be a publish racing the scan and is never
//! touched, and inline-header segments (a crashed spill migration) are
//! counted as backlog but left for the replay to reconcile.

use crate::{
    codec::{decode_block_num, decode_manifest, ManifestRefs},
    config::{Config, GuardrailAction},
    error::Result,
    keys::{
        manifest_key, parse_chunk_key, parse_manifest_segment_key, parse_tail_key,
        BLOCK_HASH_TO_NUM_PREFIX, CHUNKS_PREFIX, MANIFEST_SEGMENTS_PREFIX, TAILS_PREFIX,
    },
    metrics::{Counters, GcBacklog, GcBacklogSnapshot},
    state::ServiceState,
    store::{BlobStore, DelCond, FenceToken, MetaStore},
};
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, info};

/// What one GC run found and reclaimed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Orphan chunk blobs deleted.
    pub deleted_orphan_chunks: u64,
    /// Bytes reclaimed from orphan chunks.
    pub orphan_chunk_bytes: u64,
    /// Orphan manifest segments deleted.
    pub deleted_orphan_segments: u64,
    /// Orphan manifest segments found but retained (possible in-flight).
    pub retained_orphan_segments: u64,
    /// Stale tail checkpoints deleted.
    pub deleted_stale_tails: u64,
    /// `block_hash_to_num` records pruned below the configured floor.
    pub pruned_block_hashes: u64,
}

/// Cached view of one stream's manifest for orphan decisions.
#[derive(Debug)]
enum ManifestView {
    Absent,
    Present { last_chunk_seq: u64, referenced: Vec<u64>, segment_count: Option<u64> },
}

/// The orphan reclamation worker.
#[derive(Debug)]
pub struct GcWorker<M, B> {
    config: Config,
    meta: Arc<M>,
    blob: Arc<B>,
    service: Arc<ServiceState>,
    counters: Arc<Counters>,
    backlog: Arc<GcBacklog>,
}

impl<M: MetaStore, B: BlobStore> GcWorker<M, B> {
    /// Create a worker over the given stores.
    pub fn new(
        config: Config,
        meta: Arc<M>,
        blob: Arc<B>,
        service: Arc<ServiceState>,
        counters: Arc<Counters>,
        backlog: Arc<GcBacklog>,
    ) -> Self {
        Self { config, meta, blob, service, counters, backlog }
    }

    /// Run one bounded reclamation pass under the given writer epoch.
    pub async fn run_once(&self, epoch: u64) -> Result<GcStats> {
        let mut stats = GcStats::default();
        let mut manifests: HashMap<Vec<u8>, ManifestView> = HashMap::new();

        self.collect_orphan_chunks(&mut stats, &mut manifests).await?;
        self.collect_orphan_segments(&mut stats, &mut manifests, epoch).await?;
        self.collect_stale_tails(&mut stats, &mut manifests, epoch).await?;
        if let Some(floor) = self.config.gc.prune_block_hash_floor {
            self.prune_block_hashes(&mut stats, floor, epoch).await?;
        }

        Counters::bump(&self.counters.gc_runs);
        Counters::add(&self.counters.gc_deleted_chunks, stats.deleted_orphan_chunks);
        Counters::add(&self.counters.gc_deleted_segments, stats.deleted_orphan_segments);
        Counters::add(&self.counters.gc_deleted_tails, stats.deleted_stale_tails);
        Counters::add(&self.counters.gc_pruned_block_hashes, stats.pruned_block_hashes);

        // The backlog this pass encountered feeds the guardrails; a later
        // clean pass lifts the throttle.
        let backlog = GcBacklogSnapshot {
            orphan_chunk_bytes: stats.orphan_chunk_bytes,
            orphan_manifest_segments: stats.deleted_orphan_segments
                + stats.retained_orphan_segments,
            stale_tail_keys: stats.deleted_stale_tails,
        };
        self.backlog.record(backlog);
        self.apply_guardrails(backlog);

        info!(target: "log_index::gc", ?stats, "gc pass complete");
        Ok(stats)
    }

    fn apply_guardrails(&self, backlog: GcBacklogSnapshot) {
        let caps = &self.config.gc;
        let exceeded = backlog.orphan_chunk_bytes > caps.max_orphan_chunk_bytes
            || backlog.orphan_manifest_segments > caps.max_orphan_manifest_segments
            || backlog.stale_tail_keys > caps.max_stale_tail_keys;
        if !exceeded {
            self.service.clear_throttle();
            return;
        }
        match self.config.guardrail.action {
            GuardrailAction::Throttle => {
                self.service.set_throttled(format!("gc backlog over caps: {backlog:?}"))
            }
            GuardrailAction::FailClosed => {
                self.service.set_degraded(format!("gc backlog over caps: {backlog:?}"))
            }
        }
    }

    /// Load (and memoize) the manifest view deciding liveness for a stream.
    async fn manifest_view<'a>(
        &self,
        manifests: &'a mut HashMap<Vec<u8>, ManifestView>,
        stream: &crate::keys::StreamKey,
    ) -> Result<&'a ManifestView> {
        let key = manifest_key(stream);
        if !manifests.contains_key(&key) {
            let view = match self.meta.get(&key).await? {
                None => ManifestView::Absent,
                Some(record) => {
                    let manifest = decode_manifest(&record.value)?;
                    let (referenced, segment_count) = match &manifest.refs {
                        ManifestRefs::Inline(refs) => {
                            (refs.iter().map(|r| r.chunk_seq).collect(), None)
                        }
                        ManifestRefs::Segmented { segment_count, .. } => {
                            // Sequences are contiguous from 1; the refs list
                            // is not needed to decide membership.
                            ((1..=manifest.last_chunk_seq).collect(), Some(*segment_count))
                        }
                    };
                    ManifestView::Present {
                        last_chunk_seq: manifest.last_chunk_seq,
                        referenced,
                        segment_count,
                    }
                }
            };
            manifests.insert(key.clone(), view);
        }
        Ok(manifests.get(&key).expect("inserted above"))
    }

    async fn collect_orphan_chunks(
        &self,
        stats: &mut GcStats,
        manifests: &mut HashMap<Vec<u8>, ManifestView>,
    ) -> Result<()> {
        let mut cursor = None;
        let mut scanned = 0usize;
        loop {
            let page = self
                .blob
                .list_prefix(CHUNKS_PREFIX, cursor.take(), self.config.gc.page_limit)
                .await?;
            for key in &page.keys {
                let Some((stream, chunk_seq)) = parse_chunk_key(key) else { continue };
                let orphan = match self.manifest_view(manifests, &stream).await? {
                    ManifestView::Absent => true,
                    ManifestView::Present { last_chunk_seq, referenced, .. } => {
                        // last+1 may be a publish in flight.
                        chunk_seq != last_chunk_seq + 1 && !referenced.contains(&chunk_seq)
                    }
                };
                if !orphan {
                    continue;
                }
                let bytes =
                    self.blob.get(key).await?.map(|blob| blob.len() as u64).unwrap_or(0);
                self.blob.delete(key).await?;
                stats.deleted_orphan_chunks += 1;
                stats.orphan_chunk_bytes += bytes;
                debug!(
                    target: "log_index::gc",
                    kind = stream.kind.as_str(),
                    chunk_seq,
                    bytes,
                    "deleted orphan chunk"
                );
            }
            scanned += page.keys.len();
            cursor = page.next_cursor;
            if cursor.is_none() || scanned >= self.config.gc.page_limit {
                break;
            }
        }
        Ok(())
    }

    async fn collect_orphan_segments(
        &self,
        stats: &mut GcStats,
        manifests: &mut HashMap<Vec<u8>, ManifestView>,
        epoch: u64,
    ) -> Result<()> {
        let mut cursor = None;
        let mut scanned = 0usize;
        loop {
            let page = self
                .meta
                .list_prefix(MANIFEST_SEGMENTS_PREFIX, cursor.take(), self.config.gc.page_limit)
                .await?;
            for key in &page.keys {
                let Some((stream, segment_id)) = parse_manifest_segment_key(key) else {
                    continue;
                };
                let deletable = match self.manifest_view(manifests, &stream).await? {
                    ManifestView::Absent => true,
                    ManifestView::Present { segment_count: Some(count), .. } => {
                        // == count may be the next segment of an in-flight
                        // publish.
                        segment_id > *count
                    }
                    // Inline header: a crashed spill migration owns these;
                    // replay will finish or rewrite them.
                    ManifestView::Present { segment_count: None, .. } => {
                        stats.retained_orphan_segments += 1;
                        false
                    }
                };
                if !deletable {
                    continue;
                }
                if let Some(record) = self.meta.get(key).await? {
                    self.meta
                        .delete(key, DelCond::IfVersion(record.version), FenceToken(epoch))
                        .await?;
                    stats.deleted_orphan_segments += 1;
                }
            }
            scanned += page.keys.len();
            cursor = page.next_cursor;
            if cursor.is_none() || scanned >= self.config.gc.page_limit {
                break;
            }
        }
        Ok(())
    }

    async fn collect_stale_tails(
        &self,
        stats: &mut GcStats,
        manifests: &mut HashMap<Vec<u8>, ManifestView>,
        epoch: u64,
    ) -> Result<()> {
        let mut cursor = None;
        let mut scanned = 0usize;
        loop {
            let page = self
                .meta
                .list_prefix(TAILS_PREFIX, cursor.take(), self.config.gc.page_limit)
                .await?;
            for key in &page.keys {
                let Some(stream) = parse_tail_key(key) else { continue };
                // Headers precede tails on every write path, so no header
                // means no writer can be mid-flight on this stream.
                if !matches!(self.manifest_view(manifests, &stream).await?, ManifestView::Absent)
                {
                    continue;
                }
                if let Some(record) = self.meta.get(key).await? {
                    self.meta
                        .delete(key, DelCond::IfVersion(record.version), FenceToken(epoch))
                        .await?;
                    stats.deleted_stale_tails += 1;
                }
            }
            scanned += page.keys.len();
            cursor = page.next_cursor;
            if cursor.is_none() || scanned >= self.config.gc.page_limit {
                break;
            }
        }
        Ok(())
    }

    async fn prune_block_hashes(
        &self,
        stats: &mut GcStats,
        floor: u64,
        epoch: u64,
    ) -> Result<()> {
        let mut cursor = None;
        let mut scanned = 0usize;
        loop {
            let page = self
                .meta
                .list_prefix(BLOCK_HASH_TO_NUM_PREFIX, cursor.take(), self.config.gc.page_limit)
                .await?;
            for key in &page.keys {
                let Some(record) = self.meta.get(key).await? else { continue };
                if decode_block_num(&record.value)? >= floor {
                    continue;
                }
                self.meta
                    .delete(key, DelCond::IfVersion(record.version), FenceToken(epoch))
                    .await?;
                stats.pruned_block_hashes += 1;
            }
            scanned += page.keys.len();
            cursor = page.next_cursor;
            if cursor.is_none() || scanned >= self.config.gc.page_limit {
                break;
            }
        }
        Ok(())
    }
}
