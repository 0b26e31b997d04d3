//! The single-writer ingest pipeline.
//!
//! A block moves through a fixed sequence: ordering and parent checks,
//! idempotent canonical writes, stream appends with seal policy, topic0
//! window maintenance, tail checkpoints, and finally the `meta/state` CAS
//! that makes the block visible. Everything before the final CAS is keyed
//! deterministically, so a crashed block can be replayed verbatim and every
//! write degenerates into a no-op.

use crate::{
    codec::{
        decode_block_meta, decode_chunk, decode_meta_state, encode_block_meta, encode_block_num,
        encode_log, encode_meta_state, encode_stream_list,
    },
    config::Config,
    error::{Error, Result},
    ingest::{
        chunks::{should_seal, ManifestSet},
        tails::TailSet,
        topic0::Topic0Registry,
    },
    keys::{
        block_hash_to_num_key, block_meta_key, block_shard, chunk_key, log_key, log_local,
        log_shard, StreamKey, META_STATE_KEY, WARM_STREAMS_KEY,
    },
    metrics::Counters,
    state::{ServiceMode, ServiceState},
    store::{BlobStore, FenceToken, MetaStore, PutCond, PutOutcome},
    types::{Block, BlockMeta, IngestOutcome, MetaState, RejectReason},
};
use alloy_primitives::B256;
use bytes::Bytes;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Wall clock in unix seconds.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Read and decode the `meta/state` record with its CAS version.
pub(crate) async fn read_meta_state<M: MetaStore + ?Sized>(
    meta: &M,
) -> Result<Option<(MetaState, u64)>> {
    match meta.get(META_STATE_KEY).await? {
        Some(record) => Ok(Some((decode_meta_state(&record.value)?, record.version))),
        None => Ok(None),
    }
}

/// Counters reported by a maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceStats {
    /// Dirty tails flushed.
    pub flushed_streams: usize,
    /// Streams sealed by the age-based trigger.
    pub sealed_streams: usize,
}

#[derive(Debug)]
struct WriterState {
    tails: TailSet,
    manifests: ManifestSet,
    topic0: Topic0Registry,
    /// Streams touched recently, by the block that touched them. Feeds the
    /// persisted warm list.
    touched: HashMap<StreamKey, u64>,
}

/// The single-writer ingest engine.
#[derive(Debug)]
pub struct IngestEngine<M, B> {
    config: Config,
    meta: Arc<M>,
    blob: Arc<B>,
    service: Arc<ServiceState>,
    counters: Arc<Counters>,
    writer: Mutex<WriterState>,
}

impl<M: MetaStore, B: BlobStore> IngestEngine<M, B> {
    /// Create an engine over the given stores.
    pub fn new(
        config: Config,
        meta: Arc<M>,
        blob: Arc<B>,
        service: Arc<ServiceState>,
        counters: Arc<Counters>,
    ) -> Self {
        let manifests = ManifestSet::new(config.manifest);
        Self {
            config,
            meta,
            blob,
            service,
            counters,
            writer: Mutex::new(WriterState {
                tails: TailSet::default(),
                manifests,
                topic0: Topic0Registry::default(),
                touched: HashMap::new(),
            }),
        }
    }

    /// Ingest the next finalized block under the given writer epoch.
    pub async fn ingest_finalized_block(
        &self,
        block: &Block,
        epoch: u64,
    ) -> Result<IngestOutcome> {
        match self.service.mode() {
            ServiceMode::Degraded => {
                return Err(Error::Degraded(
                    self.service.reason().unwrap_or_else(|| "degraded".to_owned()),
                ))
            }
            ServiceMode::Throttled => {
                tokio::time::sleep(self.config.guardrail.throttle_delay).await;
            }
            ServiceMode::Normal => {}
        }

        validate_block(block)?;
        match self.ingest_inner(block, epoch).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => Err(self.escalate(err)),
        }
    }

    /// Non-recoverable failures latch the service into degraded mode;
    /// backend failures stay retryable.
    fn escalate(&self, err: Error) -> Error {
        match &err {
            Error::FenceRejected { .. } => {
                Counters::bump(&self.counters.fence_rejections);
                self.service.set_degraded(err.to_string());
            }
            Error::LeaseLost | Error::Internal(_) => self.service.set_degraded(err.to_string()),
            _ if err.is_corruption() => self.service.set_degraded(err.to_string()),
            _ => {}
        }
        err
    }

    async fn ingest_inner(&self, block: &Block, epoch: u64) -> Result<IngestOutcome> {
        let now_unix = unix_now();

        // Ordering against the visibility barrier.
        let state = read_meta_state(&*self.meta).await?;
        let expected = state
            .map_or(self.config.genesis.first_block, |(s, _)| s.indexed_finalized_head + 1);

        if block.block_num < expected {
            // Either a replay of an already-finalized block or a finality
            // violation; the stored hash decides.
            return match self.block_meta(block.block_num).await? {
                Some(meta) if meta.block_hash == block.block_hash => {
                    debug!(target: "log_index::ingest", block_num = block.block_num, "replay");
                    Ok(IngestOutcome::AlreadyIngested)
                }
                Some(meta) => {
                    self.service.set_degraded(format!(
                        "finality violation: block {} hash {} contradicts finalized {}",
                        block.block_num, block.block_hash, meta.block_hash
                    ));
                    Ok(IngestOutcome::FinalityViolation)
                }
                None => Ok(IngestOutcome::Rejected(RejectReason::NotNext {
                    expected,
                    got: block.block_num,
                })),
            };
        }
        if block.block_num > expected {
            warn!(
                target: "log_index::ingest",
                expected,
                got = block.block_num,
                "rejecting out-of-order block"
            );
            return Ok(IngestOutcome::Rejected(RejectReason::NotNext {
                expected,
                got: block.block_num,
            }));
        }

        // Parent linkage.
        if let Some((state, _)) = state {
            let head_meta =
                self.block_meta(state.indexed_finalized_head).await?.ok_or_else(|| {
                    Error::Corruption(format!(
                        "block_meta missing for finalized head {}",
                        state.indexed_finalized_head
                    ))
                })?;
            if block.parent_hash != head_meta.block_hash {
                return Ok(IngestOutcome::Rejected(RejectReason::ParentMismatch {
                    expected: head_meta.block_hash,
                    got: block.parent_hash,
                }));
            }
        } else if let Some(genesis_parent) = self.config.genesis.parent_hash {
            if block.parent_hash != genesis_parent {
                return Ok(IngestOutcome::Rejected(RejectReason::ParentMismatch {
                    expected: genesis_parent,
                    got: block.parent_hash,
                }));
            }
        }

        // Assign ids and write the canonical tables. `put_if_absent` makes
        // replays of a crashed attempt byte-compare instead of rewrite.
        let first_log_id = state.map_or(0, |(s, _)| s.next_log_id);
        for (i, log) in block.logs.iter().enumerate() {
            self.put_idempotent(&log_key(first_log_id + i as u64), encode_log(log), epoch)
                .await?;
        }
        let block_meta = BlockMeta {
            block_hash: block.block_hash,
            parent_hash: block.parent_hash,
            first_log_id,
            count: block.logs.len() as u32,
        };
        self.put_idempotent(
            &block_meta_key(block.block_num),
            encode_block_meta(&block_meta),
            epoch,
        )
        .await?;
        self.put_idempotent(
            &block_hash_to_num_key(&block.block_hash),
            encode_block_num(block.block_num),
            epoch,
        )
        .await?;

        let mut writer = self.writer.lock().await;
        let writer = &mut *writer;

        // Stream appends, grouped per stream in deterministic order so a
        // crash replay reproduces identical seals.
        let mut appends: BTreeMap<StreamKey, Vec<u32>> = BTreeMap::new();
        let mut signatures: BTreeSet<B256> = BTreeSet::new();
        for (i, log) in block.logs.iter().enumerate() {
            let id = first_log_id + i as u64;
            let shard = log_shard(id);
            let local = log_local(id);
            appends.entry(StreamKey::address(log.address, shard)).or_default().push(local);
            for position in 1..=3 {
                if let Some(topic) = log.topic(position) {
                    appends
                        .entry(StreamKey::topic(position, *topic, shard))
                        .or_default()
                        .push(local);
                }
            }
            if let Some(signature) = log.topic(0) {
                signatures.insert(*signature);
                let mode = writer.topic0.mode(&*self.meta, signature).await?;
                if mode.log_enabled && block.block_num >= mode.enabled_from_block {
                    appends
                        .entry(StreamKey::topic0_log(*signature, shard))
                        .or_default()
                        .push(local);
                }
            }
        }
        for signature in &signatures {
            appends
                .entry(StreamKey::topic0_block(*signature, block_shard(block.block_num)))
                .or_default()
                .push(crate::keys::block_local(block.block_num));
        }

        // Apply appends, reconcile crash duplicates, run the seal policy.
        for (stream, locals) in &appends {
            writer.manifests.ensure(&*self.meta, stream, epoch, now_unix).await?;
            let tail = writer.tails.load(&*self.meta, stream).await?;
            for &local in locals {
                tail.insert(local);
            }

            let manifest = writer.manifests.get_mut(stream).expect("ensured above");
            // In clean operation new locals are strictly above everything
            // sealed; an overlap means a replayed seal whose tail clear was
            // lost, and the sealed values are dropped from the tail again.
            if let Some(last_ref) = manifest.refs.last().copied() {
                if tail.bitmap.min().is_some_and(|min| min <= last_ref.max_local) {
                    let sealed = self.load_chunk_bitmap(stream, last_ref.chunk_seq).await?;
                    let before = tail.bitmap.len();
                    tail.bitmap -= &sealed;
                    if tail.bitmap.len() != before {
                        tail.dirty = true;
                    }
                }
            }

            if should_seal(&self.config.chunk, tail, &manifest.manifest, now_unix) {
                writer
                    .manifests
                    .publish_chunk(
                        &*self.meta,
                        &*self.blob,
                        stream,
                        tail,
                        epoch,
                        now_unix,
                        &self.counters,
                    )
                    .await?;
            }
            writer.touched.insert(*stream, block.block_num);
        }

        // Topic0 rolling windows, after appends so a transition fired by
        // this block only covers the next one.
        for signature in &signatures {
            writer
                .topic0
                .observe_block(&*self.meta, &self.config.topic0, signature, block.block_num, epoch)
                .await?;
        }

        // Tail checkpoints for every stream the block touched.
        for stream in appends.keys() {
            if writer.tails.checkpoint(&*self.meta, stream, epoch).await? {
                Counters::bump(&self.counters.tail_checkpoints);
            }
        }

        // The visibility barrier: only this CAS publishes the block.
        let next_state = MetaState {
            indexed_finalized_head: block.block_num,
            next_log_id: first_log_id + block.logs.len() as u64,
            writer_epoch: epoch,
        };
        let cond = state.map_or(PutCond::IfAbsent, |(_, version)| PutCond::IfVersion(version));
        let outcome = self
            .meta
            .put(META_STATE_KEY, encode_meta_state(&next_state), cond, FenceToken(epoch))
            .await?;
        if !outcome.applied() {
            return Err(Error::Internal(format!(
                "meta/state CAS lost publishing block {} (concurrent writer)",
                block.block_num
            )));
        }

        Counters::bump(&self.counters.ingested_blocks);
        Counters::add(&self.counters.ingested_logs, block.logs.len() as u64);
        self.service.record_ingest(now_unix);
        debug!(
            target: "log_index::ingest",
            block_num = block.block_num,
            logs = block.logs.len(),
            streams = appends.len(),
            "block published"
        );
        Ok(IngestOutcome::Applied {
            indexed_finalized_head: block.block_num,
            written_logs: block.logs.len(),
        })
    }

    /// Flush dirty tails, seal aged streams and refresh the warm list.
    ///
    /// Driven by the embedder on its maintenance timer
    /// (`tail.flush_interval` is the recommended cadence).
    pub async fn run_periodic_maintenance(
        &self,
        now_unix: u64,
        epoch: u64,
    ) -> Result<MaintenanceStats> {
        if self.service.mode() == ServiceMode::Degraded {
            return Err(Error::Degraded(
                self.service.reason().unwrap_or_else(|| "degraded".to_owned()),
            ));
        }

        let mut writer = self.writer.lock().await;
        let writer = &mut *writer;
        let mut stats = MaintenanceStats::default();

        // Age-based seals.
        for stream in writer.manifests.loaded_streams() {
            let Some(manifest) = writer.manifests.get_mut(&stream) else { continue };
            let last_seal = manifest.manifest.last_seal_unix_sec;
            if now_unix.saturating_sub(last_seal)
                < self.config.chunk.maintenance_seal_interval.as_secs()
            {
                continue;
            }
            let Some(tail) = writer.tails.get_mut(&stream) else { continue };
            if tail.bitmap.is_empty() {
                continue;
            }
            writer
                .manifests
                .publish_chunk(
                    &*self.meta,
                    &*self.blob,
                    &stream,
                    tail,
                    epoch,
                    now_unix,
                    &self.counters,
                )
                .await
                .map_err(|err| self.escalate(err))?;
            stats.sealed_streams += 1;
        }

        // Flush anything still dirty (sealed streams included).
        for stream in writer.tails.dirty_streams() {
            if writer
                .tails
                .checkpoint(&*self.meta, &stream, epoch)
                .await
                .map_err(|err| self.escalate(err))?
            {
                Counters::bump(&self.counters.tail_checkpoints);
                stats.flushed_streams += 1;
            }
        }

        // Persist the warm list: the most recently touched streams.
        let mut touched: Vec<(StreamKey, u64)> =
            writer.touched.iter().map(|(stream, block)| (*stream, *block)).collect();
        touched.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        touched.truncate(self.config.recovery.warm_streams);
        let warm: Vec<StreamKey> = touched.into_iter().map(|(stream, _)| stream).collect();
        if !warm.is_empty() {
            self.meta
                .put(WARM_STREAMS_KEY, encode_stream_list(&warm), PutCond::Any, FenceToken(epoch))
                .await?;
        }

        Ok(stats)
    }

    async fn block_meta(&self, block_num: u64) -> Result<Option<BlockMeta>> {
        match self.meta.get(&block_meta_key(block_num)).await? {
            Some(record) => Ok(Some(decode_block_meta(&record.value)?)),
            None => Ok(None),
        }
    }

    async fn load_chunk_bitmap(
        &self,
        stream: &StreamKey,
        chunk_seq: u64,
    ) -> Result<roaring::RoaringBitmap> {
        let bytes = self.blob.get(&chunk_key(stream, chunk_seq)).await?.ok_or_else(|| {
            Error::Corruption(format!(
                "manifest references missing chunk {} seq {chunk_seq}",
                stream.kind.as_str()
            ))
        })?;
        Ok(decode_chunk(&bytes)?.bitmap)
    }

    /// Write a deterministically keyed record: a replay carrying identical
    /// bytes is accepted, different bytes at the same key is corruption.
    async fn put_idempotent(&self, key: &[u8], value: Bytes, epoch: u64) -> Result<()> {
        let outcome =
            self.meta.put(key, value.clone(), PutCond::IfAbsent, FenceToken(epoch)).await?;
        match outcome {
            PutOutcome::Applied { .. } => Ok(()),
            PutOutcome::NotApplied { .. } => {
                let existing = self.meta.get(key).await?.ok_or_else(|| {
                    Error::Internal("record vanished between put and get".to_owned())
                })?;
                if existing.value == value {
                    Ok(())
                } else {
                    Err(Error::Corruption(format!(
                        "deterministic key {} holds conflicting bytes",
                        String::from_utf8_lossy(key)
                    )))
                }
            }
        }
    }
}

fn validate_block(block: &Block) -> Result<()> {
    for log in &block.logs {
        if log.topics.len() > 4 {
            return Err(Error::InvalidParams("log carries more than 4 topics"));
        }
        if log.block_num != block.block_num {
            return Err(Error::InvalidParams("log block_num does not match block"));
        }
        if log.block_hash != block.block_hash {
            return Err(Error::InvalidParams("log block_hash does not match block"));
        }
    }
    Ok(())
}
