//! Index-scan execution: selectivity-ordered bitmap intersection, late
//! block-level filtering, exact point-read filtering and early stop.

use crate::{
    cache::StreamCache,
    codec::decode_log,
    error::{Error, Result},
    keys::{block_shard, global_log_id, log_key, log_local, log_shard, StreamKey, StreamValue},
    metrics::Counters,
    query::{
        block_map::BlockMapper,
        planner::{PlannedClause, QueryPlan},
    },
    store::{BlobStore, MetaStore},
    types::Log,
};
use alloy_primitives::B256;
use roaring::RoaringBitmap;
use std::{collections::HashMap, time::Instant};

/// How many candidates are processed between deadline checks.
const DEADLINE_STRIDE: usize = 64;

pub(crate) fn check_deadline(deadline: Option<Instant>) -> Result<()> {
    if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
        return Err(Error::DeadlineExceeded);
    }
    Ok(())
}

/// Restrict a bitmap to `[lo, hi]`.
fn clamp(bitmap: &mut RoaringBitmap, lo: u32, hi: u32) {
    if lo > 0 {
        bitmap.remove_range(0..lo);
    }
    if hi < u32::MAX {
        bitmap.remove_range(hi + 1..=u32::MAX);
    }
}

/// Union a clause's streams (chunks overlapping the range, plus the tail)
/// into one per-shard bitmap.
async fn clause_bitmap<M: MetaStore + ?Sized, B: BlobStore + ?Sized>(
    meta: &M,
    blob: &B,
    cache: &StreamCache,
    clause: &PlannedClause,
    shard: u32,
    lo: u32,
    hi: u32,
) -> Result<RoaringBitmap> {
    let mut acc = RoaringBitmap::new();
    for value in &clause.values {
        let stream = StreamKey { kind: clause.kind, value: *value, shard };
        if let Some(manifest) = cache.manifest(meta, &stream).await? {
            for chunk_ref in manifest.refs.iter() {
                if !chunk_ref.overlaps(lo, hi) {
                    continue;
                }
                let chunk = cache.chunk(blob, &stream, chunk_ref).await?;
                let mut bitmap = (*chunk).clone();
                clamp(&mut bitmap, lo, hi);
                acc |= bitmap;
            }
        }
        if let Some(tail) = cache.tail(meta, &stream).await? {
            let mut bitmap = (*tail.bitmap).clone();
            clamp(&mut bitmap, lo, hi);
            acc |= bitmap;
        }
    }
    Ok(acc)
}

/// Lazily loaded block-level topic0 membership, unioned across the
/// clause's values per block shard.
struct BlockMembership<'a> {
    values: &'a [B256],
    shards: HashMap<u32, RoaringBitmap>,
}

impl<'a> BlockMembership<'a> {
    fn new(values: &'a [B256]) -> Self {
        Self { values, shards: HashMap::new() }
    }

    async fn contains<M: MetaStore + ?Sized, B: BlobStore + ?Sized>(
        &mut self,
        meta: &M,
        blob: &B,
        cache: &StreamCache,
        block_num: u64,
    ) -> Result<bool> {
        let shard = block_shard(block_num);
        if !self.shards.contains_key(&shard) {
            let mut acc = RoaringBitmap::new();
            for value in self.values {
                let stream = StreamKey::topic0_block(*value, shard);
                if let Some(manifest) = cache.manifest(meta, &stream).await? {
                    for chunk_ref in manifest.refs.iter() {
                        let chunk = cache.chunk(blob, &stream, chunk_ref).await?;
                        acc |= (*chunk).clone();
                    }
                }
                if let Some(tail) = cache.tail(meta, &stream).await? {
                    acc |= (*tail.bitmap).clone();
                }
            }
            self.shards.insert(shard, acc);
        }
        Ok(self.shards[&shard].contains(crate::keys::block_local(block_num)))
    }
}

/// Point-read one log record.
pub(crate) async fn read_log<M: MetaStore + ?Sized>(
    meta: &M,
    counters: &Counters,
    log_id: u64,
) -> Result<Log> {
    Counters::bump(&counters.log_point_reads);
    let record = meta.get(&log_key(log_id)).await?.ok_or_else(|| {
        Error::Corruption(format!("log record missing for finalized id {log_id}"))
    })?;
    decode_log(&record.value)
}

/// Execute an index-scan plan.
///
/// Candidates are produced in ascending global-log-id order, which equals
/// the required `(block_num, tx_idx, log_idx)` order, so `max_results`
/// truncation keeps the smallest keys and no final sort is needed.
pub(crate) async fn execute<M: MetaStore + ?Sized, B: BlobStore + ?Sized>(
    meta: &M,
    blob: &B,
    cache: &StreamCache,
    counters: &Counters,
    plan: &QueryPlan,
) -> Result<Vec<Log>> {
    let mut results = Vec::new();
    let mut mapper = BlockMapper::new(plan.from_block, plan.to_block);
    let mut membership = plan.block_filter.as_deref().map(BlockMembership::new);

    let from_shard = log_shard(plan.from_log_id);
    let to_shard = log_shard(plan.to_log_id);
    'shards: for shard in from_shard..=to_shard {
        check_deadline(plan.deadline)?;
        let lo = if shard == from_shard { log_local(plan.from_log_id) } else { 0 };
        let hi = if shard == to_shard { log_local(plan.to_log_id) } else { u32::MAX };

        // Most selective clause first, then intersect the rest.
        let mut acc: Option<RoaringBitmap> = None;
        for clause in &plan.clauses {
            check_deadline(plan.deadline)?;
            let bitmap = clause_bitmap(meta, blob, cache, clause, shard, lo, hi).await?;
            let intersected = match acc.take() {
                None => bitmap,
                Some(mut acc) => {
                    acc &= bitmap;
                    acc
                }
            };
            if intersected.is_empty() {
                continue 'shards;
            }
            acc = Some(intersected);
        }
        let Some(candidates) = acc else { continue };

        for (i, local) in candidates.iter().enumerate() {
            if i % DEADLINE_STRIDE == 0 {
                check_deadline(plan.deadline)?;
            }
            let log_id = global_log_id(shard, local);

            // Late block-level filter: candidates are admitted by block
            // membership before any point read happens.
            if let Some(membership) = membership.as_mut() {
                let block_num = mapper.block_of(meta, log_id).await?;
                if !membership.contains(meta, blob, cache, block_num).await? {
                    continue;
                }
            }

            let log = read_log(meta, counters, log_id).await?;
            if !plan.filter.matches_log(&log) {
                continue;
            }
            results.push(log);
            if plan.max_results.is_some_and(|max| results.len() >= max) {
                break 'shards;
            }
        }
    }

    Ok(results)
}
