//! Block-driven scan: the fallback path for topic0-only queries, wildcard
//! queries and guardrail-exceeding OR-lists.
//!
//! The block set is either every block in range or, when a topic0 clause is
//! present, the union of its `topic0_block` bitmaps. Each admitted block's
//! logs are iterated through its `block_meta` id range and exact-filtered,
//! so the result is exact regardless of how broad the filter is.

use crate::{
    cache::StreamCache,
    error::Result,
    keys::{block_local, block_shard, StreamKey},
    metrics::Counters,
    query::{
        executor::{check_deadline, read_log},
        planner::QueryPlan,
        require_block_meta,
    },
    store::{BlobStore, MetaStore},
    types::Log,
};
use alloy_primitives::B256;
use roaring::RoaringBitmap;

/// Union the block-level bitmaps of the topic0 values for one block shard,
/// restricted to `[lo, hi]`.
async fn block_set_for_shard<M: MetaStore + ?Sized, B: BlobStore + ?Sized>(
    meta: &M,
    blob: &B,
    cache: &StreamCache,
    values: &[B256],
    shard: u32,
    lo: u32,
    hi: u32,
) -> Result<RoaringBitmap> {
    let mut acc = RoaringBitmap::new();
    for value in values {
        let stream = StreamKey::topic0_block(*value, shard);
        if let Some(manifest) = cache.manifest(meta, &stream).await? {
            for chunk_ref in manifest.refs.iter() {
                if !chunk_ref.overlaps(lo, hi) {
                    continue;
                }
                acc |= (*cache.chunk(blob, &stream, chunk_ref).await?).clone();
            }
        }
        if let Some(tail) = cache.tail(meta, &stream).await? {
            acc |= (*tail.bitmap).clone();
        }
    }
    if lo > 0 {
        acc.remove_range(0..lo);
    }
    if hi < u32::MAX {
        acc.remove_range(hi + 1..=u32::MAX);
    }
    Ok(acc)
}

/// Execute a block-scan plan.
pub(crate) async fn execute<M: MetaStore + ?Sized, B: BlobStore + ?Sized>(
    meta: &M,
    blob: &B,
    cache: &StreamCache,
    counters: &Counters,
    plan: &QueryPlan,
) -> Result<Vec<Log>> {
    Counters::bump(&counters.query_block_scans);
    let mut results = Vec::new();

    let from_shard = block_shard(plan.from_block);
    let to_shard = block_shard(plan.to_block);
    'shards: for shard in from_shard..=to_shard {
        check_deadline(plan.deadline)?;
        let lo = if shard == from_shard { block_local(plan.from_block) } else { 0 };
        let hi = if shard == to_shard { block_local(plan.to_block) } else { u32::MAX };

        // Either the topic0-selected blocks or the whole shard slice.
        let base = (shard as u64) << 32;
        let blocks: Box<dyn Iterator<Item = u64> + Send> = match &plan.block_filter {
            Some(values) => {
                let selected =
                    block_set_for_shard(meta, blob, cache, values, shard, lo, hi).await?;
                Box::new(selected.into_iter().map(move |local| base | local as u64))
            }
            None => Box::new((base | lo as u64)..=(base | hi as u64)),
        };

        for block_num in blocks {
            check_deadline(plan.deadline)?;
            let meta_record = require_block_meta(meta, block_num).await?;
            for i in 0..meta_record.count as u64 {
                let log = read_log(meta, counters, meta_record.first_log_id + i).await?;
                if !plan.filter.matches_log(&log) {
                    continue;
                }
                results.push(log);
                if plan.max_results.is_some_and(|max| results.len() >= max) {
                    break 'shards;
                }
            }
        }
    }

    Ok(results)
}
