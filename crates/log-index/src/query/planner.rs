//! Query planning: clause collection, overlap-aware cardinality estimates
//! and selectivity ordering.
//!
//! Estimates never read chunk blobs: a clause's cost is the sum of
//! `ChunkRef.count` over refs whose local range intersects the queried
//! interval, plus the tail entries inside it. That is exact enough to order
//! clause intersection and costs O(manifest size) per stream.

use crate::{
    cache::StreamCache,
    codec::decode_topic0_mode,
    config::{BroadQueryAction, Config},
    error::{Error, Result},
    filter::{Clause, LogFilter, QueryOptions},
    keys::{log_local, log_shard, topic0_mode_key, IndexKind, StreamKey, StreamValue},
    query::require_block_meta,
    store::MetaStore,
    types::MetaState,
};
use alloy_primitives::B256;
use std::time::Instant;
use tracing::debug;

/// One log-level clause with its planned streams and cost estimate.
#[derive(Debug, Clone)]
pub(crate) struct PlannedClause {
    /// The index the clause reads.
    pub kind: IndexKind,
    /// The OR-list values.
    pub values: Vec<StreamValue>,
    /// Overlap-aware cardinality estimate across values and shards.
    pub estimate: u64,
}

/// How the executor will run the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExecutionPath {
    /// Intersect log-level stream bitmaps.
    IndexScan,
    /// Iterate blocks and exact-filter their logs.
    BlockScan,
}

/// A fully resolved query plan.
#[derive(Debug, Clone)]
pub(crate) struct QueryPlan {
    /// The exact filter, applied to every candidate before emission.
    pub filter: LogFilter,
    /// Result cap.
    pub max_results: Option<usize>,
    /// Execution deadline.
    pub deadline: Option<Instant>,
    /// Clipped block range (inclusive).
    pub from_block: u64,
    /// Clipped block range (inclusive).
    pub to_block: u64,
    /// Global log id interval (inclusive).
    pub from_log_id: u64,
    /// Global log id interval (inclusive).
    pub to_log_id: u64,
    /// Log-level clauses in ascending selectivity order.
    pub clauses: Vec<PlannedClause>,
    /// Block-level topic0 values applied as a late membership test.
    pub block_filter: Option<Vec<B256>>,
    /// Chosen execution path.
    pub path: ExecutionPath,
}

fn address_values(clause: &Clause<alloy_primitives::Address>) -> Vec<StreamValue> {
    clause.values().into_iter().map(StreamValue::Address).collect()
}

fn topic_values(clause: &Clause<B256>) -> Vec<StreamValue> {
    clause.values().into_iter().map(StreamValue::Topic).collect()
}

/// Build the plan for an already clipped, non-empty block range.
///
/// Returns `None` when the range provably holds no logs.
pub(crate) async fn build_plan<M: MetaStore + ?Sized>(
    meta: &M,
    cache: &StreamCache,
    config: &Config,
    state: &MetaState,
    filter: LogFilter,
    options: &QueryOptions,
    from_block: u64,
    to_block: u64,
) -> Result<Option<QueryPlan>> {
    debug_assert!(from_block <= to_block);
    debug_assert!(to_block <= state.indexed_finalized_head);

    // OR-list guardrail.
    let max_terms = filter.max_or_terms();
    let force_scan = if max_terms > config.planner.max_or_terms {
        match config.planner.broad_query_action {
            BroadQueryAction::Error => {
                return Err(Error::QueryTooBroad {
                    actual: max_terms,
                    max: config.planner.max_or_terms,
                })
            }
            BroadQueryAction::BlockScan => true,
        }
    } else {
        false
    };

    // Resolve the block range to a global log id interval.
    let from_meta = require_block_meta(meta, from_block).await?;
    let to_meta = require_block_meta(meta, to_block).await?;
    let from_log_id = from_meta.first_log_id;
    let Some(to_log_id) = to_meta.end_log_id().checked_sub(1) else {
        return Ok(None);
    };
    if to_log_id < from_log_id {
        return Ok(None);
    }

    // Collect log-level clauses.
    let mut clauses = Vec::new();
    if let Some(clause) = &filter.address {
        let values = address_values(clause);
        if !values.is_empty() {
            clauses.push((IndexKind::Address, values));
        }
    }
    for (position, clause) in
        [(1, &filter.topic1), (2, &filter.topic2), (3, &filter.topic3)]
    {
        if let Some(clause) = clause {
            let values = topic_values(clause);
            if !values.is_empty() {
                let kind = match position {
                    1 => IndexKind::Topic1,
                    2 => IndexKind::Topic2,
                    _ => IndexKind::Topic3,
                };
                clauses.push((kind, values));
            }
        }
    }

    // Topic0 goes log-level only when every value has log coverage for the
    // whole range; otherwise the clause stays block-level and is applied
    // late, after the log-level intersection.
    let mut block_filter = None;
    if let Some(clause) = &filter.topic0 {
        let values = clause.values();
        if !values.is_empty() {
            let mut log_covered = !force_scan;
            if log_covered {
                for value in &values {
                    let mode = match meta.get(&topic0_mode_key(value)).await? {
                        Some(record) => decode_topic0_mode(&record.value)?,
                        None => Default::default(),
                    };
                    if !mode.log_enabled || mode.enabled_from_block > from_block {
                        log_covered = false;
                        break;
                    }
                }
            }
            if log_covered {
                clauses.push((
                    IndexKind::Topic0Log,
                    values.iter().copied().map(StreamValue::Topic).collect(),
                ));
            } else {
                block_filter = Some(values);
            }
        }
    }

    // Estimate and order by ascending selectivity.
    let mut planned = Vec::with_capacity(clauses.len());
    for (kind, values) in clauses {
        let estimate =
            estimate_clause(meta, cache, kind, &values, from_log_id, to_log_id).await?;
        planned.push(PlannedClause { kind, values, estimate });
    }
    planned.sort_by_key(|clause| clause.estimate);

    let path = if force_scan || planned.is_empty() {
        ExecutionPath::BlockScan
    } else {
        ExecutionPath::IndexScan
    };
    debug!(
        target: "log_index::query",
        from_block,
        to_block,
        clauses = planned.len(),
        block_filter = block_filter.is_some(),
        ?path,
        "planned query"
    );

    Ok(Some(QueryPlan {
        filter,
        max_results: options.max_results,
        deadline: options.deadline,
        from_block,
        to_block,
        from_log_id,
        to_log_id,
        clauses: planned,
        block_filter,
        path,
    }))
}

/// Sum the overlap estimate across a clause's values and shards.
async fn estimate_clause<M: MetaStore + ?Sized>(
    meta: &M,
    cache: &StreamCache,
    kind: IndexKind,
    values: &[StreamValue],
    from_log_id: u64,
    to_log_id: u64,
) -> Result<u64> {
    let from_shard = log_shard(from_log_id);
    let to_shard = log_shard(to_log_id);
    let mut estimate = 0u64;
    for value in values {
        for shard in from_shard..=to_shard {
            let lo = if shard == from_shard { log_local(from_log_id) } else { 0 };
            let hi = if shard == to_shard { log_local(to_log_id) } else { u32::MAX };
            let stream = StreamKey { kind, value: *value, shard };
            estimate = estimate.saturating_add(
                estimate_stream(meta, cache, &stream, lo, hi).await?,
            );
        }
    }
    Ok(estimate)
}

/// Estimate one stream's contribution inside `[lo, hi]` from its manifest
/// refs and tail, without reading chunk blobs.
async fn estimate_stream<M: MetaStore + ?Sized>(
    meta: &M,
    cache: &StreamCache,
    stream: &StreamKey,
    lo: u32,
    hi: u32,
) -> Result<u64> {
    let mut estimate = 0u64;
    if let Some(manifest) = cache.manifest(meta, stream).await? {
        for chunk_ref in manifest.refs.iter() {
            if chunk_ref.overlaps(lo, hi) {
                estimate = estimate.saturating_add(chunk_ref.count as u64);
            }
        }
    }
    if let Some(tail) = cache.tail(meta, stream).await? {
        estimate = estimate.saturating_add(tail.bitmap.range_cardinality(lo..=hi));
    }
    Ok(estimate)
}
