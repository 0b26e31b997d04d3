//! Query entry point: snapshot the visibility barrier, validate and
//! resolve the requested range, then plan and execute.

use crate::{
    cache::StreamCache,
    codec::decode_block_num,
    config::Config,
    error::{Error, Result},
    filter::{LogFilter, QueryOptions},
    ingest::read_meta_state,
    keys::block_hash_to_num_key,
    metrics::Counters,
    query::{block_scan, executor, planner, planner::ExecutionPath, read_block_meta},
    state::{ServiceMode, ServiceState},
    store::{BlobStore, MetaStore},
    types::{Log, MetaState},
};
use std::sync::Arc;
use tracing::debug;

/// The lock-free query engine. Readers snapshot `meta/state` once per query
/// and never observe state beyond that snapshot.
#[derive(Debug)]
pub struct QueryEngine<M, B> {
    config: Config,
    meta: Arc<M>,
    blob: Arc<B>,
    cache: Arc<StreamCache>,
    service: Arc<ServiceState>,
    counters: Arc<Counters>,
}

impl<M: MetaStore, B: BlobStore> QueryEngine<M, B> {
    /// Create an engine over the given stores and shared caches.
    pub fn new(
        config: Config,
        meta: Arc<M>,
        blob: Arc<B>,
        cache: Arc<StreamCache>,
        service: Arc<ServiceState>,
        counters: Arc<Counters>,
    ) -> Self {
        Self { config, meta, blob, cache, service, counters }
    }

    /// Serve an `eth_getLogs`-equivalent query over finalized data.
    pub async fn query_finalized(
        &self,
        filter: LogFilter,
        options: QueryOptions,
    ) -> Result<Vec<Log>> {
        if self.service.mode() == ServiceMode::Degraded && !self.config.query.serve_when_degraded
        {
            return Err(Error::Degraded(
                self.service.reason().unwrap_or_else(|| "degraded".to_owned()),
            ));
        }
        Counters::bump(&self.counters.query_requests);

        if filter.block_hash.is_some()
            && (filter.from_block.is_some() || filter.to_block.is_some())
        {
            return Err(Error::InvalidParams(
                "blockHash cannot be combined with fromBlock/toBlock",
            ));
        }

        // The snapshot: everything this query observes is bounded by it.
        let Some((state, _)) = read_meta_state(&*self.meta).await? else {
            if filter.block_hash.is_some() {
                return Err(Error::BlockNotFound);
            }
            return Ok(Vec::new());
        };

        let Some((from_block, to_block)) = self.resolve_range(&filter, &state).await? else {
            return Ok(Vec::new());
        };

        let Some(plan) = planner::build_plan(
            &*self.meta,
            &self.cache,
            &self.config,
            &state,
            filter,
            &options,
            from_block,
            to_block,
        )
        .await?
        else {
            return Ok(Vec::new());
        };

        let results = match plan.path {
            ExecutionPath::IndexScan => {
                executor::execute(&*self.meta, &*self.blob, &self.cache, &self.counters, &plan)
                    .await?
            }
            ExecutionPath::BlockScan => {
                block_scan::execute(&*self.meta, &*self.blob, &self.cache, &self.counters, &plan)
                    .await?
            }
        };

        Counters::add(&self.counters.query_results, results.len() as u64);
        debug!(
            target: "log_index::query",
            from_block,
            to_block,
            results = results.len(),
            "query served"
        );
        Ok(results)
    }

    /// Resolve `blockHash` or the numeric range against the snapshot,
    /// clipping to the finalized head. `None` means a provably empty range.
    async fn resolve_range(
        &self,
        filter: &LogFilter,
        state: &MetaState,
    ) -> Result<Option<(u64, u64)>> {
        let head = state.indexed_finalized_head;

        if let Some(block_hash) = filter.block_hash {
            let Some(record) = self.meta.get(&block_hash_to_num_key(&block_hash)).await? else {
                return Err(Error::BlockNotFound);
            };
            let block_num = decode_block_num(&record.value)?;
            let meta = read_block_meta(&*self.meta, block_num)
                .await?
                .ok_or(Error::BlockNotFound)?;
            if meta.block_hash != block_hash || block_num > head {
                return Err(Error::BlockNotFound);
            }
            return Ok(Some((block_num, block_num)));
        }

        let from = filter.from_block.unwrap_or(0).max(self.config.genesis.first_block);
        let to = filter.to_block.unwrap_or(head).min(head);
        if from > to {
            return Ok(None);
        }
        Ok(Some((from, to)))
    }
}
