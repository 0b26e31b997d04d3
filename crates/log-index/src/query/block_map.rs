//! Candidate-to-block resolution for late block-level filtering.
//!
//! Maps a global log id to the block that contains it by binary-searching
//! `block_meta` records over the queried range, memoizing every record it
//! touches. Lookup is O(log B) point reads in the worst case and amortizes
//! to almost nothing for clustered candidates.

use crate::{
    error::{Error, Result},
    query::require_block_meta,
    store::MetaStore,
    types::BlockMeta,
};
use std::collections::BTreeMap;

/// Memoizing log-id → block resolver over a fixed block range.
#[derive(Debug)]
pub(crate) struct BlockMapper {
    from_block: u64,
    to_block: u64,
    metas: BTreeMap<u64, BlockMeta>,
}

impl BlockMapper {
    /// A mapper over the inclusive block range.
    pub(crate) fn new(from_block: u64, to_block: u64) -> Self {
        Self { from_block, to_block, metas: BTreeMap::new() }
    }

    async fn meta<M: MetaStore + ?Sized>(
        &mut self,
        meta: &M,
        block_num: u64,
    ) -> Result<BlockMeta> {
        if let Some(cached) = self.metas.get(&block_num) {
            return Ok(*cached);
        }
        let record = require_block_meta(meta, block_num).await?;
        self.metas.insert(block_num, record);
        Ok(record)
    }

    /// The block containing `log_id`, which must lie inside the range's
    /// log id interval.
    pub(crate) async fn block_of<M: MetaStore + ?Sized>(
        &mut self,
        meta: &M,
        log_id: u64,
    ) -> Result<u64> {
        // Largest block whose first_log_id <= log_id.
        let mut lo = self.from_block;
        let mut hi = self.to_block;
        while lo < hi {
            let mid = lo + (hi - lo + 1) / 2;
            if self.meta(meta, mid).await?.first_log_id <= log_id {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        let found = self.meta(meta, lo).await?;
        if log_id < found.first_log_id || log_id >= found.end_log_id() {
            return Err(Error::Corruption(format!(
                "log id {log_id} not covered by block {lo} [{}, {})",
                found.first_log_id,
                found.end_log_id()
            )));
        }
        Ok(lo)
    }
}
