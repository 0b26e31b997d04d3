//! Lock-free query path: snapshot, plan, execute.

mod block_map;
mod block_scan;
mod engine;
mod executor;
mod planner;

pub use engine::QueryEngine;

use crate::{
    codec::decode_block_meta,
    error::{Error, Result},
    keys::block_meta_key,
    store::MetaStore,
    types::BlockMeta,
};

/// Read a block's canonical metadata.
///
/// Inside the snapshot range every block must have one; callers decide
/// whether absence is "empty index" or corruption.
pub(crate) async fn read_block_meta<M: MetaStore + ?Sized>(
    meta: &M,
    block_num: u64,
) -> Result<Option<BlockMeta>> {
    match meta.get(&block_meta_key(block_num)).await? {
        Some(record) => Ok(Some(decode_block_meta(&record.value)?)),
        None => Ok(None),
    }
}

/// Read a block's canonical metadata, treating absence as corruption.
pub(crate) async fn require_block_meta<M: MetaStore + ?Sized>(
    meta: &M,
    block_num: u64,
) -> Result<BlockMeta> {
    read_block_meta(meta, block_num).await?.ok_or_else(|| {
        Error::Corruption(format!("block_meta missing for finalized block {block_num}"))
    })
}
