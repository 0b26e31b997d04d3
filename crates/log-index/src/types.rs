//! Core domain types: logs, blocks, canonical metadata and ingest outcomes.

use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};

/// A single Ethereum-style log entry.
///
/// Logs are immutable once ingested and addressed by a monotonically
/// assigned global log id (the `logs/{id}` key, not a field of the value).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    /// The emitting contract address.
    pub address: Address,
    /// The log topics. At most four; `topics[0]` is the event signature.
    pub topics: Vec<B256>,
    /// The opaque log payload.
    pub data: Bytes,
    /// The block this log was emitted in.
    pub block_num: u64,
    /// The transaction index within the block.
    pub tx_idx: u32,
    /// The log index within the block.
    pub log_idx: u32,
    /// The hash of the containing block.
    pub block_hash: B256,
}

impl Log {
    /// The sort key mandated for query results.
    pub const fn sort_key(&self) -> (u64, u32, u32) {
        (self.block_num, self.tx_idx, self.log_idx)
    }

    /// The topic at the given position, if present.
    pub fn topic(&self, position: usize) -> Option<&B256> {
        self.topics.get(position)
    }
}

/// A finalized canonical block as delivered by the upstream feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// The block height.
    pub block_num: u64,
    /// The block hash.
    pub block_hash: B256,
    /// The parent block hash.
    pub parent_hash: B256,
    /// The logs emitted in this block, in `(tx_idx, log_idx)` order.
    pub logs: Vec<Log>,
}

/// Per-block canonical metadata (the `block_meta/{block_num}` record).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    /// The block hash.
    pub block_hash: B256,
    /// The parent block hash.
    pub parent_hash: B256,
    /// The global log id of the first log in this block.
    pub first_log_id: u64,
    /// The number of logs in this block.
    pub count: u32,
}

impl BlockMeta {
    /// The global log id one past the last log of this block.
    pub const fn end_log_id(&self) -> u64 {
        self.first_log_id + self.count as u64
    }
}

/// The `meta/state` record: the single visibility barrier.
///
/// Absence of the record means the index is empty. The record only ever
/// advances, and only via CAS after all data for the new head is durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaState {
    /// The highest finalized block visible to queries.
    pub indexed_finalized_head: u64,
    /// The first unassigned global log id.
    pub next_log_id: u64,
    /// The writer epoch that published this state.
    pub writer_epoch: u64,
}

/// Why an ingest request was rejected without being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The block is not the immediate successor of the indexed head.
    NotNext {
        /// The block number the index expects next.
        expected: u64,
        /// The block number that was submitted.
        got: u64,
    },
    /// The block's parent hash does not link to the indexed head.
    ParentMismatch {
        /// The hash of the current indexed head.
        expected: B256,
        /// The parent hash the block carried.
        got: B256,
    },
}

/// Outcome of [`ingest_finalized_block`](crate::api::FinalizedLogIndex::ingest_finalized_block).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The block was ingested and published.
    Applied {
        /// The new indexed head (the block's number).
        indexed_finalized_head: u64,
        /// The number of logs written.
        written_logs: usize,
    },
    /// The block is already part of the index with an identical hash; no
    /// state was changed.
    AlreadyIngested,
    /// A block with a different hash was submitted at an already-finalized
    /// height. The service latches into degraded mode.
    FinalityViolation,
    /// The block was refused without touching any state.
    Rejected(RejectReason),
}
