//! Shared fixtures: block builders, service constructors and a naive
//! reference oracle for differential checks.

use alloy_primitives::{Address, B256};
use log_index::{
    config::Config,
    filter::{Clause, LogFilter},
    store::{InMemoryBlobStore, InMemoryMetaStore},
    types::{Block, Log},
    LogIndexService,
};

/// A log with recognizable address/topic bytes.
pub(crate) fn mk_log(
    address: u8,
    topic0: u8,
    topic1: u8,
    block_num: u64,
    tx_idx: u32,
    log_idx: u32,
) -> Log {
    Log {
        address: Address::repeat_byte(address),
        topics: vec![B256::repeat_byte(topic0), B256::repeat_byte(topic1)],
        data: vec![address, topic0, topic1].into(),
        block_num,
        tx_idx,
        log_idx,
        block_hash: block_hash(block_num),
    }
}

/// The deterministic hash used for test blocks.
pub(crate) fn block_hash(block_num: u64) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&block_num.to_be_bytes());
    bytes[31] = 0xb1;
    B256::from(bytes)
}

/// A block whose hash and parent hash follow [`block_hash`].
pub(crate) fn mk_block(block_num: u64, parent_hash: B256, logs: Vec<Log>) -> Block {
    Block { block_num, block_hash: block_hash(block_num), parent_hash, logs }
}

/// A contiguous chain of blocks built by a per-block log factory.
pub(crate) fn mk_chain(
    first_block: u64,
    count: u64,
    mut logs_for: impl FnMut(u64) -> Vec<Log>,
) -> Vec<Block> {
    let mut parent = if first_block == 0 { B256::ZERO } else { block_hash(first_block - 1) };
    let mut blocks = Vec::with_capacity(count as usize);
    for block_num in first_block..first_block + count {
        let block = mk_block(block_num, parent, logs_for(block_num));
        parent = block.block_hash;
        blocks.push(block);
    }
    blocks
}

/// A config with small seal targets so tests exercise chunk publication.
pub(crate) fn test_config(first_block: u64) -> Config {
    let mut config = Config::default();
    config.chunk.target_entries = 2;
    config.genesis.first_block = first_block;
    config
}

pub(crate) type InMemoryService = LogIndexService<InMemoryMetaStore, InMemoryBlobStore>;

/// A service over fresh in-memory stores.
pub(crate) fn svc(config: Config) -> InMemoryService {
    LogIndexService::new(config, InMemoryMetaStore::default(), InMemoryBlobStore::default(), 1)
}

/// The exact reference semantics: scan every block, apply the filter.
pub(crate) fn naive_query(
    blocks: &[Block],
    filter: &LogFilter,
    max_results: Option<usize>,
) -> Vec<Log> {
    let from = filter.from_block.unwrap_or(0);
    let to = filter.to_block.unwrap_or(u64::MAX);
    let mut out = Vec::new();
    for block in blocks {
        if block.block_num < from || block.block_num > to {
            continue;
        }
        if let Some(hash) = filter.block_hash {
            if hash != block.block_hash {
                continue;
            }
        }
        for log in &block.logs {
            if !matches_clause(&filter.address, Some(&log.address))
                || !matches_clause(&filter.topic0, log.topics.first())
                || !matches_clause(&filter.topic1, log.topics.get(1))
                || !matches_clause(&filter.topic2, log.topics.get(2))
                || !matches_clause(&filter.topic3, log.topics.get(3))
            {
                continue;
            }
            out.push(log.clone());
            if max_results.is_some_and(|max| out.len() >= max) {
                return out;
            }
        }
    }
    out
}

fn matches_clause<T: PartialEq>(clause: &Option<Clause<T>>, value: Option<&T>) -> bool {
    match clause {
        None | Some(Clause::Any) => true,
        Some(Clause::One(want)) => value == Some(want),
        Some(Clause::Or(wants)) => value.is_some_and(|v| wants.contains(v)),
    }
}
