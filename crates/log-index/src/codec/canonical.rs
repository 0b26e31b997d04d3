//! Codecs for the canonical tables: logs, block metadata, the hash→number
//! mapping and the `meta/state` barrier record.

use super::{Reader, CODEC_V1};
use crate::{
    error::{Error, Result},
    types::{BlockMeta, Log, MetaState},
};
use alloy_primitives::{Address, B256};
use bytes::Bytes;

const MAX_TOPICS: usize = 4;

/// Encode the `meta/state` record.
pub fn encode_meta_state(state: &MetaState) -> Bytes {
    let mut out = Vec::with_capacity(25);
    out.push(CODEC_V1);
    out.extend_from_slice(&state.indexed_finalized_head.to_be_bytes());
    out.extend_from_slice(&state.next_log_id.to_be_bytes());
    out.extend_from_slice(&state.writer_epoch.to_be_bytes());
    Bytes::from(out)
}

/// Decode the `meta/state` record.
pub fn decode_meta_state(bytes: &[u8]) -> Result<MetaState> {
    let mut reader = Reader::versioned(bytes, "meta/state")?;
    let state = MetaState {
        indexed_finalized_head: reader.u64()?,
        next_log_id: reader.u64()?,
        writer_epoch: reader.u64()?,
    };
    reader.finish()?;
    Ok(state)
}

/// Encode a `block_meta/{block_num}` record.
pub fn encode_block_meta(meta: &BlockMeta) -> Bytes {
    let mut out = Vec::with_capacity(77);
    out.push(CODEC_V1);
    out.extend_from_slice(meta.block_hash.as_slice());
    out.extend_from_slice(meta.parent_hash.as_slice());
    out.extend_from_slice(&meta.first_log_id.to_be_bytes());
    out.extend_from_slice(&meta.count.to_be_bytes());
    Bytes::from(out)
}

/// Decode a `block_meta/{block_num}` record.
pub fn decode_block_meta(bytes: &[u8]) -> Result<BlockMeta> {
    let mut reader = Reader::versioned(bytes, "block_meta")?;
    let meta = BlockMeta {
        block_hash: B256::from_slice(reader.take(32)?),
        parent_hash: B256::from_slice(reader.take(32)?),
        first_log_id: reader.u64()?,
        count: reader.u32()?,
    };
    reader.finish()?;
    Ok(meta)
}

/// Encode a `block_hash_to_num/{hash}` record.
pub fn encode_block_num(block_num: u64) -> Bytes {
    let mut out = Vec::with_capacity(9);
    out.push(CODEC_V1);
    out.extend_from_slice(&block_num.to_be_bytes());
    Bytes::from(out)
}

/// Decode a `block_hash_to_num/{hash}` record.
pub fn decode_block_num(bytes: &[u8]) -> Result<u64> {
    let mut reader = Reader::versioned(bytes, "block_hash_to_num")?;
    let num = reader.u64()?;
    reader.finish()?;
    Ok(num)
}

/// Encode a `logs/{global_log_id}` record.
pub fn encode_log(log: &Log) -> Bytes {
    let mut out =
        Vec::with_capacity(1 + 20 + 1 + log.topics.len() * 32 + 4 + log.data.len() + 48);
    out.push(CODEC_V1);
    out.extend_from_slice(log.address.as_slice());
    out.push(log.topics.len() as u8);
    for topic in &log.topics {
        out.extend_from_slice(topic.as_slice());
    }
    out.extend_from_slice(&(log.data.len() as u32).to_be_bytes());
    out.extend_from_slice(&log.data);
    out.extend_from_slice(&log.block_num.to_be_bytes());
    out.extend_from_slice(&log.tx_idx.to_be_bytes());
    out.extend_from_slice(&log.log_idx.to_be_bytes());
    out.extend_from_slice(log.block_hash.as_slice());
    Bytes::from(out)
}

/// Decode a `logs/{global_log_id}` record.
pub fn decode_log(bytes: &[u8]) -> Result<Log> {
    let mut reader = Reader::versioned(bytes, "log")?;
    let address = Address::from_slice(reader.take(20)?);
    let topic_count = reader.u8()? as usize;
    if topic_count > MAX_TOPICS {
        return Err(Error::Decode("log topic count exceeds 4"));
    }
    let mut topics = Vec::with_capacity(topic_count);
    for _ in 0..topic_count {
        topics.push(B256::from_slice(reader.take(32)?));
    }
    let data_len = reader.u32()? as usize;
    let data = reader.take(data_len)?.to_vec();
    let log = Log {
        address,
        topics,
        data: data.into(),
        block_num: reader.u64()?,
        tx_idx: reader.u32()?,
        log_idx: reader.u32()?,
        block_hash: B256::from_slice(reader.take(32)?),
    };
    reader.finish()?;
    Ok(log)
}
