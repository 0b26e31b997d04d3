//! Persisted key layout.
//!
//! Numeric key suffixes are big-endian so lexical ordering matches numeric
//! ordering. Stream ids are `index_kind (1 byte) ‖ value bytes (20 for
//! addresses, 32 for topics) ‖ shard_hi32 (4 bytes BE)`; because the kind
//! byte fixes the value length, stream-scoped keys are parseable without
//! delimiters, which the GC scan relies on.

use crate::error::{Error, Result};
use alloy_primitives::{Address, B256};

/// The `meta/state` visibility barrier record.
pub const META_STATE_KEY: &[u8] = b"meta/state";
/// The writer lease record.
pub const LEASE_KEY: &[u8] = b"meta/lease";
/// The persisted warm-stream list used by recovery warmup.
pub const WARM_STREAMS_KEY: &[u8] = b"meta/warm_streams";

/// Key prefix for log records.
pub const LOGS_PREFIX: &[u8] = b"logs/";
/// Key prefix for block metadata records.
pub const BLOCK_META_PREFIX: &[u8] = b"block_meta/";
/// Key prefix for block hash to number records.
pub const BLOCK_HASH_TO_NUM_PREFIX: &[u8] = b"block_hash_to_num/";
/// Key prefix for manifest headers.
pub const MANIFESTS_PREFIX: &[u8] = b"manifests/";
/// Key prefix for manifest segments.
pub const MANIFEST_SEGMENTS_PREFIX: &[u8] = b"manifest_segments/";
/// Key prefix for tail checkpoints.
pub const TAILS_PREFIX: &[u8] = b"tails/";
/// Key prefix for chunk blobs.
pub const CHUNKS_PREFIX: &[u8] = b"chunks/";
/// Key prefix for topic0 mode records.
pub const TOPIC0_MODE_PREFIX: &[u8] = b"topic0_mode/";
/// Key prefix for topic0 rolling-window stats records.
pub const TOPIC0_STATS_PREFIX: &[u8] = b"topic0_stats/";

/// The kind of indexed value a stream covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexKind {
    /// Log-level address index.
    Address,
    /// Log-level `topics[1]` index.
    Topic1,
    /// Log-level `topics[2]` index.
    Topic2,
    /// Log-level `topics[3]` index.
    Topic3,
    /// Block-level `topics[0]` index (always maintained).
    Topic0Block,
    /// Log-level `topics[0]` index (enabled per signature by the hybrid
    /// policy).
    Topic0Log,
}

impl IndexKind {
    /// The wire byte identifying this kind inside a stream id.
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Address => 1,
            Self::Topic1 => 2,
            Self::Topic2 => 3,
            Self::Topic3 => 4,
            Self::Topic0Block => 5,
            Self::Topic0Log => 6,
        }
    }

    /// Decode a stream id kind byte.
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Address),
            2 => Some(Self::Topic1),
            3 => Some(Self::Topic2),
            4 => Some(Self::Topic3),
            5 => Some(Self::Topic0Block),
            6 => Some(Self::Topic0Log),
            _ => None,
        }
    }

    /// The length of the value portion of a stream id for this kind.
    pub const fn value_len(self) -> usize {
        match self {
            Self::Address => 20,
            _ => 32,
        }
    }

    /// Whether streams of this kind hold block numbers rather than log ids.
    pub const fn is_block_level(self) -> bool {
        matches!(self, Self::Topic0Block)
    }

    /// A short static name for tracing.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Address => "addr",
            Self::Topic1 => "topic1",
            Self::Topic2 => "topic2",
            Self::Topic3 => "topic3",
            Self::Topic0Block => "topic0_block",
            Self::Topic0Log => "topic0_log",
        }
    }
}

/// The indexed value a stream covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamValue {
    /// A 20-byte contract address.
    Address(Address),
    /// A 32-byte topic value.
    Topic(B256),
}

impl StreamValue {
    /// The raw value bytes as embedded in the stream id.
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Self::Address(address) => address.as_slice(),
            Self::Topic(topic) => topic.as_slice(),
        }
    }
}

/// Identifies one stream: an indexed value within one shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey {
    /// The index kind.
    pub kind: IndexKind,
    /// The indexed value.
    pub value: StreamValue,
    /// The shard: `global_log_id >> 32` for log-level streams,
    /// `block_num >> 32` for block-level streams.
    pub shard: u32,
}

impl StreamKey {
    /// Stream for an address value.
    pub const fn address(address: Address, shard: u32) -> Self {
        Self { kind: IndexKind::Address, value: StreamValue::Address(address), shard }
    }

    /// Stream for a positional topic value (`position` in 1..=3).
    pub fn topic(position: usize, topic: B256, shard: u32) -> Self {
        let kind = match position {
            1 => IndexKind::Topic1,
            2 => IndexKind::Topic2,
            3 => IndexKind::Topic3,
            _ => unreachable!("positional topic streams cover positions 1..=3"),
        };
        Self { kind, value: StreamValue::Topic(topic), shard }
    }

    /// Block-level stream for an event signature.
    pub const fn topic0_block(signature: B256, shard: u32) -> Self {
        Self { kind: IndexKind::Topic0Block, value: StreamValue::Topic(signature), shard }
    }

    /// Log-level stream for an event signature.
    pub const fn topic0_log(signature: B256, shard: u32) -> Self {
        Self { kind: IndexKind::Topic0Log, value: StreamValue::Topic(signature), shard }
    }

    /// The wire encoding of this stream id.
    pub fn encoded(&self) -> Vec<u8> {
        let value = self.value.as_slice();
        let mut out = Vec::with_capacity(1 + value.len() + 4);
        out.push(self.kind.as_byte());
        out.extend_from_slice(value);
        out.extend_from_slice(&self.shard.to_be_bytes());
        out
    }

    /// Decode a stream id from its wire encoding.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (&kind_byte, rest) = bytes.split_first().ok_or(Error::Decode("empty stream id"))?;
        let kind = IndexKind::from_byte(kind_byte).ok_or(Error::Decode("unknown stream kind"))?;
        if rest.len() != kind.value_len() + 4 {
            return Err(Error::Decode("invalid stream id length"));
        }
        let (value_bytes, shard_bytes) = rest.split_at(kind.value_len());
        let value = match kind {
            IndexKind::Address => StreamValue::Address(Address::from_slice(value_bytes)),
            _ => StreamValue::Topic(B256::from_slice(value_bytes)),
        };
        let shard = u32::from_be_bytes(shard_bytes.try_into().expect("4 byte shard"));
        Ok(Self { kind, value, shard })
    }

    /// The encoded length of this stream id.
    pub const fn encoded_len(&self) -> usize {
        1 + self.kind.value_len() + 4
    }
}

fn suffixed(prefix: &[u8], suffix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + suffix.len());
    key.extend_from_slice(prefix);
    key.extend_from_slice(suffix);
    key
}

/// The `logs/{global_log_id}` key.
pub fn log_key(global_log_id: u64) -> Vec<u8> {
    suffixed(LOGS_PREFIX, &global_log_id.to_be_bytes())
}

/// The `block_meta/{block_num}` key.
pub fn block_meta_key(block_num: u64) -> Vec<u8> {
    suffixed(BLOCK_META_PREFIX, &block_num.to_be_bytes())
}

/// The `block_hash_to_num/{block_hash}` key.
pub fn block_hash_to_num_key(block_hash: &B256) -> Vec<u8> {
    suffixed(BLOCK_HASH_TO_NUM_PREFIX, block_hash.as_slice())
}

/// The `manifests/{stream_id}` key.
pub fn manifest_key(stream: &StreamKey) -> Vec<u8> {
    suffixed(MANIFESTS_PREFIX, &stream.encoded())
}

/// The `manifest_segments/{stream_id}/{segment_id}` key.
pub fn manifest_segment_key(stream: &StreamKey, segment_id: u64) -> Vec<u8> {
    let sid = stream.encoded();
    let mut key = Vec::with_capacity(MANIFEST_SEGMENTS_PREFIX.len() + sid.len() + 9);
    key.extend_from_slice(MANIFEST_SEGMENTS_PREFIX);
    key.extend_from_slice(&sid);
    key.push(b'/');
    key.extend_from_slice(&segment_id.to_be_bytes());
    key
}

/// The `tails/{stream_id}` key.
pub fn tail_key(stream: &StreamKey) -> Vec<u8> {
    suffixed(TAILS_PREFIX, &stream.encoded())
}

/// The `chunks/{stream_id}/{chunk_seq}` key.
pub fn chunk_key(stream: &StreamKey, chunk_seq: u64) -> Vec<u8> {
    let sid = stream.encoded();
    let mut key = Vec::with_capacity(CHUNKS_PREFIX.len() + sid.len() + 9);
    key.extend_from_slice(CHUNKS_PREFIX);
    key.extend_from_slice(&sid);
    key.push(b'/');
    key.extend_from_slice(&chunk_seq.to_be_bytes());
    key
}

/// The `topic0_mode/{sig}` key.
pub fn topic0_mode_key(signature: &B256) -> Vec<u8> {
    suffixed(TOPIC0_MODE_PREFIX, signature.as_slice())
}

/// The `topic0_stats/{sig}` key.
pub fn topic0_stats_key(signature: &B256) -> Vec<u8> {
    suffixed(TOPIC0_STATS_PREFIX, signature.as_slice())
}

fn parse_stream_suffix(prefix: &[u8], key: &[u8]) -> Option<StreamKey> {
    let suffix = key.strip_prefix(prefix)?;
    StreamKey::decode(suffix).ok()
}

fn parse_stream_seq_suffix(prefix: &[u8], key: &[u8]) -> Option<(StreamKey, u64)> {
    let suffix = key.strip_prefix(prefix)?;
    let kind = IndexKind::from_byte(*suffix.first()?)?;
    let sid_len = 1 + kind.value_len() + 4;
    if suffix.len() != sid_len + 9 || suffix[sid_len] != b'/' {
        return None;
    }
    let stream = StreamKey::decode(&suffix[..sid_len]).ok()?;
    let seq = u64::from_be_bytes(suffix[sid_len + 1..].try_into().ok()?);
    Some((stream, seq))
}

/// Parse a `tails/{stream_id}` key back into its stream id.
pub fn parse_tail_key(key: &[u8]) -> Option<StreamKey> {
    parse_stream_suffix(TAILS_PREFIX, key)
}

/// Parse a `manifests/{stream_id}` key back into its stream id.
pub fn parse_manifest_key(key: &[u8]) -> Option<StreamKey> {
    parse_stream_suffix(MANIFESTS_PREFIX, key)
}

/// Parse a `chunks/{stream_id}/{chunk_seq}` key.
pub fn parse_chunk_key(key: &[u8]) -> Option<(StreamKey, u64)> {
    parse_stream_seq_suffix(CHUNKS_PREFIX, key)
}

/// Parse a `manifest_segments/{stream_id}/{segment_id}` key.
pub fn parse_manifest_segment_key(key: &[u8]) -> Option<(StreamKey, u64)> {
    parse_stream_seq_suffix(MANIFEST_SEGMENTS_PREFIX, key)
}

/// The shard of a global log id (its upper 32 bits).
pub const fn log_shard(global_log_id: u64) -> u32 {
    (global_log_id >> 32) as u32
}

/// The position of a global log id within its shard (its lower 32 bits).
pub const fn log_local(global_log_id: u64) -> u32 {
    global_log_id as u32
}

/// Reassemble a global log id from shard and local parts.
pub const fn global_log_id(shard: u32, local: u32) -> u64 {
    ((shard as u64) << 32) | local as u64
}

/// The shard of a block number (its upper 32 bits).
pub const fn block_shard(block_num: u64) -> u32 {
    (block_num >> 32) as u32
}

/// The position of a block number within its shard (its lower 32 bits).
pub const fn block_local(block_num: u64) -> u32 {
    block_num as u32
}
