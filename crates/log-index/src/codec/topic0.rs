//! Topic0 hybrid-policy records: the per-signature mode switch and the
//! rolling-window bit ring behind it.

use super::{Reader, CODEC_V1};
use crate::error::{Error, Result};
use bytes::Bytes;

/// Whether a signature is log-level indexed (`topic0_mode/{sig}`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Topic0Mode {
    /// Whether `topic0_log` appends are produced for this signature.
    pub log_enabled: bool,
    /// First block covered by log-level indexing while enabled.
    pub enabled_from_block: u64,
}

/// Rolling-window appearance stats for a signature (`topic0_stats/{sig}`).
///
/// `ring_bits` is a bit per window slot; slot `block_num % window_len` holds
/// whether the signature appeared in that block. The ring advances lazily:
/// `last_updated_block` marks how far it has been brought forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic0Stats {
    /// Window length in blocks.
    pub window_len: u32,
    /// Population count of the ring.
    pub blocks_seen_in_window: u32,
    /// Ring slot of `last_updated_block`.
    pub ring_cursor: u32,
    /// The newest block the ring reflects.
    pub last_updated_block: u64,
    /// The window bits, `(window_len + 7) / 8` bytes.
    pub ring_bits: Vec<u8>,
}

impl Topic0Stats {
    /// A fresh, empty window.
    pub fn new(window_len: u32, block_num: u64) -> Self {
        Self {
            window_len,
            blocks_seen_in_window: 0,
            ring_cursor: (block_num % window_len as u64) as u32,
            last_updated_block: block_num,
            ring_bits: vec![0; (window_len as usize).div_ceil(8)],
        }
    }

    /// Read the bit at a ring slot.
    pub fn bit(&self, slot: u32) -> bool {
        self.ring_bits[slot as usize / 8] & (1 << (slot % 8)) != 0
    }

    /// Set the bit at a ring slot, updating the population count.
    pub fn set_bit(&mut self, slot: u32) {
        if !self.bit(slot) {
            self.ring_bits[slot as usize / 8] |= 1 << (slot % 8);
            self.blocks_seen_in_window += 1;
        }
    }

    /// Clear the bit at a ring slot, updating the population count.
    pub fn clear_bit(&mut self, slot: u32) {
        if self.bit(slot) {
            self.ring_bits[slot as usize / 8] &= !(1 << (slot % 8));
            self.blocks_seen_in_window -= 1;
        }
    }

    /// The appearance rate over the window.
    pub fn rate(&self) -> f64 {
        self.blocks_seen_in_window as f64 / self.window_len as f64
    }

    /// Whether enough history has accumulated for the rate to be meaningful.
    pub fn window_filled(&self) -> bool {
        self.last_updated_block + 1 >= self.window_len as u64
    }
}

/// Encode a `topic0_mode/{sig}` record.
pub fn encode_topic0_mode(mode: &Topic0Mode) -> Bytes {
    let mut out = Vec::with_capacity(10);
    out.push(CODEC_V1);
    out.push(mode.log_enabled as u8);
    out.extend_from_slice(&mode.enabled_from_block.to_be_bytes());
    Bytes::from(out)
}

/// Decode a `topic0_mode/{sig}` record.
pub fn decode_topic0_mode(bytes: &[u8]) -> Result<Topic0Mode> {
    let mut reader = Reader::versioned(bytes, "topic0_mode")?;
    let log_enabled = match reader.u8()? {
        0 => false,
        1 => true,
        _ => return Err(Error::Decode("invalid topic0_mode flag")),
    };
    let mode = Topic0Mode { log_enabled, enabled_from_block: reader.u64()? };
    reader.finish()?;
    Ok(mode)
}

/// Encode a `topic0_stats/{sig}` record.
pub fn encode_topic0_stats(stats: &Topic0Stats) -> Bytes {
    let mut out = Vec::with_capacity(25 + stats.ring_bits.len());
    out.push(CODEC_V1);
    out.extend_from_slice(&stats.window_len.to_be_bytes());
    out.extend_from_slice(&stats.blocks_seen_in_window.to_be_bytes());
    out.extend_from_slice(&stats.ring_cursor.to_be_bytes());
    out.extend_from_slice(&stats.last_updated_block.to_be_bytes());
    out.extend_from_slice(&(stats.ring_bits.len() as u32).to_be_bytes());
    out.extend_from_slice(&stats.ring_bits);
    Bytes::from(out)
}

/// Decode a `topic0_stats/{sig}` record.
pub fn decode_topic0_stats(bytes: &[u8]) -> Result<Topic0Stats> {
    let mut reader = Reader::versioned(bytes, "topic0_stats")?;
    let window_len = reader.u32()?;
    let blocks_seen_in_window = reader.u32()?;
    let ring_cursor = reader.u32()?;
    let last_updated_block = reader.u64()?;
    let ring_len = reader.u32()? as usize;
    let ring_bits = reader.take(ring_len)?.to_vec();
    reader.finish()?;
    if window_len == 0 || ring_bits.len() != (window_len as usize).div_ceil(8) {
        return Err(Error::Decode("topic0_stats ring length mismatch"));
    }
    if ring_cursor >= window_len {
        return Err(Error::Decode("topic0_stats cursor out of range"));
    }
    Ok(Topic0Stats { window_len, blocks_seen_in_window, ring_cursor, last_updated_block, ring_bits })
}
