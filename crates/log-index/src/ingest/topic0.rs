//! Topic0 hybrid-policy maintenance.
//!
//! Every signature keeps a rolling window of which recent blocks contained
//! it. The window advances lazily: stats carry `last_updated_block`, and
//! the gap is caught up when the signature is next observed. Hysteresis
//! with well-separated enable/disable rates keeps borderline signatures
//! from flapping between modes.

use crate::{
    codec::{
        decode_topic0_mode, decode_topic0_stats, encode_topic0_mode, encode_topic0_stats,
        Topic0Mode, Topic0Stats,
    },
    config::Topic0Config,
    error::{Error, Result},
    keys::{topic0_mode_key, topic0_stats_key},
    store::{FenceToken, MetaStore, PutCond, PutOutcome},
};
use alloy_primitives::B256;
use std::collections::HashMap;
use tracing::info;

#[derive(Debug)]
struct ModeEntry {
    mode: Topic0Mode,
    version: Option<u64>,
}

#[derive(Debug)]
struct StatsEntry {
    stats: Topic0Stats,
    version: Option<u64>,
}

/// The writer's cache of topic0 modes and window stats.
#[derive(Debug, Default)]
pub(crate) struct Topic0Registry {
    modes: HashMap<B256, ModeEntry>,
    stats: HashMap<B256, StatsEntry>,
}

/// Advance the ring over the gap since its last update, clearing the bits
/// of blocks that left the window, then record `block_num`.
fn observe(stats: &mut Topic0Stats, block_num: u64) {
    if block_num < stats.last_updated_block {
        // Stale replay of an already-reflected block.
        return;
    }
    if block_num > stats.last_updated_block {
        let gap = block_num - stats.last_updated_block;
        if gap >= stats.window_len as u64 {
            stats.ring_bits.fill(0);
            stats.blocks_seen_in_window = 0;
            stats.ring_cursor = (block_num % stats.window_len as u64) as u32;
        } else {
            for _ in 0..gap {
                stats.ring_cursor = (stats.ring_cursor + 1) % stats.window_len;
                stats.clear_bit(stats.ring_cursor);
            }
        }
        stats.last_updated_block = block_num;
    }
    stats.set_bit((block_num % stats.window_len as u64) as u32);
}

impl Topic0Registry {
    /// The current mode for a signature (disabled if never recorded).
    pub(crate) async fn mode<M: MetaStore + ?Sized>(
        &mut self,
        meta: &M,
        signature: &B256,
    ) -> Result<Topic0Mode> {
        if let Some(entry) = self.modes.get(signature) {
            return Ok(entry.mode);
        }
        let entry = match meta.get(&topic0_mode_key(signature)).await? {
            Some(record) => ModeEntry {
                mode: decode_topic0_mode(&record.value)?,
                version: Some(record.version),
            },
            None => ModeEntry { mode: Topic0Mode::default(), version: None },
        };
        let mode = entry.mode;
        self.modes.insert(*signature, entry);
        Ok(mode)
    }

    /// Record that `signature` appeared in `block_num`, advance its window
    /// and apply the hysteresis transition rules.
    pub(crate) async fn observe_block<M: MetaStore + ?Sized>(
        &mut self,
        meta: &M,
        config: &Topic0Config,
        signature: &B256,
        block_num: u64,
        epoch: u64,
    ) -> Result<()> {
        if !self.stats.contains_key(signature) {
            let entry = match meta.get(&topic0_stats_key(signature)).await? {
                Some(record) => {
                    let stats = decode_topic0_stats(&record.value)?;
                    if stats.window_len == config.window_len {
                        StatsEntry { stats, version: Some(record.version) }
                    } else {
                        // Window reconfigured; restart the ring.
                        StatsEntry {
                            stats: Topic0Stats::new(config.window_len, block_num),
                            version: Some(record.version),
                        }
                    }
                }
                None => StatsEntry {
                    stats: Topic0Stats::new(config.window_len, block_num),
                    version: None,
                },
            };
            self.stats.insert(*signature, entry);
        }

        let entry = self.stats.get_mut(signature).expect("inserted above");
        observe(&mut entry.stats, block_num);

        let cond = entry.version.map_or(PutCond::IfAbsent, PutCond::IfVersion);
        let outcome = meta
            .put(
                &topic0_stats_key(signature),
                encode_topic0_stats(&entry.stats),
                cond,
                FenceToken(epoch),
            )
            .await?;
        match outcome {
            PutOutcome::Applied { version } => entry.version = Some(version),
            PutOutcome::NotApplied { .. } => {
                return Err(Error::Internal(
                    "topic0 stats CAS lost (concurrent writer)".to_owned(),
                ))
            }
        }

        if !entry.stats.window_filled() {
            return Ok(());
        }
        let rate = entry.stats.rate();
        let mode = self.mode(meta, signature).await?;
        let next = if !mode.log_enabled && rate < config.enable_rate {
            // The transition takes effect from the next block; the block
            // being ingested is not log-level covered.
            Some(Topic0Mode { log_enabled: true, enabled_from_block: block_num + 1 })
        } else if mode.log_enabled && rate > config.disable_rate {
            Some(Topic0Mode { log_enabled: false, enabled_from_block: 0 })
        } else {
            None
        };

        if let Some(next) = next {
            info!(
                target: "log_index::topic0",
                signature = %signature,
                rate,
                log_enabled = next.log_enabled,
                enabled_from_block = next.enabled_from_block,
                "topic0 mode transition"
            );
            let entry = self.modes.get_mut(signature).expect("mode loaded above");
            let cond = entry.version.map_or(PutCond::IfAbsent, PutCond::IfVersion);
            let outcome = meta
                .put(&topic0_mode_key(signature), encode_topic0_mode(&next), cond, FenceToken(epoch))
                .await?;
            match outcome {
                PutOutcome::Applied { version } => {
                    entry.mode = next;
                    entry.version = Some(version);
                }
                PutOutcome::NotApplied { .. } => {
                    return Err(Error::Internal(
                        "topic0 mode CAS lost (concurrent writer)".to_owned(),
                    ))
                }
            }
        }
        Ok(())
    }
}
