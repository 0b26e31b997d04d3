//! Engine configuration.
//!
//! Configuration loading (files, CLI, env) is an embedder concern; this
//! module only defines the recognized options and their defaults.

use alloy_primitives::B256;
use std::time::Duration;

/// Chunk sealing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Seal a tail into a chunk once it holds this many entries.
    pub target_entries: u64,
    /// Seal a tail once its serialized size reaches this many bytes.
    /// Backend-tuned; the default suits object stores with ~1 MiB objects.
    pub target_bytes: usize,
    /// Seal any non-empty tail that has not been sealed for this long,
    /// driven by [`run_periodic_maintenance`](crate::ingest::IngestEngine::run_periodic_maintenance).
    pub maintenance_seal_interval: Duration,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            target_entries: 1950,
            target_bytes: 1 << 20,
            maintenance_seal_interval: Duration::from_secs(600),
        }
    }
}

/// Tail checkpoint policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailConfig {
    /// Flush dirty tails at least this often when maintenance runs.
    /// Tails touched by a block are always checkpointed at the end of that
    /// block regardless of this interval.
    pub flush_interval: Duration,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self { flush_interval: Duration::from_secs(5) }
    }
}

/// Topic0 hybrid-index policy (rolling window with hysteresis).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Topic0Config {
    /// The rolling window length in blocks.
    pub window_len: u32,
    /// Enable log-level indexing for a signature once its appearance rate
    /// drops below this fraction of the window.
    pub enable_rate: f64,
    /// Disable log-level indexing once the rate exceeds this fraction.
    pub disable_rate: f64,
}

impl Default for Topic0Config {
    fn default() -> Self {
        Self { window_len: 50_000, enable_rate: 0.001, disable_rate: 0.010 }
    }
}

/// What to do when an OR-list exceeds `max_or_terms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadQueryAction {
    /// Fail the query with `QueryTooBroad`.
    Error,
    /// Fall back to the block-driven scan.
    BlockScan,
}

/// Query planner guardrails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannerConfig {
    /// Maximum OR-list size per clause.
    pub max_or_terms: usize,
    /// Action on exceedance.
    pub broad_query_action: BroadQueryAction,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self { max_or_terms: 128, broad_query_action: BroadQueryAction::Error }
    }
}

/// Garbage collection caps and scan bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcConfig {
    /// Guardrail: maximum tolerated orphan chunk bytes.
    pub max_orphan_chunk_bytes: u64,
    /// Guardrail: maximum tolerated orphan manifest segments.
    pub max_orphan_manifest_segments: u64,
    /// Guardrail: maximum tolerated stale tail keys.
    pub max_stale_tail_keys: u64,
    /// Prune `block_hash_to_num` entries below this block, if set.
    pub prune_block_hash_floor: Option<u64>,
    /// Page size for prefix scans per GC run.
    pub page_limit: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            max_orphan_chunk_bytes: 32 << 30,
            max_orphan_manifest_segments: 500_000,
            max_stale_tail_keys: 1_000_000,
            prune_block_hash_floor: None,
            page_limit: 1024,
        }
    }
}

/// What to do when a GC guardrail cap is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardrailAction {
    /// Keep ingesting at a reduced rate.
    Throttle,
    /// Refuse further ingests (degraded mode).
    FailClosed,
}

/// Guardrail behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardrailConfig {
    /// Action taken on exceedance.
    pub action: GuardrailAction,
    /// Per-block delay applied while throttled.
    pub throttle_delay: Duration,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self { action: GuardrailAction::Throttle, throttle_delay: Duration::from_millis(250) }
    }
}

/// Manifest representation thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManifestConfig {
    /// Keep chunk refs inline in the header up to this many.
    pub inline_refs_max: usize,
    /// Maximum chunk refs per manifest segment once segmented.
    pub segment_refs: usize,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self { inline_refs_max: 64, segment_refs: 512 }
    }
}

/// Read-path LRU cache sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Cached manifest views.
    pub manifest_entries: usize,
    /// Cached tail bitmaps.
    pub tail_entries: usize,
    /// Cached chunk payloads.
    pub chunk_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { manifest_entries: 4096, tail_entries: 4096, chunk_entries: 1024 }
    }
}

/// Bounded exponential backoff for transient backend errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts before escalating to a permanent backend error.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each attempt.
    pub base_delay: Duration,
    /// Upper bound on any single delay, pre-jitter.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

/// Writer lease behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseConfig {
    /// How long an acquired or renewed lease remains valid.
    pub ttl: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self { ttl: Duration::from_secs(15) }
    }
}

/// Read-path behavior under degraded mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryConfig {
    /// Serve queries from the last-consistent snapshot while degraded.
    /// When false, queries are refused with `Degraded`.
    pub serve_when_degraded: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { serve_when_degraded: true }
    }
}

/// Where the finalized chain starts for this deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GenesisConfig {
    /// The first ingestible block number.
    pub first_block: u64,
    /// Expected parent hash of the first block; unchecked when `None`.
    pub parent_hash: Option<B256>,
}

/// Startup warmup behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryConfig {
    /// Pre-load manifests for up to this many streams from the persisted
    /// warm list.
    pub warm_streams: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self { warm_streams: 64 }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    /// Chunk sealing policy.
    pub chunk: ChunkConfig,
    /// Tail checkpoint policy.
    pub tail: TailConfig,
    /// Topic0 hybrid policy.
    pub topic0: Topic0Config,
    /// Planner guardrails.
    pub planner: PlannerConfig,
    /// GC caps.
    pub gc: GcConfig,
    /// Guardrail behavior.
    pub guardrail: GuardrailConfig,
    /// Manifest representation thresholds.
    pub manifest: ManifestConfig,
    /// Cache sizing.
    pub cache: CacheConfig,
    /// Transient-error retry policy.
    pub retry: RetryConfig,
    /// Writer lease behavior.
    pub lease: LeaseConfig,
    /// Degraded-mode read policy.
    pub query: QueryConfig,
    /// Chain genesis base.
    pub genesis: GenesisConfig,
    /// Startup warmup.
    pub recovery: RecoveryConfig,
}
