//! Persistent, backend-agnostic inverted index over finalized Ethereum
//! logs.
//!
//! Given a finalized canonical block stream, the engine maintains chunked
//! roaring-bitmap indexes keyed by address and topic values so that an
//! `eth_getLogs`-equivalent filter query costs proportionally to its
//! matching set rather than the scanned range. It runs over any backend
//! pair offering per-key compare-and-swap (the MetaStore) and immutable
//! blobs (the BlobStore), and stays deterministic across process restarts
//! and crashes mid-write.
//!
//! ## Overview
//!
//! - [`store`] — the two store contracts plus in-memory/filesystem
//!   adapters and the fencing/retry gateways.
//! - [`codec`] — versioned binary codecs; chunk blobs are CRC32-tailed.
//! - [`ingest`] — the single-writer pipeline: ordered append, chunk
//!   sealing, manifest CAS, topic0 window maintenance, and the
//!   `meta/state` CAS that is the sole visibility barrier.
//! - [`query`] — lock-free readers: snapshot, plan with overlap-aware
//!   estimates, intersect in selectivity order, late block-level topic0
//!   filtering, exact filter, early stop.
//! - [`gc`], [`lease`], [`recovery`] — orphan reclamation under
//!   guardrails, writer fencing, and lazy startup.
//!
//! ## Usage
//!
//! ```rust
//! use log_index::{
//!     api::{FinalizedLogIndex, LogIndexService},
//!     config::Config,
//!     filter::{Clause, LogFilter, QueryOptions},
//!     store::{InMemoryBlobStore, InMemoryMetaStore},
//!     types::Block,
//! };
//!
//! # async fn example() -> log_index::Result<()> {
//! let service = LogIndexService::new(
//!     Config::default(),
//!     InMemoryMetaStore::default(),
//!     InMemoryBlobStore::default(),
//!     1,
//! );
//!
//! let genesis = Block {
//!     block_num: 0,
//!     block_hash: Default::default(),
//!     parent_hash: Default::default(),
//!     logs: vec![],
//! };
//! service.ingest_finalized_block(genesis).await?;
//!
//! let logs = service
//!     .query_finalized(LogFilter::default(), QueryOptions::default())
//!     .await?;
//! assert!(logs.is_empty());
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![warn(missing_docs)]

pub mod api;
pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod filter;
pub mod gc;
pub mod ingest;
pub mod keys;
pub mod lease;
pub mod metrics;
pub mod query;
pub mod recovery;
pub mod state;
pub mod store;
pub mod types;

pub use api::{FinalizedLogIndex, LogIndexService};
pub use config::Config;
pub use error::{Error, Result};
pub use filter::{Clause, LogFilter, QueryOptions};
pub use metrics::HealthReport;
pub use state::ServiceMode;
pub use types::{Block, BlockMeta, IngestOutcome, Log, MetaState, RejectReason};
