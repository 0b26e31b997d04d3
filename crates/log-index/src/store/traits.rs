//! Abstract store contracts the engine is built against.
//!
//! The engine needs exactly two stores: a [`MetaStore`] for small mutable
//! records with per-key CAS and prefix listing, and a [`BlobStore`] for
//! large immutable payloads with idempotent writes. Concrete distributed
//! backends are adapters supplied by the embedder; this crate ships
//! in-memory and filesystem adapters for tests and embedding convenience.

use crate::error::Result;
use bytes::Bytes;

/// The writer epoch accompanying every mutating operation.
///
/// Stores (or the fence gateway in front of them) reject operations whose
/// token is not the current epoch, which is what makes a deposed writer
/// harmless: none of its in-flight writes can land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FenceToken(pub u64);

/// A versioned MetaStore record.
#[derive(Debug, Clone)]
pub struct Record {
    /// The record value.
    pub value: Bytes,
    /// The backend version used for CAS. Starts at 1 and increases on
    /// every applied write.
    pub version: u64,
}

/// Write precondition for [`MetaStore::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutCond {
    /// Unconditional write.
    Any,
    /// Apply only if the key does not exist.
    IfAbsent,
    /// Apply only if the current version equals the expected one.
    IfVersion(u64),
}

/// Delete precondition for [`MetaStore::delete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelCond {
    /// Unconditional delete.
    Any,
    /// Delete only if the current version equals the expected one.
    IfVersion(u64),
}

/// Discriminated result of a conditional put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The write was applied; the key now has this version.
    Applied {
        /// The new version.
        version: u64,
    },
    /// The precondition failed; nothing was written.
    NotApplied {
        /// The version currently stored, or `None` if the key is absent.
        current: Option<u64>,
    },
}

impl PutOutcome {
    /// Whether the write was applied.
    pub const fn applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    /// The new version if the write was applied.
    pub const fn version(&self) -> Option<u64> {
        match self {
            Self::Applied { version } => Some(*version),
            Self::NotApplied { .. } => None,
        }
    }
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// The matching keys, in ascending byte order.
    pub keys: Vec<Vec<u8>>,
    /// Cursor to pass to the next call, or `None` when exhausted.
    pub next_cursor: Option<Vec<u8>>,
}

/// Small mutable records with compare-and-swap and prefix listing.
///
/// Required semantics: true per-key CAS (not read-check-write), no partial
/// writes, and linearizability sufficient for single-writer correctness.
/// Backends lacking fencing are wrapped by
/// [`FencedMetaStore`](crate::store::FencedMetaStore).
#[async_trait::async_trait]
pub trait MetaStore: Send + Sync {
    /// Read a record and its version.
    async fn get(&self, key: &[u8]) -> Result<Option<Record>>;

    /// Conditionally write a record.
    async fn put(
        &self,
        key: &[u8],
        value: Bytes,
        cond: PutCond,
        fence: FenceToken,
    ) -> Result<PutOutcome>;

    /// Conditionally delete a record. Deleting an absent key succeeds.
    async fn delete(&self, key: &[u8], cond: DelCond, fence: FenceToken) -> Result<()>;

    /// List keys under a prefix, ascending, starting after `cursor`.
    async fn list_prefix(
        &self,
        prefix: &[u8],
        cursor: Option<Vec<u8>>,
        limit: usize,
    ) -> Result<Page>;
}

/// Large immutable payloads keyed deterministically.
///
/// `put` is idempotent: rewriting a key with identical bytes is a no-op;
/// differing bytes at an existing key is a hard (corruption) error, since
/// chunk keys are derived deterministically from stream state.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    /// Write a blob.
    async fn put(&self, key: &[u8], value: Bytes) -> Result<()>;

    /// Read a blob.
    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

    /// Best-effort delete; absence is success.
    async fn delete(&self, key: &[u8]) -> Result<()>;

    /// List blob keys under a prefix, ascending, starting after `cursor`.
    async fn list_prefix(
        &self,
        prefix: &[u8],
        cursor: Option<Vec<u8>>,
        limit: usize,
    ) -> Result<Page>;
}
