//! Fencing gateway for backends without native epoch enforcement.
//!
//! The single-writer contract requires every mutating operation to carry
//! the current writer epoch and the store to reject stale ones. Backends
//! that cannot enforce this natively are wrapped in [`FencedMetaStore`],
//! which validates tokens against a shared [`EpochCell`] before the backend
//! sees the operation. Rejection happens before any mutation, so a stale
//! writer can never leave a partial write behind.

use crate::{
    error::{Error, Result},
    store::traits::{DelCond, FenceToken, MetaStore, Page, PutCond, PutOutcome, Record},
};
use bytes::Bytes;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// The current writer epoch, shared between the lease manager and fencing
/// gateways.
#[derive(Debug, Default)]
pub struct EpochCell(AtomicU64);

impl EpochCell {
    /// A cell starting at the given epoch.
    pub fn new(epoch: u64) -> Self {
        Self(AtomicU64::new(epoch))
    }

    /// The current epoch.
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Raise the epoch. Epochs are monotone; lowering is ignored.
    pub fn raise(&self, epoch: u64) {
        self.0.fetch_max(epoch, Ordering::AcqRel);
    }
}

/// A [`MetaStore`] wrapper that rejects operations carrying a stale epoch.
#[derive(Debug)]
pub struct FencedMetaStore<M> {
    inner: M,
    epoch: Arc<EpochCell>,
}

impl<M> FencedMetaStore<M> {
    /// Wrap `inner`, validating fences against `epoch`.
    pub const fn new(inner: M, epoch: Arc<EpochCell>) -> Self {
        Self { inner, epoch }
    }

    /// The shared epoch cell.
    pub fn epoch_cell(&self) -> Arc<EpochCell> {
        Arc::clone(&self.epoch)
    }

    fn check(&self, fence: FenceToken) -> Result<()> {
        let current = self.epoch.current();
        if fence.0 != current {
            return Err(Error::FenceRejected { epoch: fence.0 });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl<M: MetaStore> MetaStore for FencedMetaStore<M> {
    async fn get(&self, key: &[u8]) -> Result<Option<Record>> {
        self.inner.get(key).await
    }

    async fn put(
        &self,
        key: &[u8],
        value: Bytes,
        cond: PutCond,
        fence: FenceToken,
    ) -> Result<PutOutcome> {
        self.check(fence)?;
        self.inner.put(key, value, cond, fence).await
    }

    async fn delete(&self, key: &[u8], cond: DelCond, fence: FenceToken) -> Result<()> {
        self.check(fence)?;
        self.inner.delete(key, cond, fence).await
    }

    async fn list_prefix(
        &self,
        prefix: &[u8],
        cursor: Option<Vec<u8>>,
        limit: usize,
    ) -> Result<Page> {
        self.inner.list_prefix(prefix, cursor, limit).await
    }
}
