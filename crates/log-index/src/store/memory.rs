//! In-memory store adapters: the reference semantics for the store
//! contracts and the substrate for crash-injection tests.

use crate::{
    error::{Error, Result},
    store::traits::{BlobStore, DelCond, FenceToken, MetaStore, Page, PutCond, PutOutcome, Record},
};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;

fn page_from<'a>(
    keys: impl Iterator<Item = &'a Vec<u8>>,
    prefix: &[u8],
    cursor: Option<Vec<u8>>,
    limit: usize,
) -> Page {
    let start = cursor.unwrap_or_default();
    let mut page = Page::default();
    for key in keys {
        if key.as_slice() <= start.as_slice() && !start.is_empty() {
            continue;
        }
        if !key.starts_with(prefix) {
            continue;
        }
        page.keys.push(key.clone());
        if page.keys.len() == limit {
            page.next_cursor = page.keys.last().cloned();
            break;
        }
    }
    page
}

/// In-memory [`MetaStore`] backed by a `BTreeMap`.
///
/// Ignores fence tokens; wrap in
/// [`FencedMetaStore`](crate::store::FencedMetaStore) to test fencing.
#[derive(Debug, Default)]
pub struct InMemoryMetaStore {
    inner: RwLock<BTreeMap<Vec<u8>, Record>>,
}

impl InMemoryMetaStore {
    /// The number of stored records.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Snapshot all records as `(key, value)` pairs, for byte-level state
    /// comparison in tests.
    pub fn dump(&self) -> Vec<(Vec<u8>, Bytes)> {
        self.inner
            .read()
            .iter()
            .map(|(key, record)| (key.clone(), record.value.clone()))
            .collect()
    }
}

#[async_trait::async_trait]
impl MetaStore for InMemoryMetaStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Record>> {
        Ok(self.inner.read().get(key).cloned())
    }

    async fn put(
        &self,
        key: &[u8],
        value: Bytes,
        cond: PutCond,
        _fence: FenceToken,
    ) -> Result<PutOutcome> {
        let mut guard = self.inner.write();
        let current = guard.get(key).map(|record| record.version);
        let allowed = match (cond, current) {
            (PutCond::Any, _) => true,
            (PutCond::IfAbsent, None) => true,
            (PutCond::IfAbsent, Some(_)) => false,
            (PutCond::IfVersion(expected), Some(version)) => version == expected,
            (PutCond::IfVersion(_), None) => false,
        };
        if !allowed {
            return Ok(PutOutcome::NotApplied { current });
        }
        let version = current.map_or(1, |v| v + 1);
        guard.insert(key.to_vec(), Record { value, version });
        Ok(PutOutcome::Applied { version })
    }

    async fn delete(&self, key: &[u8], cond: DelCond, _fence: FenceToken) -> Result<()> {
        let mut guard = self.inner.write();
        let matches = match (cond, guard.get(key)) {
            (DelCond::Any, _) => true,
            (DelCond::IfVersion(expected), Some(record)) => record.version == expected,
            (DelCond::IfVersion(_), None) => false,
        };
        if matches {
            guard.remove(key);
        }
        Ok(())
    }

    async fn list_prefix(
        &self,
        prefix: &[u8],
        cursor: Option<Vec<u8>>,
        limit: usize,
    ) -> Result<Page> {
        Ok(page_from(self.inner.read().keys(), prefix, cursor, limit))
    }
}

/// In-memory [`BlobStore`] enforcing write-once semantics.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    inner: RwLock<BTreeMap<Vec<u8>, Bytes>>,
}

impl InMemoryBlobStore {
    /// The number of stored blobs.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Snapshot all blobs, for byte-level state comparison in tests.
    pub fn dump(&self) -> Vec<(Vec<u8>, Bytes)> {
        self.inner.read().iter().map(|(key, value)| (key.clone(), value.clone())).collect()
    }
}

#[async_trait::async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, key: &[u8], value: Bytes) -> Result<()> {
        let mut guard = self.inner.write();
        if let Some(existing) = guard.get(key) {
            if existing == &value {
                return Ok(());
            }
            return Err(Error::Corruption(format!(
                "blob key {} rewritten with different contents",
                String::from_utf8_lossy(key)
            )));
        }
        guard.insert(key.to_vec(), value);
        Ok(())
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.inner.read().get(key).cloned())
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner.write().remove(key);
        Ok(())
    }

    async fn list_prefix(
        &self,
        prefix: &[u8],
        cursor: Option<Vec<u8>>,
        limit: usize,
    ) -> Result<Page> {
        Ok(page_from(self.inner.read().keys(), prefix, cursor, limit))
    }
}
