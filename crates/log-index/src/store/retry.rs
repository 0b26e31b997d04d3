//! Retry gateway for transient backend errors.
//!
//! Every engine write is idempotent (deterministic keys, CAS publish), so
//! transient failures are retried in place with bounded exponential backoff
//! and jitter. An exhausted budget escalates to a permanent `Backend` error
//! that callers treat like any other backend failure.

use crate::{
    config::RetryConfig,
    error::{Error, Result},
    metrics::Counters,
    store::traits::{
        BlobStore, DelCond, FenceToken, MetaStore, Page, PutCond, PutOutcome, Record,
    },
};
use bytes::Bytes;
use std::{future::Future, sync::Arc, time::Duration};
use tracing::warn;

/// The backoff delay before retry number `attempt` (0-based), jittered.
fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = config.base_delay.saturating_mul(1u32 << attempt.min(16));
    let capped = exp.min(config.max_delay);
    // Full jitter: uniform in [capped/2, capped].
    let nanos = capped.as_nanos() as u64;
    let jittered = nanos / 2 + rand::random::<u64>() % (nanos / 2 + 1);
    Duration::from_nanos(jittered)
}

async fn run_with_retries<T, F, Fut>(
    config: &RetryConfig,
    counters: Option<&Counters>,
    what: &'static str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Err(Error::BackendTransient(message)) => {
                if attempt + 1 >= config.max_attempts {
                    return Err(Error::Backend(format!(
                        "{what} failed after {} attempts: {message}",
                        attempt + 1
                    )));
                }
                let delay = backoff_delay(config, attempt);
                warn!(target: "log_index::store", %message, attempt, ?delay, "retrying {what}");
                if let Some(counters) = counters {
                    counters.backend_retries.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// A [`MetaStore`] wrapper retrying transient failures.
#[derive(Debug)]
pub struct RetryingMetaStore<M> {
    inner: M,
    config: RetryConfig,
    counters: Option<Arc<Counters>>,
}

impl<M> RetryingMetaStore<M> {
    /// Wrap `inner` with the given retry policy.
    pub const fn new(inner: M, config: RetryConfig) -> Self {
        Self { inner, config, counters: None }
    }

    /// Report retries through the given counters.
    pub fn with_counters(mut self, counters: Arc<Counters>) -> Self {
        self.counters = Some(counters);
        self
    }
}

#[async_trait::async_trait]
impl<M: MetaStore> MetaStore for RetryingMetaStore<M> {
    async fn get(&self, key: &[u8]) -> Result<Option<Record>> {
        run_with_retries(&self.config, self.counters.as_deref(), "meta get", || {
            self.inner.get(key)
        })
        .await
    }

    async fn put(
        &self,
        key: &[u8],
        value: Bytes,
        cond: PutCond,
        fence: FenceToken,
    ) -> Result<PutOutcome> {
        run_with_retries(&self.config, self.counters.as_deref(), "meta put", || {
            self.inner.put(key, value.clone(), cond, fence)
        })
        .await
    }

    async fn delete(&self, key: &[u8], cond: DelCond, fence: FenceToken) -> Result<()> {
        run_with_retries(&self.config, self.counters.as_deref(), "meta delete", || {
            self.inner.delete(key, cond, fence)
        })
        .await
    }

    async fn list_prefix(
        &self,
        prefix: &[u8],
        cursor: Option<Vec<u8>>,
        limit: usize,
    ) -> Result<Page> {
        run_with_retries(&self.config, self.counters.as_deref(), "meta list", || {
            self.inner.list_prefix(prefix, cursor.clone(), limit)
        })
        .await
    }
}

/// A [`BlobStore`] wrapper retrying transient failures.
#[derive(Debug)]
pub struct RetryingBlobStore<B> {
    inner: B,
    config: RetryConfig,
    counters: Option<Arc<Counters>>,
}

impl<B> RetryingBlobStore<B> {
    /// Wrap `inner` with the given retry policy.
    pub const fn new(inner: B, config: RetryConfig) -> Self {
        Self { inner, config, counters: None }
    }

    /// Report retries through the given counters.
    pub fn with_counters(mut self, counters: Arc<Counters>) -> Self {
        self.counters = Some(counters);
        self
    }
}

#[async_trait::async_trait]
impl<B: BlobStore> BlobStore for RetryingBlobStore<B> {
    async fn put(&self, key: &[u8], value: Bytes) -> Result<()> {
        run_with_retries(&self.config, self.counters.as_deref(), "blob put", || {
            self.inner.put(key, value.clone())
        })
        .await
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        run_with_retries(&self.config, self.counters.as_deref(), "blob get", || {
            self.inner.get(key)
        })
        .await
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        run_with_retries(&self.config, self.counters.as_deref(), "blob delete", || {
            self.inner.delete(key)
        })
        .await
    }

    async fn list_prefix(
        &self,
        prefix: &[u8],
        cursor: Option<Vec<u8>>,
        limit: usize,
    ) -> Result<Page> {
        run_with_retries(&self.config, self.counters.as_deref(), "blob list", || {
            self.inner.list_prefix(prefix, cursor.clone(), limit)
        })
        .await
    }
}
