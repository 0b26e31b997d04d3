//! Writer fencing: lease-driven epochs and stale-writer rejection.

use crate::utils::{mk_chain, mk_log, test_config};
use log_index::{
    lease::LeaseManager,
    store::{EpochCell, FencedMetaStore, InMemoryBlobStore, InMemoryMetaStore},
    Error, FinalizedLogIndex, LogIndexService, ServiceMode,
};
use std::sync::Arc;

#[tokio::test]
async fn leased_writer_ingests_and_reports_health() {
    let meta = Arc::new(InMemoryMetaStore::default());
    let lease = Arc::new(LeaseManager::new(
        Arc::clone(&meta),
        log_index::config::LeaseConfig::default(),
        "writer-a",
    ));
    lease.acquire(now_unix()).await.expect("acquire");

    let service = LogIndexService::new(
        test_config(1),
        InMemoryMetaStore::default(),
        InMemoryBlobStore::default(),
        0,
    )
    .with_lease(Arc::clone(&lease));

    for block in mk_chain(1, 2, |block_num| vec![mk_log(1, 2, 3, block_num, 0, 0)]) {
        service.ingest_finalized_block(block).await.expect("ingest");
    }
    assert!(service.health().await.lease_held);
    assert_eq!(service.indexed_finalized_head().await.expect("head"), 2);
}

#[tokio::test]
async fn abandoned_lease_stops_the_writer() {
    let meta = Arc::new(InMemoryMetaStore::default());
    let lease = Arc::new(LeaseManager::new(
        Arc::clone(&meta),
        log_index::config::LeaseConfig::default(),
        "writer-a",
    ));
    lease.acquire(now_unix()).await.expect("acquire");

    let service = LogIndexService::new(
        test_config(1),
        InMemoryMetaStore::default(),
        InMemoryBlobStore::default(),
        0,
    )
    .with_lease(Arc::clone(&lease));

    let mut blocks = mk_chain(1, 2, |block_num| vec![mk_log(1, 2, 3, block_num, 0, 0)]);
    service.ingest_finalized_block(blocks.remove(0)).await.expect("ingest");

    lease.abandon();
    let err = service.ingest_finalized_block(blocks.remove(0)).await.expect_err("stopped");
    assert!(matches!(err, Error::LeaseLost));
    assert!(!service.health().await.lease_held);
}

#[tokio::test]
async fn stale_epoch_writer_is_fenced_out() {
    // Both writers share one fenced backend; the epoch cell plays the role
    // of the store-side fencing authority.
    let backend = Arc::new(InMemoryMetaStore::default());
    let epoch = Arc::new(EpochCell::new(1));

    let service = LogIndexService::new(
        test_config(1),
        FencedMetaStore::new(SharedMeta(Arc::clone(&backend)), Arc::clone(&epoch)),
        InMemoryBlobStore::default(),
        1,
    );

    let mut blocks = mk_chain(1, 2, |block_num| vec![mk_log(1, 2, 3, block_num, 0, 0)]);
    service.ingest_finalized_block(blocks.remove(0)).await.expect("ingest at epoch 1");

    // A successor writer bumps the epoch; the old writer's next mutation is
    // rejected before it can touch the store, and the old writer degrades.
    epoch.raise(2);
    let err = service.ingest_finalized_block(blocks.remove(0)).await.expect_err("fenced");
    assert!(matches!(err, Error::FenceRejected { epoch: 1 }));
    assert_eq!(service.health().await.mode, ServiceMode::Degraded);

    // A fresh writer at the current epoch picks up cleanly.
    let successor = LogIndexService::new(
        test_config(1),
        FencedMetaStore::new(SharedMeta(backend), Arc::clone(&epoch)),
        InMemoryBlobStore::default(),
        2,
    );
    let blocks = mk_chain(1, 2, |block_num| vec![mk_log(1, 2, 3, block_num, 0, 0)]);
    for block in blocks {
        match successor.ingest_finalized_block(block).await.expect("successor ingest") {
            log_index::IngestOutcome::Applied { .. }
            | log_index::IngestOutcome::AlreadyIngested => {}
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!(successor.indexed_finalized_head().await.expect("head"), 2);
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_secs()
}

/// Arc pass-through so two services can share one backend.
#[derive(Debug, Clone)]
struct SharedMeta(Arc<InMemoryMetaStore>);

#[async_trait::async_trait]
impl log_index::store::MetaStore for SharedMeta {
    async fn get(&self, key: &[u8]) -> log_index::Result<Option<log_index::store::Record>> {
        self.0.get(key).await
    }

    async fn put(
        &self,
        key: &[u8],
        value: bytes::Bytes,
        cond: log_index::store::PutCond,
        fence: log_index::store::FenceToken,
    ) -> log_index::Result<log_index::store::PutOutcome> {
        self.0.put(key, value, cond, fence).await
    }

    async fn delete(
        &self,
        key: &[u8],
        cond: log_index::store::DelCond,
        fence: log_index::store::FenceToken,
    ) -> log_index::Result<()> {
        self.0.delete(key, cond, fence).await
    }

    async fn list_prefix(
        &self,
        prefix: &[u8],
        cursor: Option<Vec<u8>>,
        limit: usize,
    ) -> log_index::Result<log_index::store::Page> {
        self.0.list_prefix(prefix, cursor, limit).await
    }
}
