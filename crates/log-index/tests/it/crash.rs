//! Crash-injection matrix: a fault at every write boundary, then a restart
//! and replay, must converge to the byte-identical state of a crash-free
//! run, and no query may ever observe an unpublished block.

use crate::utils::{mk_chain, mk_log};
use bytes::Bytes;
use log_index::{
    config::Config,
    error::{Error, Result},
    filter::{LogFilter, QueryOptions},
    store::{
        BlobStore, DelCond, FenceToken, InMemoryBlobStore, InMemoryMetaStore, MetaStore, Page,
        PutCond, PutOutcome, Record,
    },
    types::Block,
    FinalizedLogIndex, LogIndexService,
};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Clone, Copy, PartialEq, Eq)]
enum FaultOp {
    MetaPut,
    BlobPut,
}

struct FaultPlan {
    op: FaultOp,
    prefix: Vec<u8>,
    fail_on_match: usize,
    seen: usize,
}

/// Fails the n-th write matching an (operation, key prefix) pair.
#[derive(Default)]
struct FaultInjector {
    plan: Mutex<Option<FaultPlan>>,
}

impl FaultInjector {
    fn arm(&self, op: FaultOp, prefix: &[u8], fail_on_match: usize) {
        *self.plan.lock() =
            Some(FaultPlan { op, prefix: prefix.to_vec(), fail_on_match, seen: 0 });
    }

    fn clear(&self) {
        *self.plan.lock() = None;
    }

    fn maybe_fail(&self, op: FaultOp, key: &[u8]) -> Result<()> {
        let mut guard = self.plan.lock();
        let Some(plan) = guard.as_mut() else { return Ok(()) };
        if plan.op != op || !key.starts_with(&plan.prefix) {
            return Ok(());
        }
        plan.seen += 1;
        if plan.seen == plan.fail_on_match {
            *guard = None;
            return Err(Error::Backend("injected crash fault".to_owned()));
        }
        Ok(())
    }
}

#[derive(Clone)]
struct FaultyMetaStore {
    inner: Arc<InMemoryMetaStore>,
    injector: Arc<FaultInjector>,
}

#[async_trait::async_trait]
impl MetaStore for FaultyMetaStore {
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
        self.injector.maybe_fail(FaultOp::MetaPut, key)?;
        self.inner.put(key, value, cond, fence).await
    }

    async fn delete(&self, key: &[u8], cond: DelCond, fence: FenceToken) -> Result<()> {
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

#[derive(Clone)]
struct FaultyBlobStore {
    inner: Arc<InMemoryBlobStore>,
    injector: Arc<FaultInjector>,
}

#[async_trait::async_trait]
impl BlobStore for FaultyBlobStore {
    async fn put(&self, key: &[u8], value: Bytes) -> Result<()> {
        self.injector.maybe_fail(FaultOp::BlobPut, key)?;
        self.inner.put(key, value).await
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner.delete(key).await
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

fn crash_config() -> Config {
    let mut config = Config::default();
    // Seal on every block so each attempt crosses every write boundary.
    config.chunk.target_entries = 1;
    config.genesis.first_block = 1;
    config
}

/// A service simulating one process lifetime over shared stores.
fn mk_service(
    meta: Arc<InMemoryMetaStore>,
    blob: Arc<InMemoryBlobStore>,
    injector: Arc<FaultInjector>,
) -> LogIndexService<FaultyMetaStore, FaultyBlobStore> {
    LogIndexService::new(
        crash_config(),
        FaultyMetaStore { inner: meta, injector: injector.clone() },
        FaultyBlobStore { inner: blob, injector },
        1,
    )
}

/// Manifest headers embed a seal wall-clock timestamp and a tail-version
/// cache hint; both may legitimately differ between a replayed run and the
/// reference run. Everything else must match byte for byte.
fn normalize(mut dump: Vec<(Vec<u8>, Bytes)>) -> Vec<(Vec<u8>, Bytes)> {
    use log_index::codec::{decode_manifest, encode_manifest};
    for (key, value) in &mut dump {
        if key.starts_with(b"manifests/") {
            let mut manifest = decode_manifest(value).expect("decode manifest");
            manifest.last_seal_unix_sec = 0;
            manifest.tail_version = None;
            *value = encode_manifest(&manifest);
        }
    }
    dump
}

fn test_blocks() -> Vec<Block> {
    mk_chain(1, 2, |block_num| {
        vec![
            mk_log(1, 0x10, 0x20, block_num, 0, 0),
            mk_log(2, 0x11, 0x21, block_num, 0, 1),
        ]
    })
}

/// The store contents of a crash-free run, as the convergence reference.
async fn reference_dumps(blocks: &[Block]) -> (Vec<(Vec<u8>, Bytes)>, Vec<(Vec<u8>, Bytes)>) {
    let meta = Arc::new(InMemoryMetaStore::default());
    let blob = Arc::new(InMemoryBlobStore::default());
    let service = mk_service(meta.clone(), blob.clone(), Arc::new(FaultInjector::default()));
    for block in blocks {
        service.ingest_finalized_block(block.clone()).await.expect("reference ingest");
    }
    (normalize(meta.dump()), blob.dump())
}

#[tokio::test]
async fn faults_at_every_write_boundary_converge() {
    let blocks = test_blocks();
    let (reference_meta, reference_blob) = reference_dumps(&blocks).await;

    let cases: &[(&str, FaultOp, &[u8], usize)] = &[
        ("logs_put_first", FaultOp::MetaPut, b"logs/", 1),
        ("logs_put_second", FaultOp::MetaPut, b"logs/", 2),
        ("block_meta_put", FaultOp::MetaPut, b"block_meta/", 1),
        ("block_hash_to_num_put", FaultOp::MetaPut, b"block_hash_to_num/", 1),
        ("manifest_put_first", FaultOp::MetaPut, b"manifests/", 1),
        ("manifest_put_third", FaultOp::MetaPut, b"manifests/", 3),
        ("tail_put_first", FaultOp::MetaPut, b"tails/", 1),
        ("tail_put_second", FaultOp::MetaPut, b"tails/", 2),
        ("topic0_stats_put", FaultOp::MetaPut, b"topic0_stats/", 1),
        ("state_cas_put", FaultOp::MetaPut, b"meta/state", 1),
        ("chunk_blob_put_first", FaultOp::BlobPut, b"chunks/", 1),
        ("chunk_blob_put_last", FaultOp::BlobPut, b"chunks/", 4),
    ];

    for &(name, op, prefix, fail_on_match) in cases {
        let meta = Arc::new(InMemoryMetaStore::default());
        let blob = Arc::new(InMemoryBlobStore::default());
        let injector = Arc::new(FaultInjector::default());

        // First lifetime: the fault fires mid-block.
        let service = mk_service(meta.clone(), blob.clone(), injector.clone());
        injector.arm(op, prefix, fail_on_match);
        let err = service
            .ingest_finalized_block(blocks[0].clone())
            .await
            .expect_err("fault should fire");
        assert!(matches!(err, Error::Backend(_)), "case={name}");

        // Before the retry, nothing of the torn block is visible.
        let visible = service
            .query_finalized(LogFilter::default(), QueryOptions::default())
            .await
            .expect("query over torn state");
        assert!(visible.is_empty(), "case={name}");

        // Second lifetime: replay the same block, then continue the chain.
        injector.clear();
        let service = mk_service(meta.clone(), blob.clone(), injector.clone());
        service.ingest_finalized_block(blocks[0].clone()).await.expect("retry succeeds");
        service.ingest_finalized_block(blocks[1].clone()).await.expect("next block");
        assert_eq!(service.indexed_finalized_head().await.expect("head"), 2, "case={name}");

        let logs = service
            .query_finalized(LogFilter::default(), QueryOptions::default())
            .await
            .expect("query");
        assert_eq!(logs.len(), 4, "case={name}");

        // Byte-identical convergence with the crash-free run.
        assert_eq!(normalize(meta.dump()), reference_meta, "meta store diverged: case={name}");
        assert_eq!(blob.dump(), reference_blob, "blob store diverged: case={name}");
    }
}

#[tokio::test]
async fn repeated_crashes_eventually_commit() {
    let blocks = test_blocks();
    let (reference_meta, reference_blob) = reference_dumps(&blocks).await;

    let meta = Arc::new(InMemoryMetaStore::default());
    let blob = Arc::new(InMemoryBlobStore::default());
    let injector = Arc::new(FaultInjector::default());

    let staged: &[(FaultOp, &[u8], usize)] = &[
        (FaultOp::MetaPut, b"logs/", 2),
        (FaultOp::BlobPut, b"chunks/", 1),
        (FaultOp::MetaPut, b"manifests/", 2),
        (FaultOp::MetaPut, b"tails/", 3),
        (FaultOp::MetaPut, b"meta/state", 1),
    ];

    for &(op, prefix, fail_on_match) in staged {
        injector.arm(op, prefix, fail_on_match);
        let service = mk_service(meta.clone(), blob.clone(), injector.clone());
        let err = service
            .ingest_finalized_block(blocks[0].clone())
            .await
            .expect_err("staged fault must fire");
        assert!(matches!(err, Error::Backend(_)));
        injector.clear();
    }

    let service = mk_service(meta.clone(), blob.clone(), injector.clone());
    for block in &blocks {
        service.ingest_finalized_block(block.clone()).await.expect("eventual commit");
    }
    assert_eq!(service.indexed_finalized_head().await.expect("head"), 2);
    assert_eq!(normalize(meta.dump()), reference_meta);
    assert_eq!(blob.dump(), reference_blob);
}
