//! Filesystem adapters: persistence across service restarts and
//! segmented-manifest reloads.

use crate::utils::{mk_chain, mk_log, naive_query, test_config};
use alloy_primitives::Address;
use log_index::{
    filter::{Clause, LogFilter, QueryOptions},
    store::{FsBlobStore, FsMetaStore},
    FinalizedLogIndex, LogIndexService,
};

fn fs_service(root: &std::path::Path) -> LogIndexService<FsMetaStore, FsBlobStore> {
    let meta = FsMetaStore::open(root).expect("meta store");
    let blob = FsBlobStore::open(root).expect("blob store");
    let mut config = test_config(1);
    config.chunk.target_entries = 2;
    LogIndexService::new(config, meta, blob, 1)
}

#[tokio::test]
async fn survives_process_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let blocks = mk_chain(1, 6, |block_num| {
        vec![
            mk_log(1, 0x10, 0x20, block_num, 0, 0),
            mk_log(2, 0x11, 0x21, block_num, 0, 1),
        ]
    });

    // First lifetime: ingest half the chain.
    let service = fs_service(dir.path());
    for block in &blocks[..3] {
        service.ingest_finalized_block(block.clone()).await.expect("ingest");
    }
    drop(service);

    // Second lifetime: bootstrap, continue, query everything.
    let service = fs_service(dir.path());
    let bootstrap = service.bootstrap().await.expect("bootstrap");
    assert_eq!(
        bootstrap.state.expect("state persisted").indexed_finalized_head,
        3
    );
    for block in &blocks[3..] {
        service.ingest_finalized_block(block.clone()).await.expect("ingest");
    }

    let filter = LogFilter {
        address: Some(Clause::One(Address::repeat_byte(1))),
        ..Default::default()
    };
    let logs = service
        .query_finalized(filter.clone(), QueryOptions::default())
        .await
        .expect("query");
    assert_eq!(logs, naive_query(&blocks, &filter, None));
    assert_eq!(logs.len(), 6);
}

#[tokio::test]
async fn segmented_manifests_reload_correctly() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = test_config(1);
    // Every block seals, and refs spill into tiny segments quickly.
    config.chunk.target_entries = 1;
    config.manifest.inline_refs_max = 2;
    config.manifest.segment_refs = 2;

    let meta = FsMetaStore::open(dir.path()).expect("meta store");
    let blob = FsBlobStore::open(dir.path()).expect("blob store");
    let service = LogIndexService::new(config.clone(), meta, blob, 1);

    let blocks = mk_chain(1, 8, |block_num| vec![mk_log(7, 0x10, 0x20, block_num, 0, 0)]);
    for block in &blocks {
        service.ingest_finalized_block(block.clone()).await.expect("ingest");
    }
    drop(service);

    // A cold restart resolves the segmented manifests and serves exact
    // results across all sealed chunks.
    let meta = FsMetaStore::open(dir.path()).expect("meta store");
    let blob = FsBlobStore::open(dir.path()).expect("blob store");
    let service = LogIndexService::new(config, meta, blob, 1);

    let filter = LogFilter {
        address: Some(Clause::One(Address::repeat_byte(7))),
        ..Default::default()
    };
    let logs = service
        .query_finalized(filter.clone(), QueryOptions::default())
        .await
        .expect("query");
    assert_eq!(logs, naive_query(&blocks, &filter, None));
    assert_eq!(logs.len(), 8);

    // GC over the segmented layout reclaims nothing that is live.
    let stats = service.run_gc_once().await.expect("gc");
    assert_eq!(stats.deleted_orphan_chunks, 0);
    assert_eq!(stats.deleted_orphan_segments, 0);
    assert_eq!(stats.deleted_stale_tails, 0);

    let logs = service
        .query_finalized(filter, QueryOptions::default())
        .await
        .expect("query after gc");
    assert_eq!(logs.len(), 8);
}
