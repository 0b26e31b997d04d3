//! GC reclamation, in-flight guards, pruning and guardrail transitions.

use crate::utils::{block_hash, mk_chain, mk_log, svc, test_config, InMemoryService};
use alloy_primitives::Address;
use log_index::{
    codec::{decode_manifest, encode_chunk, encode_tail, ChunkBlob},
    config::GuardrailAction,
    filter::{LogFilter, QueryOptions},
    keys::{chunk_key, manifest_key, tail_key, StreamKey},
    store::{BlobStore, FenceToken, MetaStore, PutCond},
    Error, FinalizedLogIndex, ServiceMode,
};
use roaring::RoaringBitmap;
use std::time::Duration;

const FENCE: FenceToken = FenceToken(1);

fn bitmap_of(values: &[u32]) -> RoaringBitmap {
    values.iter().copied().collect()
}

async fn ingest_chain(service: &InMemoryService, first_block: u64, count: u64) {
    for block in mk_chain(first_block, count, |block_num| {
        vec![
            mk_log(1, 0x10, 0x20, block_num, 0, 0),
            mk_log(2, 0x10, 0x21, block_num, 0, 1),
        ]
    }) {
        service.ingest_finalized_block(block).await.expect("ingest");
    }
}

/// Seed a stale tail (stream without a manifest header) and an orphan
/// chunk blob, returning their keys.
async fn seed_garbage(service: &InMemoryService) -> (Vec<u8>, Vec<u8>) {
    let stale_stream = StreamKey::address(Address::repeat_byte(0xab), 0);
    let stale_key = tail_key(&stale_stream);
    service
        .meta_store()
        .put(&stale_key, encode_tail(&bitmap_of(&[7])).expect("encode"), PutCond::Any, FENCE)
        .await
        .expect("seed stale tail");

    let orphan_stream = StreamKey::address(Address::repeat_byte(0xcd), 0);
    let orphan_key = chunk_key(&orphan_stream, 1);
    let orphan_chunk = ChunkBlob::from_bitmap(bitmap_of(&[9])).expect("chunk");
    service
        .blob_store()
        .put(&orphan_key, encode_chunk(&orphan_chunk).expect("encode"))
        .await
        .expect("seed orphan chunk");

    (stale_key, orphan_key)
}

#[tokio::test]
async fn reclaims_orphans_and_stale_tails() {
    let service = svc(test_config(1));
    ingest_chain(&service, 1, 3).await;
    let (stale_key, orphan_key) = seed_garbage(&service).await;

    let before = service
        .query_finalized(LogFilter::default(), QueryOptions::default())
        .await
        .expect("query before gc");
    assert_eq!(before.len(), 6);

    let stats = service.run_gc_once().await.expect("gc");
    assert_eq!(stats.deleted_stale_tails, 1);
    assert_eq!(stats.deleted_orphan_chunks, 1);
    assert!(stats.orphan_chunk_bytes > 0);

    assert!(service.meta_store().get(&stale_key).await.expect("get").is_none());
    assert!(service.blob_store().get(&orphan_key).await.expect("get").is_none());

    // Live data is untouched.
    let after = service
        .query_finalized(LogFilter::default(), QueryOptions::default())
        .await
        .expect("query after gc");
    assert_eq!(before, after);

    // A clean follow-up pass reclaims nothing.
    let stats = service.run_gc_once().await.expect("gc");
    assert_eq!(stats.deleted_stale_tails + stats.deleted_orphan_chunks, 0);
}

#[tokio::test]
async fn next_chunk_seq_is_never_collected() {
    let service = svc(test_config(1));
    ingest_chain(&service, 1, 3).await;

    // The stream for address 1 has a live manifest; a blob at
    // last_chunk_seq + 1 looks like a publish in flight.
    let stream = StreamKey::address(Address::repeat_byte(1), 0);
    let record = service
        .meta_store()
        .get(&manifest_key(&stream))
        .await
        .expect("get")
        .expect("manifest exists");
    let manifest = decode_manifest(&record.value).expect("decode");
    assert!(manifest.last_chunk_seq >= 1, "test needs at least one sealed chunk");

    let in_flight_key = chunk_key(&stream, manifest.last_chunk_seq + 1);
    let in_flight = ChunkBlob::from_bitmap(bitmap_of(&[1_000_000])).expect("chunk");
    service
        .blob_store()
        .put(&in_flight_key, encode_chunk(&in_flight).expect("encode"))
        .await
        .expect("seed in-flight chunk");

    let stats = service.run_gc_once().await.expect("gc");
    assert_eq!(stats.deleted_orphan_chunks, 0);
    assert!(service.blob_store().get(&in_flight_key).await.expect("get").is_some());
}

#[tokio::test]
async fn guardrail_throttles_then_recovers() {
    let mut config = test_config(1);
    config.gc.max_orphan_chunk_bytes = 0;
    config.gc.max_stale_tail_keys = 0;
    config.guardrail.action = GuardrailAction::Throttle;
    config.guardrail.throttle_delay = Duration::from_millis(1);
    let service = svc(config);
    ingest_chain(&service, 1, 2).await;
    seed_garbage(&service).await;

    service.run_gc_once().await.expect("gc");
    assert_eq!(service.health().await.mode, ServiceMode::Throttled);

    // Throttled ingest still makes progress, just slower.
    ingest_chain(&service, 3, 1).await;
    assert_eq!(service.indexed_finalized_head().await.expect("head"), 3);

    // A clean pass lifts the throttle.
    service.run_gc_once().await.expect("gc");
    assert_eq!(service.health().await.mode, ServiceMode::Normal);
}

#[tokio::test]
async fn guardrail_can_fail_closed() {
    let mut config = test_config(1);
    config.gc.max_stale_tail_keys = 0;
    config.guardrail.action = GuardrailAction::FailClosed;
    let service = svc(config);
    ingest_chain(&service, 1, 2).await;
    seed_garbage(&service).await;

    service.run_gc_once().await.expect("gc");
    assert_eq!(service.health().await.mode, ServiceMode::Degraded);

    let block = mk_chain(3, 1, |_| vec![]).remove(0);
    let err = service.ingest_finalized_block(block).await.expect_err("refused");
    assert!(matches!(err, Error::Degraded(_)));
}

#[tokio::test]
async fn prunes_block_hash_mappings_below_floor() {
    let mut config = test_config(1);
    config.gc.prune_block_hash_floor = Some(3);
    let service = svc(config);
    ingest_chain(&service, 1, 4).await;

    let stats = service.run_gc_once().await.expect("gc");
    assert_eq!(stats.pruned_block_hashes, 2);

    // Pruned hashes no longer resolve.
    let err = service
        .query_finalized(
            LogFilter { block_hash: Some(block_hash(1)), ..Default::default() },
            QueryOptions::default(),
        )
        .await
        .expect_err("pruned");
    assert!(matches!(err, Error::BlockNotFound));

    // Hashes at and above the floor still resolve, and numeric ranges are
    // unaffected.
    let logs = service
        .query_finalized(
            LogFilter { block_hash: Some(block_hash(3)), ..Default::default() },
            QueryOptions::default(),
        )
        .await
        .expect("query");
    assert_eq!(logs.len(), 2);
    let logs = service
        .query_finalized(
            LogFilter { from_block: Some(1), to_block: Some(2), ..Default::default() },
            QueryOptions::default(),
        )
        .await
        .expect("query");
    assert_eq!(logs.len(), 4);
}
