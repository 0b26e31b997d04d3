//! Ingest pipeline behavior: ordering, replays, finality and maintenance.

use crate::utils::{block_hash, mk_block, mk_chain, mk_log, svc, test_config};
use alloy_primitives::B256;
use log_index::{
    filter::{Clause, LogFilter, QueryOptions},
    types::{IngestOutcome, RejectReason},
    Error, FinalizedLogIndex, ServiceMode,
};

#[tokio::test]
async fn single_block_single_log() {
    let service = svc(test_config(0));
    let block = mk_block(0, B256::ZERO, vec![mk_log(0xa1, 0x10, 0x20, 0, 0, 0)]);

    let outcome = service.ingest_finalized_block(block.clone()).await.expect("ingest");
    assert_eq!(
        outcome,
        IngestOutcome::Applied { indexed_finalized_head: 0, written_logs: 1 }
    );
    assert_eq!(service.indexed_finalized_head().await.expect("head"), 0);

    let logs = service
        .query_finalized(
            LogFilter {
                from_block: Some(0),
                to_block: Some(0),
                address: Some(Clause::One(block.logs[0].address)),
                topic1: Some(Clause::One(block.logs[0].topics[1])),
                ..Default::default()
            },
            QueryOptions::default(),
        )
        .await
        .expect("query");
    assert_eq!(logs, block.logs);
}

#[tokio::test]
async fn head_and_log_ids_advance_monotonically() {
    let service = svc(test_config(1));
    let blocks = mk_chain(1, 4, |block_num| {
        (0..3).map(|i| mk_log(1, 2, 3, block_num, 0, i)).collect()
    });

    for (i, block) in blocks.iter().enumerate() {
        let outcome = service.ingest_finalized_block(block.clone()).await.expect("ingest");
        assert_eq!(
            outcome,
            IngestOutcome::Applied {
                indexed_finalized_head: block.block_num,
                written_logs: 3
            },
            "block {i}"
        );
        assert_eq!(
            service.indexed_finalized_head().await.expect("head"),
            block.block_num
        );
    }
}

#[tokio::test]
async fn replay_returns_already_ingested_without_state_change() {
    let service = svc(test_config(1));
    let blocks = mk_chain(1, 3, |block_num| vec![mk_log(7, 8, 9, block_num, 0, 0)]);
    for block in &blocks {
        service.ingest_finalized_block(block.clone()).await.expect("ingest");
    }

    // Replays at the head and below it.
    for block in &blocks {
        let outcome = service.ingest_finalized_block(block.clone()).await.expect("replay");
        assert_eq!(outcome, IngestOutcome::AlreadyIngested);
    }
    assert_eq!(service.indexed_finalized_head().await.expect("head"), 3);

    let all = service
        .query_finalized(LogFilter::default(), QueryOptions::default())
        .await
        .expect("query");
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn out_of_order_and_bad_parent_are_rejected() {
    let service = svc(test_config(1));
    let blocks = mk_chain(1, 3, |block_num| vec![mk_log(1, 1, 1, block_num, 0, 0)]);
    service.ingest_finalized_block(blocks[0].clone()).await.expect("ingest b1");

    // Skipping ahead.
    let outcome = service.ingest_finalized_block(blocks[2].clone()).await.expect("skip");
    assert_eq!(
        outcome,
        IngestOutcome::Rejected(RejectReason::NotNext { expected: 2, got: 3 })
    );

    // Right height, wrong parent.
    let mut bad_parent = blocks[1].clone();
    bad_parent.parent_hash = B256::repeat_byte(0xee);
    let outcome = service.ingest_finalized_block(bad_parent).await.expect("bad parent");
    assert!(matches!(
        outcome,
        IngestOutcome::Rejected(RejectReason::ParentMismatch { .. })
    ));

    // Rejections leave the pipeline intact.
    service.ingest_finalized_block(blocks[1].clone()).await.expect("ingest b2");
    assert_eq!(service.indexed_finalized_head().await.expect("head"), 2);
}

#[tokio::test]
async fn finality_violation_latches_degraded() {
    let service = svc(test_config(1));
    let blocks = mk_chain(1, 2, |block_num| vec![mk_log(5, 6, 7, block_num, 0, 0)]);
    for block in &blocks {
        service.ingest_finalized_block(block.clone()).await.expect("ingest");
    }

    // A contradictory hash at an already-finalized height.
    let mut conflicting = blocks[0].clone();
    conflicting.block_hash = B256::repeat_byte(0xdd);
    for log in &mut conflicting.logs {
        log.block_hash = conflicting.block_hash;
    }
    let outcome = service.ingest_finalized_block(conflicting).await.expect("violation");
    assert_eq!(outcome, IngestOutcome::FinalityViolation);

    let health = service.health().await;
    assert_eq!(health.mode, ServiceMode::Degraded);
    assert!(health.reason.is_some());

    // All subsequent ingests are refused.
    let next = mk_block(3, block_hash(2), vec![]);
    let err = service.ingest_finalized_block(next).await.expect_err("degraded");
    assert!(matches!(err, Error::Degraded(_)));

    // The default read policy keeps serving the last consistent snapshot.
    let logs = service
        .query_finalized(LogFilter::default(), QueryOptions::default())
        .await
        .expect("query in degraded mode");
    assert_eq!(logs.len(), 2);
}

#[tokio::test]
async fn degraded_reads_can_be_refused_by_policy() {
    let mut config = test_config(1);
    config.query.serve_when_degraded = false;
    let service = svc(config);

    let block = mk_block(1, block_hash(0), vec![mk_log(1, 2, 3, 1, 0, 0)]);
    service.ingest_finalized_block(block.clone()).await.expect("ingest");

    let mut conflicting = block;
    conflicting.block_hash = B256::repeat_byte(0xcc);
    for log in &mut conflicting.logs {
        log.block_hash = conflicting.block_hash;
    }
    service.ingest_finalized_block(conflicting).await.expect("violation");

    let err = service
        .query_finalized(LogFilter::default(), QueryOptions::default())
        .await
        .expect_err("refused");
    assert!(matches!(err, Error::Degraded(_)));
}

#[tokio::test]
async fn empty_blocks_are_ingestible_and_queryable() {
    let service = svc(test_config(0));
    let blocks = mk_chain(0, 5, |block_num| {
        if block_num == 2 {
            vec![mk_log(3, 4, 5, 2, 0, 0)]
        } else {
            vec![]
        }
    });
    for block in &blocks {
        service.ingest_finalized_block(block.clone()).await.expect("ingest");
    }

    let logs = service
        .query_finalized(LogFilter::default(), QueryOptions::default())
        .await
        .expect("query");
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].block_num, 2);
}

#[tokio::test]
async fn maintenance_seals_aged_tails() {
    let mut config = test_config(1);
    // Entry/byte triggers never fire; only the age trigger can seal.
    config.chunk.target_entries = u64::MAX;
    config.chunk.target_bytes = usize::MAX;
    config.chunk.maintenance_seal_interval = std::time::Duration::from_secs(60);
    let service = svc(config);

    let block = mk_block(1, block_hash(0), vec![mk_log(9, 9, 9, 1, 0, 0)]);
    service.ingest_finalized_block(block).await.expect("ingest");

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_secs();

    // Too soon: nothing seals.
    let stats = service.run_periodic_maintenance(now).await.expect("maintenance");
    assert_eq!(stats.sealed_streams, 0);

    // Past the interval every touched stream seals, and the emptied tails
    // are flushed.
    let stats = service.run_periodic_maintenance(now + 120).await.expect("maintenance");
    assert!(stats.sealed_streams >= 1);
    assert!(stats.flushed_streams >= stats.sealed_streams);

    // Sealed data stays queryable.
    let logs = service
        .query_finalized(LogFilter::default(), QueryOptions::default())
        .await
        .expect("query");
    assert_eq!(logs.len(), 1);
}
