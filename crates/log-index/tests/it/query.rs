//! Query semantics: exactness, ordering, limits, guardrails and the
//! blockHash path.

use crate::utils::{block_hash, mk_chain, mk_log, naive_query, svc, test_config};
use alloy_primitives::{Address, B256};
use log_index::{
    config::BroadQueryAction,
    filter::{Clause, LogFilter, QueryOptions},
    Error, FinalizedLogIndex,
};
use std::time::{Duration, Instant};

async fn ingest_all(service: &crate::utils::InMemoryService, blocks: &[log_index::Block]) {
    for block in blocks {
        service.ingest_finalized_block(block.clone()).await.expect("ingest");
    }
}

/// Blocks 0..=9, three logs each at addresses 0xa0/0xa1/0xa2.
fn three_address_chain() -> Vec<log_index::Block> {
    mk_chain(0, 10, |block_num| {
        (0..3u32)
            .map(|i| mk_log(0xa0 + i as u8, 0x10 + i as u8, 0x20 + i as u8, block_num, i, 0))
            .collect()
    })
}

#[tokio::test]
async fn or_across_addresses_in_order() {
    let service = svc(test_config(0));
    let blocks = three_address_chain();
    ingest_all(&service, &blocks).await;

    let filter = LogFilter {
        from_block: Some(0),
        to_block: Some(9),
        address: Some(Clause::Or(vec![
            Address::repeat_byte(0xa0),
            Address::repeat_byte(0xa1),
        ])),
        ..Default::default()
    };
    let logs = service
        .query_finalized(filter.clone(), QueryOptions::default())
        .await
        .expect("query");

    assert_eq!(logs.len(), 20);
    let keys: Vec<_> = logs.iter().map(|log| log.sort_key()).collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted, "results must be in (block, tx, log) order");
    assert_eq!(logs, naive_query(&blocks, &filter, None));
}

#[tokio::test]
async fn block_hash_mode_is_exclusive() {
    let service = svc(test_config(0));
    let blocks = three_address_chain();
    ingest_all(&service, &blocks).await;

    // blockHash combined with a range is invalid.
    let err = service
        .query_finalized(
            LogFilter {
                from_block: Some(5),
                block_hash: Some(block_hash(5)),
                ..Default::default()
            },
            QueryOptions::default(),
        )
        .await
        .expect_err("invalid");
    assert!(matches!(err, Error::InvalidParams(_)));

    // A hash outside the index is not found.
    let err = service
        .query_finalized(
            LogFilter { block_hash: Some(B256::repeat_byte(0xff)), ..Default::default() },
            QueryOptions::default(),
        )
        .await
        .expect_err("unknown hash");
    assert!(matches!(err, Error::BlockNotFound));

    // A valid hash restricts the range to that block.
    let logs = service
        .query_finalized(
            LogFilter { block_hash: Some(block_hash(5)), ..Default::default() },
            QueryOptions::default(),
        )
        .await
        .expect("query");
    assert_eq!(logs.len(), 3);
    assert!(logs.iter().all(|log| log.block_num == 5));
}

#[tokio::test]
async fn max_results_keeps_smallest_sort_keys() {
    let service = svc(test_config(0));
    let blocks = three_address_chain();
    ingest_all(&service, &blocks).await;

    let filter = LogFilter {
        address: Some(Clause::One(Address::repeat_byte(0xa1))),
        ..Default::default()
    };
    let all = service
        .query_finalized(filter.clone(), QueryOptions::default())
        .await
        .expect("query");
    assert_eq!(all.len(), 10);

    let limited = service
        .query_finalized(
            filter,
            QueryOptions { max_results: Some(4), ..Default::default() },
        )
        .await
        .expect("query");
    assert_eq!(limited.as_slice(), &all[..4]);
}

#[tokio::test]
async fn wildcard_query_scans_blocks() {
    let service = svc(test_config(0));
    let blocks = three_address_chain();
    ingest_all(&service, &blocks).await;

    let logs = service
        .query_finalized(LogFilter::default(), QueryOptions::default())
        .await
        .expect("query");
    assert_eq!(logs.len(), 30);
    assert_eq!(service.counters().query_block_scans.load(std::sync::atomic::Ordering::Relaxed), 1);
}

#[tokio::test]
async fn topic_positions_are_distinct() {
    let service = svc(test_config(0));
    let blocks = three_address_chain();
    ingest_all(&service, &blocks).await;

    // 0x10 appears only as topics[0]; matching it at position 1 is empty.
    let logs = service
        .query_finalized(
            LogFilter {
                topic1: Some(Clause::One(B256::repeat_byte(0x10))),
                ..Default::default()
            },
            QueryOptions::default(),
        )
        .await
        .expect("query");
    assert!(logs.is_empty());
}

#[tokio::test]
async fn unknown_values_and_empty_ranges() {
    let service = svc(test_config(0));
    ingest_all(&service, &three_address_chain()).await;

    let logs = service
        .query_finalized(
            LogFilter {
                address: Some(Clause::One(Address::repeat_byte(0x77))),
                ..Default::default()
            },
            QueryOptions::default(),
        )
        .await
        .expect("query");
    assert!(logs.is_empty());

    // from > to is empty, not an error.
    let logs = service
        .query_finalized(
            LogFilter { from_block: Some(7), to_block: Some(3), ..Default::default() },
            QueryOptions::default(),
        )
        .await
        .expect("query");
    assert!(logs.is_empty());

    // Ranges beyond the head are clipped to it.
    let logs = service
        .query_finalized(
            LogFilter { from_block: Some(8), to_block: Some(1_000), ..Default::default() },
            QueryOptions::default(),
        )
        .await
        .expect("query");
    assert_eq!(logs.len(), 6);
}

#[tokio::test]
async fn guardrail_rejects_or_falls_back() {
    let addresses: Vec<Address> = (0..9u8).map(|i| Address::repeat_byte(0xa0 + i)).collect();
    let filter = LogFilter {
        from_block: Some(0),
        to_block: Some(9),
        address: Some(Clause::Or(addresses)),
        ..Default::default()
    };

    let mut config = test_config(0);
    config.planner.max_or_terms = 8;
    let service = svc(config);
    let blocks = three_address_chain();
    ingest_all(&service, &blocks).await;

    let err = service
        .query_finalized(filter.clone(), QueryOptions::default())
        .await
        .expect_err("too broad");
    assert!(matches!(err, Error::QueryTooBroad { actual: 9, max: 8 }));

    // Same query under the BlockScan policy returns the exact result.
    let mut config = test_config(0);
    config.planner.max_or_terms = 8;
    config.planner.broad_query_action = BroadQueryAction::BlockScan;
    let service = svc(config);
    ingest_all(&service, &blocks).await;

    let logs = service
        .query_finalized(filter.clone(), QueryOptions::default())
        .await
        .expect("fallback");
    assert_eq!(logs, naive_query(&blocks, &filter, None));
    assert_eq!(logs.len(), 30);
}

#[tokio::test]
async fn expired_deadline_fails_closed() {
    let service = svc(test_config(0));
    ingest_all(&service, &three_address_chain()).await;

    let err = service
        .query_finalized(
            LogFilter::default(),
            QueryOptions {
                deadline: Some(Instant::now() - Duration::from_millis(1)),
                ..Default::default()
            },
        )
        .await
        .expect_err("deadline");
    assert!(matches!(err, Error::DeadlineExceeded));
}

#[tokio::test]
async fn differential_against_naive_oracle() {
    // Small chunk target so results span sealed chunks and live tails.
    let service = svc(test_config(0));
    let blocks = mk_chain(0, 12, |block_num| {
        let mut logs = Vec::new();
        for i in 0..(block_num % 4) as u32 {
            logs.push(mk_log(
                0xa0 + (block_num % 3) as u8,
                0x10 + (i % 2) as u8,
                0x20 + ((block_num + i as u64) % 5) as u8,
                block_num,
                i,
                0,
            ));
        }
        logs
    });
    ingest_all(&service, &blocks).await;

    let filters = vec![
        LogFilter {
            from_block: Some(0),
            to_block: Some(11),
            address: Some(Clause::Or(vec![
                Address::repeat_byte(0xa0),
                Address::repeat_byte(0xa1),
            ])),
            topic0: Some(Clause::One(B256::repeat_byte(0x10))),
            ..Default::default()
        },
        LogFilter {
            from_block: Some(3),
            to_block: Some(9),
            topic0: Some(Clause::Or(vec![
                B256::repeat_byte(0x10),
                B256::repeat_byte(0x11),
            ])),
            topic1: Some(Clause::Any),
            ..Default::default()
        },
        LogFilter {
            topic1: Some(Clause::Or(vec![
                B256::repeat_byte(0x21),
                B256::repeat_byte(0x23),
            ])),
            ..Default::default()
        },
        LogFilter { from_block: Some(2), to_block: Some(2), ..Default::default() },
    ];

    for filter in filters {
        for max_results in [None, Some(1), Some(3)] {
            let got = service
                .query_finalized(
                    filter.clone(),
                    QueryOptions { max_results, ..Default::default() },
                )
                .await
                .expect("query");
            let want = naive_query(&blocks, &filter, max_results);
            assert_eq!(got, want, "filter {filter:?} max {max_results:?}");
        }
    }
}
