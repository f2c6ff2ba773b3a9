mod common;

use std::{path::PathBuf, time::Duration};

use blockvault_core::{
    retrieval::RetrievalOptions, store::ClaimResult, BlockError, BlockKey, BlockRecord,
    BlockState,
};
use common::{
    block_json, collect, container, container_with_payloads, eventually, gzip, Harness,
};

fn seven_zz() -> BlockKey {
    BlockKey::new(7, "zz")
}

async fn harness_with_block_seven() -> Harness {
    let harness = Harness::new(RetrievalOptions::default());
    let payload = block_json(7);
    harness
        .put(
            "packed/container-0",
            container(2, &[(6, "yy", &block_json(6)), (7, "zz", &payload)]),
        )
        .await;
    harness.refresher.refresh_once().await.unwrap();
    harness
}

#[tokio::test]
async fn unknown_block_is_not_found() {
    let harness = Harness::new(RetrievalOptions::default());

    match harness.pipeline.fetch_block(7, "zz").await {
        Err(BlockError::NotFound(key)) => assert_eq!(key, seven_zz()),
        Err(other) => panic!("expected NotFound, got {:?}", other),
        Ok(_) => panic!("expected NotFound, got a stream"),
    }
    assert_eq!(harness.source.stream_fetches(), 0);
}

#[tokio::test(start_paused = true)]
async fn waiting_on_a_stuck_claim_times_out() {
    let harness = Harness::new(RetrievalOptions::default());
    harness
        .store
        .set(seven_zz(), BlockRecord::located("packed/container-0", 10, 50));
    assert!(matches!(
        harness.store.try_claim(&seven_zz()),
        ClaimResult::Claimed(_)
    ));

    let started = tokio::time::Instant::now();
    let result = harness.pipeline.fetch_block(7, "zz").await;

    assert!(matches!(result, Err(BlockError::Timeout(_))));
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(harness.store.get(&seven_zz()).unwrap().is_downloading());
}

#[tokio::test]
async fn extracted_block_is_served_from_disk_afterwards() {
    let harness = harness_with_block_seven().await;

    let first = collect(harness.pipeline.fetch_block(7, "zz").await.unwrap()).await;
    assert_eq!(first, block_json(7));
    assert_eq!(harness.source.stream_fetches(), 1);

    let path = harness.files.path_for(7);
    let materialized = eventually(|| {
        harness.store.get(&seven_zz()).unwrap().local_file_path() == Some(path.as_path())
    });
    assert!(materialized.await);
    assert_eq!(tokio::fs::read(&path).await.unwrap(), block_json(7));
    assert!(harness.files.partials().await.unwrap().is_empty());

    let second = collect(harness.pipeline.fetch_block(7, "zz").await.unwrap()).await;
    assert_eq!(second, block_json(7));
    assert_eq!(harness.source.stream_fetches(), 1);

    // The next catalog cycle sees the file too.
    let summary = harness.refresher.refresh_once().await.unwrap();
    assert_eq!(summary.materialized, 1);
    assert!(matches!(
        harness.store.try_claim(&seven_zz()),
        ClaimResult::Ready(_)
    ));
}

#[tokio::test]
async fn failed_extraction_releases_claim_for_retry() {
    let harness = harness_with_block_seven().await;
    harness.source.fail_next_streams(1);

    let failed = harness.pipeline.fetch_block(7, "zz").await;
    assert!(matches!(failed, Err(BlockError::Upstream(_))));
    assert_eq!(
        harness.store.get(&seven_zz()).unwrap().state,
        BlockState::Located
    );

    let retried = collect(harness.pipeline.fetch_block(7, "zz").await.unwrap()).await;
    assert_eq!(retried, block_json(7));
    assert_eq!(harness.source.stream_fetches(), 2);
}

#[tokio::test]
async fn undecodable_range_is_corrupt_and_released() {
    let harness = Harness::new(RetrievalOptions::default());
    harness
        .put(
            "packed/container-0",
            container_with_payloads(2, &[(7, "zz", b"this is not gzip at all".to_vec())]),
        )
        .await;
    harness.refresher.refresh_once().await.unwrap();

    let result = harness.pipeline.fetch_block(7, "zz").await;
    assert!(matches!(result, Err(BlockError::Corrupt { .. })));

    let released =
        eventually(|| harness.store.get(&seven_zz()).unwrap().state == BlockState::Located);
    assert!(released.await);
    assert!(harness.files.partials().await.unwrap().is_empty());
    assert!(!harness.files.path_for(7).exists());
}

#[tokio::test]
async fn truncated_range_fails_mid_stream() {
    let harness = Harness::new(RetrievalOptions::default());
    let mut compressed = gzip(&block_json(7));
    compressed.truncate(compressed.len() - 6);
    harness
        .put(
            "packed/container-0",
            container_with_payloads(2, &[(7, "zz", compressed)]),
        )
        .await;
    harness.refresher.refresh_once().await.unwrap();

    let stream = harness.pipeline.fetch_block(7, "zz").await.unwrap();
    let chunks: Vec<_> = futures::StreamExt::collect(stream).await;
    assert!(chunks.last().unwrap().is_err());

    let released =
        eventually(|| harness.store.get(&seven_zz()).unwrap().state == BlockState::Located);
    assert!(released.await);
    assert!(!harness.files.path_for(7).exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_extract_once() {
    let harness = harness_with_block_seven().await;

    let requests: Vec<_> = (0..8)
        .map(|_| {
            let pipeline = harness.pipeline.clone();
            tokio::spawn(async move {
                let stream = pipeline.fetch_block(7, "zz").await.unwrap();
                collect(stream).await
            })
        })
        .collect();

    for request in requests {
        assert_eq!(request.await.unwrap(), block_json(7));
    }
    assert_eq!(harness.source.stream_fetches(), 1);
}

#[tokio::test]
async fn waiter_is_woken_when_extraction_completes() {
    let harness = harness_with_block_seven().await;
    let record = match harness.store.try_claim(&seven_zz()) {
        ClaimResult::Claimed(record) => record,
        other => panic!("expected to claim, got {:?}", other),
    };

    let pipeline = harness.pipeline.clone();
    let waiter =
        tokio::spawn(async move { collect(pipeline.fetch_block(7, "zz").await.unwrap()).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    let path: PathBuf = harness.files.path_for(7);
    tokio::fs::write(&path, b"{\"number\":7}").await.unwrap();
    harness.store.complete(&seven_zz(), path, record);

    assert_eq!(waiter.await.unwrap(), b"{\"number\":7}");
    assert_eq!(harness.source.stream_fetches(), 0);
}

#[tokio::test]
async fn vanished_file_is_extracted_again() {
    let harness = harness_with_block_seven().await;
    collect(harness.pipeline.fetch_block(7, "zz").await.unwrap()).await;
    assert!(eventually(|| harness.files.path_for(7).exists()).await);

    tokio::fs::remove_file(harness.files.path_for(7)).await.unwrap();

    let again = collect(harness.pipeline.fetch_block(7, "zz").await.unwrap()).await;
    assert_eq!(again, block_json(7));
    assert_eq!(harness.source.stream_fetches(), 2);
}

#[tokio::test]
async fn dropped_caller_still_materializes() {
    let harness = harness_with_block_seven().await;

    drop(harness.pipeline.fetch_block(7, "zz").await.unwrap());

    let path = harness.files.path_for(7);
    let materialized = eventually(|| {
        harness.store.get(&seven_zz()).unwrap().local_file_path() == Some(path.as_path())
    });
    assert!(materialized.await);
    assert_eq!(tokio::fs::read(&path).await.unwrap(), block_json(7));
}

#[tokio::test]
async fn hash_variants_share_the_numbered_file() {
    let harness = Harness::new(RetrievalOptions::default());
    harness
        .put(
            "packed/container-0",
            container(2, &[(7, "zz", &block_json(7)), (7, "aa", &block_json(7))]),
        )
        .await;
    harness.refresher.refresh_once().await.unwrap();

    collect(harness.pipeline.fetch_block(7, "zz").await.unwrap()).await;
    assert!(eventually(|| harness.files.path_for(7).exists()).await);

    // The other hash is still only located until the next catalog cycle.
    assert_eq!(
        harness.store.get(&BlockKey::new(7, "aa")).unwrap().state,
        BlockState::Located
    );
    harness.refresher.refresh_once().await.unwrap();
    assert!(matches!(
        harness.store.try_claim(&BlockKey::new(7, "aa")),
        ClaimResult::Ready(_)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_hash_variants_never_mix_their_files() {
    let zz = block_json(7);
    let aa: Vec<u8> = block_json(7)
        .iter()
        .map(|b| if *b == b'0' { b'9' } else { *b })
        .collect();
    assert_ne!(zz, aa);

    for _ in 0..5 {
        let harness = Harness::new(RetrievalOptions::default());
        harness
            .put(
                "packed/container-0",
                container(2, &[(7, "zz", &zz), (7, "aa", &aa)]),
            )
            .await;
        harness.refresher.refresh_once().await.unwrap();

        let fetch = |hash: &'static str| {
            let pipeline = harness.pipeline.clone();
            tokio::spawn(async move { collect(pipeline.fetch_block(7, hash).await.unwrap()).await })
        };
        let (got_zz, got_aa) = (fetch("zz"), fetch("aa"));
        assert_eq!(got_zz.await.unwrap(), zz);
        assert_eq!(got_aa.await.unwrap(), aa);

        let settled = eventually(|| {
            [BlockKey::new(7, "zz"), BlockKey::new(7, "aa")]
                .iter()
                .all(|key| !harness.store.get(key).unwrap().is_downloading())
        });
        assert!(settled.await);

        let cached = tokio::fs::read(harness.files.path_for(7)).await.unwrap();
        assert!(cached == zz || cached == aa);
        assert!(harness.files.partials().await.unwrap().is_empty());
        for hash in ["zz", "aa"] {
            let record = harness.store.get(&BlockKey::new(7, hash)).unwrap();
            assert!(matches!(record.state, BlockState::Materialized(_)));
        }
    }
}

#[tokio::test]
async fn unwritable_cache_directory_is_a_local_error() {
    let harness = harness_with_block_seven().await;
    tokio::fs::remove_dir_all(harness.files.dir()).await.unwrap();

    match harness.pipeline.fetch_block(7, "zz").await {
        Err(BlockError::LocalIo { .. }) => {}
        Err(other) => panic!("expected LocalIo, got {:?}", other),
        Ok(_) => panic!("expected LocalIo, got a stream"),
    }
    assert_eq!(
        harness.store.get(&seven_zz()).unwrap().state,
        BlockState::Located
    );

    harness.files.ensure_dir().await.unwrap();
    let retried = collect(harness.pipeline.fetch_block(7, "zz").await.unwrap()).await;
    assert_eq!(retried, block_json(7));
}
