//! Fabric mode tests: setup, process, reprocess, status and export over a
//! shared result store.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use tilecheck_flow::model::Assessment;
use tilecheck_flow::outcome::Outcome;
use tilecheck_flow::pipeline::{export, Shard};
use tilecheck_flow::probe::StaticTileBackend;
use tilecheck_test_utils::{
    assert_accounting, assert_no_reads_under, test_config, CatalogFactory, TestContext,
};

const PROCESSED: &str = "collections/processed/";

fn populated(n: usize) -> TestContext {
    let mut ctx = TestContext::new();
    for i in 0..n {
        let (collection, granules, url) = CatalogFactory::cog(&format!("C{i:03}-TEST"));
        ctx.add(collection, granules);
        ctx.dataset(&url, ["Red", "Green", "Blue"]);
    }
    ctx
}

#[tokio::test]
async fn setup_marks_pending_idempotently() {
    let ctx = populated(5);
    let store = ctx.store();
    let pipeline = ctx.pipeline(test_config());

    let first = pipeline.setup(&store).await.unwrap();
    assert_eq!(first.total, 5);
    assert_eq!(first.marked, 5);
    assert_eq!(first.already_pending, 0);

    let second = pipeline.setup(&store).await.unwrap();
    assert_eq!(second.marked, 0);
    assert_eq!(second.already_pending, 5);

    assert_eq!(store.unprocessed().await.unwrap().len(), 5);
    assert_eq!(store.status().await.unwrap().pending, 5);
}

#[tokio::test]
async fn process_drains_pending() {
    let ctx = populated(12);
    let store = ctx.store();
    let pipeline = ctx.pipeline(test_config());
    pipeline.setup(&store).await.unwrap();

    let summary = pipeline.process(&store, Shard::ALL).await.unwrap();
    assert_eq!(summary.total, 12);
    assert_eq!(summary.processed, 12);
    assert_eq!(summary.successes(), 12);
    assert_accounting(&summary);
    // one credential fetch per batch of ten
    assert_eq!(ctx.credentials.acquisitions(), 2);
    assert_eq!(ctx.credentials.s3_requests().len(), 2);

    assert!(store.unprocessed().await.unwrap().is_empty());
    assert!(ctx.storage.paths_under("collections/unprocessed/").is_empty());
    let status = store.status().await.unwrap();
    assert_eq!(status.pending, 0);
    assert_eq!(status.processed, 12);
    assert_eq!(status.successful, 12);

    let again = pipeline.process(&store, Shard::ALL).await.unwrap();
    assert_eq!(again.processed, 0);
}

#[tokio::test]
async fn pending_collection_missing_from_catalog() {
    let ctx = populated(1);
    let store = ctx.store();
    store.mark_pending("C-GONE").await.unwrap();

    ctx.pipeline(test_config())
        .process(&store, Shard::ALL)
        .await
        .unwrap();

    let result = store.get_result("C-GONE").await.unwrap().unwrap();
    assert_eq!(result.outcome, Some(Outcome::FailedToExtract));
    assert_eq!(result.detail.as_deref(), Some("collection not found in catalog"));
}

#[tokio::test]
async fn reprocess_replaces_previous_result() {
    let mut ctx = populated(3);
    ctx.tiles = StaticTileBackend::new().failing_for("C001-TEST");
    let store = ctx.store();

    let pipeline = ctx.pipeline(test_config());
    pipeline.setup(&store).await.unwrap();
    pipeline.process(&store, Shard::ALL).await.unwrap();
    assert_eq!(
        store
            .list_by_outcome(Some(false), Some("tile_generation_failed"))
            .await
            .unwrap(),
        vec!["C001-TEST"]
    );

    ctx.tiles = StaticTileBackend::new();
    let summary = ctx
        .pipeline(test_config())
        .reprocess(&store, "tile_generation_failed", Shard::ALL)
        .await
        .unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.successes(), 1);

    assert_eq!(ctx.storage.paths_under(&format!("{PROCESSED}C001-TEST/")).len(), 1);
    let result = store.get_result("C001-TEST").await.unwrap().unwrap();
    assert!(result.is_success());
    assert_eq!(store.status().await.unwrap().successful, 3);
}

#[tokio::test]
async fn reprocess_selects_by_reason() {
    let ctx = populated(2);
    let store = ctx.store();
    ctx.add(CatalogFactory::collection("C-EMPTY", Some("COG")), vec![]);

    let pipeline = ctx.pipeline(test_config());
    pipeline.setup(&store).await.unwrap();
    pipeline.process(&store, Shard::ALL).await.unwrap();

    let failed = pipeline
        .reprocess(&store, "no_granule_found", Shard::ALL)
        .await
        .unwrap();
    assert_eq!(failed.total, 1);

    let succeeded = pipeline.reprocess(&store, "success", Shard::ALL).await.unwrap();
    assert_eq!(succeeded.total, 2);

    let unprobed = pipeline.reprocess(&store, "none", Shard::ALL).await.unwrap();
    assert_eq!(unprobed.total, 0);

    assert!(pipeline.reprocess(&store, "bogus", Shard::ALL).await.is_err());
}

#[tokio::test]
async fn shards_cover_pending_disjointly() {
    let ctx = populated(20);
    let store = ctx.store();
    let pipeline = ctx.pipeline(test_config());
    pipeline.setup(&store).await.unwrap();

    let mut processed = 0;
    for index in 0..3 {
        let shard = Shard::new(index, 3).unwrap();
        processed += pipeline.process(&store, shard).await.unwrap().processed;
    }

    assert_eq!(processed, 20);
    assert_eq!(store.status().await.unwrap().processed, 20);
    assert!(store.unprocessed().await.unwrap().is_empty());
}

#[tokio::test]
async fn persist_failures_are_counted() {
    let ctx = populated(4);
    let store = ctx.store();
    let pipeline = ctx.pipeline(test_config());
    pipeline.setup(&store).await.unwrap();

    ctx.storage.inject_write_failure(PROCESSED);
    let summary = pipeline.process(&store, Shard::ALL).await.unwrap();

    assert_eq!(summary.processed, 4);
    assert_eq!(summary.persist_failures, 4);
    assert_eq!(store.unprocessed().await.unwrap().len(), 4);
}

#[tokio::test]
async fn outcome_filters_read_no_bodies() {
    let ctx = populated(3);
    ctx.add(CatalogFactory::collection("C-EMPTY", Some("COG")), vec![]);
    let store = ctx.store();
    let pipeline = ctx.pipeline(test_config());
    pipeline.setup(&store).await.unwrap();
    pipeline.process(&store, Shard::ALL).await.unwrap();

    ctx.storage.clear_operations();
    let ids = store
        .list_by_outcome(Some(false), Some("no_granule_found"))
        .await
        .unwrap();
    assert_eq!(ids, vec!["C-EMPTY"]);

    let status = store.status().await.unwrap();
    assert_eq!(status.by_reason.get("no_granule_found"), Some(&1));
    assert_no_reads_under(&ctx.storage.operations(), PROCESSED);
}

#[tokio::test]
async fn export_is_sorted_by_concept_id() {
    let ctx = TestContext::new();
    let store = ctx.store();
    for id in ["C3-TEST", "C1-TEST", "C2-TEST"] {
        store
            .put_result(&Assessment::failed(id, Outcome::CantOpenFile, "403"))
            .await
            .unwrap();
    }

    let mut rows = Vec::new();
    let count = export(&store, &mut rows).await.unwrap();

    assert_eq!(count, 3);
    let ids: Vec<_> = rows.iter().map(|a| a.collection_concept_id.as_str()).collect();
    assert_eq!(ids, vec!["C1-TEST", "C2-TEST", "C3-TEST"]);
}

fn timed_out(id: &str) -> Assessment {
    Assessment::failed(id, Outcome::Timeout, "unit deadline exceeded")
}

fn tiled(id: &str) -> Assessment {
    Assessment::new(id).with_outcome(Outcome::Success, None)
}

/// A superseded result that cannot be deleted blocks the new write.
#[tokio::test]
async fn failed_delete_of_previous_result_blocks_rewrite() {
    let ctx = TestContext::new();
    let store = ctx.store();
    let old_key = store.put_result(&timed_out("C1-TEST")).await.unwrap();

    ctx.storage.inject_failure(old_key.clone());
    assert!(store.put_result(&tiled("C1-TEST")).await.is_err());

    assert_eq!(ctx.storage.paths_under(PROCESSED), vec![old_key]);
    assert!(store.list_by_outcome(Some(true), None).await.unwrap().is_empty());
    assert_eq!(store.status().await.unwrap().processed, 1);

    ctx.storage.clear_failures();
    let key = store.put_result(&tiled("C1-TEST")).await.unwrap();
    assert_eq!(ctx.storage.paths_under(PROCESSED), vec![key]);
    assert!(store.list_by_outcome(None, Some("timeout")).await.unwrap().is_empty());
}

/// A failed pointer write leaves no result behind that a later write cannot find.
#[tokio::test]
async fn failed_pointer_write_leaves_no_orphan() {
    let ctx = TestContext::new();
    let store = ctx.store();
    store.put_result(&timed_out("C1-TEST")).await.unwrap();

    ctx.storage.inject_write_failure("collections/pointers/");
    assert!(store.put_result(&tiled("C1-TEST")).await.is_err());
    assert!(ctx.storage.paths_under(PROCESSED).len() <= 1);

    ctx.storage.clear_failures();
    let key = store.put_result(&tiled("C1-TEST")).await.unwrap();
    assert_eq!(ctx.storage.paths_under(PROCESSED), vec![key]);
    let status = store.status().await.unwrap();
    assert_eq!(status.processed, 1);
    assert_eq!(status.by_reason.values().sum::<usize>(), 1);
}

/// A failed body write is cleaned up by the next write under another outcome.
#[tokio::test]
async fn failed_body_write_is_superseded() {
    let ctx = TestContext::new();
    let store = ctx.store();

    ctx.storage.inject_write_failure(PROCESSED);
    assert!(store.put_result(&timed_out("C1-TEST")).await.is_err());
    ctx.storage.clear_failures();

    let key = store.put_result(&tiled("C1-TEST")).await.unwrap();
    assert_eq!(ctx.storage.paths_under(PROCESSED), vec![key]);
    assert_eq!(store.get_result("C1-TEST").await.unwrap(), Some(tiled("C1-TEST")));
}

/// An unreadable pointer fails the write instead of skipping the cleanup.
#[tokio::test]
async fn pointer_read_failure_fails_the_write() {
    let ctx = TestContext::new();
    let store = ctx.store();
    let old_key = store.put_result(&timed_out("C1-TEST")).await.unwrap();

    ctx.storage.inject_failure("collections/pointers/");
    assert!(store.put_result(&tiled("C1-TEST")).await.is_err());
    assert_eq!(ctx.storage.paths_under(PROCESSED), vec![old_key]);
}
