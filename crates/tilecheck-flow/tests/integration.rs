//! Integration tests for the pool run and single-target modes.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::time::Duration;

use bytes::Bytes;
use tilecheck_flow::config::RunConfig;
use tilecheck_flow::export::{read_report, ReportWriter};
use tilecheck_flow::model::{Backend, Link, LinkKind};
use tilecheck_flow::outcome::Outcome;
use tilecheck_flow::probe::StaticTileBackend;
use tilecheck_flow::error::Error;
use tilecheck_test_utils::{
    assert_accounting, assert_outcome, assert_unprobed_never_tiled, init_test_logging, test_config,
    CatalogFactory, TestContext, TEST_PROVIDER,
};

fn populated(n: usize) -> TestContext {
    let mut ctx = TestContext::new();
    for i in 0..n {
        let (collection, granules, url) = CatalogFactory::cog(&format!("C{i:03}-TEST"));
        ctx.add(collection, granules);
        ctx.dataset(&url, ["Red", "Green", "Blue"]);
    }
    ctx
}

/// A COG collection with RGB bands tiles from its red band without a datetime.
#[tokio::test]
async fn cog_collection_tiles_successfully() {
    init_test_logging();
    let mut ctx = TestContext::new();
    let (collection, granules, url) = CatalogFactory::cog("C1-TEST");
    ctx.add(collection, granules);
    ctx.dataset(&url, ["Red", "Green", "Blue"]);

    let mut rows = Vec::new();
    let summary = ctx.pipeline(test_config()).run(None, &mut rows).await.unwrap();

    assert_eq!(summary.total, 1);
    assert_eq!(summary.successes(), 1);
    assert_outcome(&rows, "C1-TEST", Some(Outcome::Success));

    let a = &rows[0];
    assert_eq!(a.backend, Some(Backend::Raster));
    assert_eq!(a.data_variables, vec!["Red", "Green", "Blue"]);
    let request = a.tile_request.as_ref().unwrap();
    assert_eq!(request.field, "Red");
    assert_eq!(request.datetime, None);
    assert_eq!((request.x, request.y, request.z), (0, 0, 0));
    assert!(a
        .tiles_url
        .as_deref()
        .unwrap()
        .starts_with("https://tiler.test/tiles/WebMercatorQuad/0/0/0.png?concept_id=C1-TEST"));
    assert_eq!(ctx.tiles.calls(), 1);
}

/// A declared format outside the supported set never reaches an opener or the tiler.
#[tokio::test]
async fn unsupported_format_skips_open_and_probe() {
    let ctx = TestContext::new();
    let collection = CatalogFactory::collection("C2-TEST", Some("HDF-EOS2"));
    let granule = CatalogFactory::granule("G2-TEST", "C2-TEST", "s3://bucket/C2/file.hdf");
    ctx.add(collection, vec![granule]);

    let mut rows = Vec::new();
    ctx.pipeline(test_config()).run(None, &mut rows).await.unwrap();

    assert_outcome(&rows, "C2-TEST", Some(Outcome::UnsupportedFormat));
    assert!(rows[0].tile_request.is_none());
    assert_eq!(ctx.opener.calls(), 0);
    assert_eq!(ctx.tiles.calls(), 0);
}

/// A collection without granules is recorded as such and never probed.
#[tokio::test]
async fn empty_collection_has_no_granule() {
    let ctx = TestContext::new();
    ctx.add(CatalogFactory::collection("C3-TEST", Some("COG")), vec![]);

    let mut rows = Vec::new();
    ctx.pipeline(test_config()).run(None, &mut rows).await.unwrap();

    assert_outcome(&rows, "C3-TEST", Some(Outcome::NoGranuleFound));
    assert!(rows[0].tile_request.is_none());
    assert_eq!(ctx.tiles.calls(), 0);
}

/// Array collections need a temporal extent before they can be probed.
#[tokio::test]
async fn array_collections_follow_temporal_extent() {
    let mut ctx = TestContext::new();
    let (with_extent, granules, url) = CatalogFactory::netcdf("C4-TEST");
    ctx.add(with_extent, granules);
    ctx.dataset(&url, ["lat", "lon", "Rainf"]);

    let bare_url = "s3://bucket/C5/no-time.nc";
    ctx.add(
        CatalogFactory::collection("C5-TEST", Some("netCDF-4")),
        vec![CatalogFactory::granule("G5-TEST", "C5-TEST", bare_url)],
    );
    ctx.dataset(bare_url, ["lat", "lon", "Rainf"]);

    let mut rows = Vec::new();
    let summary = ctx.pipeline(test_config()).run(None, &mut rows).await.unwrap();

    assert_outcome(&rows, "C4-TEST", Some(Outcome::Success));
    let probed = rows.iter().find(|a| a.collection_concept_id == "C4-TEST").unwrap();
    let request = probed.tile_request.as_ref().unwrap();
    assert_eq!(request.field, "Rainf");
    assert_eq!(request.backend, Backend::Array);
    assert!(request.datetime.is_some());
    assert!(probed.tiles_url.as_deref().unwrap().contains("variable=Rainf"));

    assert_outcome(&rows, "C5-TEST", None);
    assert_eq!(summary.unprobed(), 1);
    assert_eq!(ctx.tiles.calls(), 1);
    assert_unprobed_never_tiled(&rows);
    assert_accounting(&summary);
}

/// A unit stuck in the tiler is cut off at the deadline and still accounted for.
#[tokio::test]
async fn stuck_probe_times_out() {
    let mut ctx = TestContext::new();
    ctx.tiles = StaticTileBackend::new().with_delay(Duration::from_secs(30));

    let (collection, granules, url) = CatalogFactory::cog("C1-TEST");
    ctx.add(collection, granules);
    ctx.dataset(&url, ["Red"]);
    ctx.add(
        CatalogFactory::collection("C2-TEST", Some("HDF-EOS2")),
        vec![CatalogFactory::granule("G2-TEST", "C2-TEST", "s3://bucket/C2/file.hdf")],
    );
    ctx.add(CatalogFactory::collection("C3-TEST", Some("COG")), vec![]);

    let config = RunConfig {
        unit_timeout: Duration::from_millis(300),
        open_timeout: Duration::from_millis(100),
        ..test_config()
    };
    let mut rows = Vec::new();
    let summary = ctx.pipeline(config).run(None, &mut rows).await.unwrap();

    assert_eq!(summary.processed, 3);
    assert_eq!(summary.timed_out, 1);
    assert_outcome(&rows, "C1-TEST", Some(Outcome::Timeout));
    assert_outcome(&rows, "C2-TEST", Some(Outcome::UnsupportedFormat));
    assert_outcome(&rows, "C3-TEST", Some(Outcome::NoGranuleFound));
    assert_eq!(summary.failures(), 3);
    assert_accounting(&summary);
}

/// Pages are sized by the partitioner; the login is fetched once per page and
/// provider keys once per page and provider.
#[tokio::test]
async fn pages_and_credentials() {
    let ctx = populated(25);
    let mut rows = Vec::new();
    let summary = ctx.pipeline(test_config()).run(None, &mut rows).await.unwrap();

    assert_eq!(summary.total, 25);
    assert_eq!(summary.processed, 25);
    assert_eq!(rows.len(), 25);
    assert_eq!(ctx.credentials.acquisitions(), 3);
    assert_eq!(ctx.credentials.s3_requests(), vec![TEST_PROVIDER; 3]);
    let mut ids: Vec<_> = rows.iter().map(|a| a.collection_concept_id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 25);
}

/// A page that cannot be fetched is skipped and counted; the rest still run.
#[tokio::test]
async fn failed_page_is_skipped() {
    let ctx = populated(25);
    ctx.catalog.fail_page(2).unwrap();

    let mut rows = Vec::new();
    let summary = ctx.pipeline(test_config()).run(None, &mut rows).await.unwrap();

    assert_eq!(summary.failed_pages, 1);
    assert_eq!(summary.processed, 15);
    assert_eq!(summary.total, 25);
    assert!(!rows.iter().any(|a| a.collection_concept_id == "C015-TEST"));
}

/// Losing the catalog entirely is the one fatal condition.
#[tokio::test]
async fn unreachable_catalog_is_fatal() {
    let ctx = populated(3);
    ctx.catalog.set_unreachable(true).unwrap();

    let err = ctx
        .pipeline(test_config())
        .run(None, &mut Vec::new())
        .await
        .unwrap_err();
    assert!(err.is_fatal());
}

/// The total cap limits how many collections are planned.
#[tokio::test]
async fn total_caps_the_run() {
    let ctx = populated(25);
    let config = RunConfig {
        total: Some(12),
        ..test_config()
    };
    let mut rows = Vec::new();
    let summary = ctx.pipeline(config).run(None, &mut rows).await.unwrap();

    assert_eq!(summary.total, 12);
    assert_eq!(rows.len(), 12);
}

/// Tile failures are recorded by default and abort the run in strict mode.
#[tokio::test]
async fn strict_mode_aborts_on_tile_failure() {
    let mut ctx = populated(3);
    ctx.tiles = StaticTileBackend::new().failing_for("C001-TEST");

    let mut rows = Vec::new();
    let summary = ctx.pipeline(test_config()).run(None, &mut rows).await.unwrap();
    assert_outcome(&rows, "C001-TEST", Some(Outcome::TileGenerationFailed));
    assert_eq!(summary.successes(), 2);

    let strict = RunConfig {
        strict: true,
        ..test_config()
    };
    let err = ctx
        .pipeline(strict)
        .run(None, &mut Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StrictAbort { ref concept_id, .. } if concept_id == "C001-TEST"));
}

/// Pool runs persist every assessment when given a store.
#[tokio::test]
async fn pool_run_persists_results() {
    let ctx = populated(5);
    let store = ctx.store();
    let summary = ctx
        .pipeline(test_config())
        .run(Some(&store), &mut Vec::new())
        .await
        .unwrap();

    assert_eq!(summary.persist_failures, 0);
    let status = store.status().await.unwrap();
    assert_eq!(status.processed, 5);
    assert_eq!(status.successful, 5);
}

/// Each page lands in the parquet report as it completes.
#[tokio::test]
async fn pool_run_writes_parquet_report() {
    let ctx = populated(15);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.parquet");

    let mut writer = ReportWriter::create(&path).unwrap();
    ctx.pipeline(test_config()).run(None, &mut writer).await.unwrap();
    assert_eq!(writer.finish().unwrap(), 15);

    let rows = read_report(&Bytes::from(std::fs::read(&path).unwrap())).unwrap();
    assert_eq!(rows.len(), 15);
    assert!(rows.iter().all(|r| r.outcome.as_deref() == Some("success")));
}

/// A single collection is assessed by id.
#[tokio::test]
async fn single_collection_mode() {
    let ctx = populated(3);
    let pipeline = ctx.pipeline(test_config());

    let a = pipeline.assess_collection("C002-TEST").await.unwrap();
    assert_eq!(a.outcome, Some(Outcome::Success));
    assert!(pipeline.assess_collection("C999-TEST").await.is_err());
}

/// A granule id pins the sampled granule.
#[tokio::test]
async fn single_granule_mode() {
    let mut ctx = TestContext::new();
    let (collection, mut granules, url) = CatalogFactory::cog("C1-TEST");
    let mut external = CatalogFactory::granule("G-external", "C1-TEST", "unused");
    external.links = vec![Link {
        url: "https://data.test/C1/other.tif".into(),
        kind: LinkKind::External,
        subtype: None,
    }];
    granules.push(external);
    ctx.add(collection, granules);
    ctx.dataset(&url, ["Red"]);

    let pipeline = ctx.pipeline(test_config());
    let pinned = pipeline.assess_granule("G-external").await.unwrap();
    assert_eq!(pinned.granule_id.as_deref(), Some("G-external"));
    assert_eq!(pinned.data_url.as_deref(), Some("https://data.test/C1/other.tif"));
    assert_eq!(pinned.outcome, Some(Outcome::CantOpenFile));

    let sampled = pipeline.assess_granule("G-C1-TEST").await.unwrap();
    assert_eq!(sampled.outcome, Some(Outcome::Success));
    assert!(pipeline.assess_granule("G-missing").await.is_err());
}
