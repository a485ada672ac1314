//! Pre-built test fixtures for common test scenarios.
//!
//! Provides factory functions to create catalog records, UMM JSON bodies
//! and a wired pipeline with sensible defaults.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tilecheck_flow::catalog::memory::MemoryCatalog;
use tilecheck_flow::classify::FixedSampler;
use tilecheck_flow::config::RunConfig;
use tilecheck_flow::credentials::{Credentials, S3Credentials, StaticCredentials};
use tilecheck_flow::model::{CollectionRef, GranuleRef, Link, LinkKind, TemporalExtent};
use tilecheck_flow::opener::{OpenerSet, StaticOpener};
use tilecheck_flow::pipeline::Pipeline;
use tilecheck_flow::probe::StaticTileBackend;
use tilecheck_flow::store::ResultStore;

use crate::storage::TracingMemoryBackend;

/// Store prefix used by [`TestContext`].
pub const TEST_PREFIX: &str = "collections";

/// Provider id of every granule the factory builds.
pub const TEST_PROVIDER: &str = "TEST";

/// Test context with shared storage, catalog and stub services.
///
/// Clones of the stubs share call counters, so assertions can be made on the
/// context after the pipeline ran.
pub struct TestContext {
    /// Shared storage backend.
    pub storage: Arc<TracingMemoryBackend>,
    /// In-memory catalog.
    pub catalog: MemoryCatalog,
    /// Dataset opener; register datasets before calling [`Self::pipeline`].
    pub opener: StaticOpener,
    /// Tile backend.
    pub tiles: StaticTileBackend,
    /// Credential provider; issues S3 keys for [`TEST_PROVIDER`].
    pub credentials: StaticCredentials,
}

impl TestContext {
    /// Creates a new empty context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            storage: Arc::new(TracingMemoryBackend::new()),
            catalog: MemoryCatalog::new(),
            opener: StaticOpener::new(),
            tiles: StaticTileBackend::new(),
            credentials: StaticCredentials::new(Credentials::bearer("test-token")).with_s3(
                TEST_PROVIDER,
                S3Credentials::new("AKIA-TEST", "test-secret", Some("test-session".into())),
            ),
        }
    }

    /// Adds a collection and its granules to the catalog.
    pub fn add(&self, collection: CollectionRef, granules: Vec<GranuleRef>) {
        self.catalog.insert(collection, granules).expect("insert collection");
    }

    /// Registers the fields a dataset URL opens with.
    pub fn dataset<I, S>(&mut self, url: &str, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.opener = std::mem::take(&mut self.opener).with_dataset(url, fields);
    }

    /// Returns a result store over the context storage.
    #[must_use]
    pub fn store(&self) -> ResultStore {
        ResultStore::new(self.storage.clone(), TEST_PREFIX).expect("valid prefix")
    }

    /// Builds a pipeline over the context stubs, sampling the first granule.
    #[must_use]
    pub fn pipeline(&self, config: RunConfig) -> Pipeline {
        Pipeline::new(
            Arc::new(self.catalog.clone()),
            OpenerSet::uniform(Arc::new(self.opener.clone())),
            Arc::new(self.tiles.clone()),
            Arc::new(self.credentials.clone()),
            config,
        )
        .expect("valid config")
        .with_sampler(Arc::new(FixedSampler(0)))
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Run configuration with small pages and short deadlines.
#[must_use]
pub fn test_config() -> RunConfig {
    RunConfig {
        page_size: 10,
        concurrency: 4,
        batch_size: 10,
        unit_timeout: Duration::from_secs(5),
        open_timeout: Duration::from_secs(2),
        tiler_endpoint: "https://tiler.test".to_string(),
        ..RunConfig::default()
    }
}

/// Factory for catalog records.
pub struct CatalogFactory;

impl CatalogFactory {
    /// Creates a collection record.
    #[must_use]
    pub fn collection(concept_id: &str, format: Option<&str>) -> CollectionRef {
        let mut collection = CollectionRef::new(concept_id);
        collection.file_format = format.map(str::to_string);
        collection.data_centers = vec!["TEST DAAC".to_string()];
        collection
    }

    /// Creates a granule with one direct-access link and no temporal extent.
    #[must_use]
    pub fn granule(granule_id: &str, collection: &str, url: &str) -> GranuleRef {
        GranuleRef {
            granule_id: granule_id.to_string(),
            collection_concept_id: collection.to_string(),
            links: vec![Link {
                url: url.to_string(),
                kind: LinkKind::Direct,
                subtype: None,
            }],
            temporal_extent: TemporalExtent::default(),
            format: None,
            provider_id: Some(TEST_PROVIDER.to_string()),
            raw: Value::Null,
        }
    }

    /// Creates a granule with a temporal extent.
    #[must_use]
    pub fn granule_with_extent(
        granule_id: &str,
        collection: &str,
        url: &str,
        begin: &str,
        end: &str,
    ) -> GranuleRef {
        GranuleRef {
            temporal_extent: TemporalExtent::new(begin, end),
            ..Self::granule(granule_id, collection, url)
        }
    }

    /// A Cloud-Optimized GeoTIFF collection with one RGB granule.
    ///
    /// Returns the collection, its granules and the dataset URL.
    #[must_use]
    pub fn cog(concept_id: &str) -> (CollectionRef, Vec<GranuleRef>, String) {
        let url = format!("s3://test-bucket/{concept_id}/scene.tif");
        let granule = Self::granule(&format!("G-{concept_id}"), concept_id, &url);
        (Self::collection(concept_id, Some("COG")), vec![granule], url)
    }

    /// A NetCDF collection with one granule spanning a day.
    #[must_use]
    pub fn netcdf(concept_id: &str) -> (CollectionRef, Vec<GranuleRef>, String) {
        let url = format!("s3://test-bucket/{concept_id}/day.nc");
        let granule = Self::granule_with_extent(
            &format!("G-{concept_id}"),
            concept_id,
            &url,
            "2020-01-01T00:00:00Z",
            "2020-01-01T23:59:59Z",
        );
        (Self::collection(concept_id, Some("netCDF-4")), vec![granule], url)
    }
}

/// UMM JSON search bodies as the catalog publishes them.
pub mod umm {
    use super::{json, Value};

    /// Wraps items in a search envelope.
    #[must_use]
    pub fn search_results(hits: u64, items: Vec<Value>) -> Value {
        json!({ "hits": hits, "took": 5, "items": items })
    }

    /// A collection item.
    #[must_use]
    pub fn collection(concept_id: &str, format: Option<&str>, data_centers: &[&str]) -> Value {
        let centers: Vec<Value> = data_centers
            .iter()
            .map(|name| json!({ "ShortName": name, "Roles": ["ARCHIVER"] }))
            .collect();
        let mut umm = json!({
            "ShortName": format!("{concept_id}-short"),
            "ProcessingLevel": { "Id": "3" },
            "DataCenters": centers,
        });
        if let Some(format) = format {
            umm["ArchiveAndDistributionInformation"] =
                json!({ "FileArchiveInformation": [{ "Format": format }] });
        }
        json!({
            "meta": { "concept-id": concept_id, "provider-id": "TEST" },
            "umm": umm,
        })
    }

    /// A granule item with one related URL per `(url, type, subtype)`.
    #[must_use]
    pub fn granule(
        granule_id: &str,
        collection: &str,
        urls: &[(&str, &str, Option<&str>)],
        range: Option<(&str, &str)>,
    ) -> Value {
        let related: Vec<Value> = urls
            .iter()
            .map(|(url, kind, subtype)| {
                let mut entry = json!({ "URL": url, "Type": kind });
                if let Some(subtype) = subtype {
                    entry["Subtype"] = json!(subtype);
                }
                entry
            })
            .collect();
        let mut umm = json!({
            "GranuleUR": format!("{granule_id}-ur"),
            "RelatedUrls": related,
        });
        if let Some((begin, end)) = range {
            umm["TemporalExtent"] =
                json!({ "RangeDateTime": { "BeginningDateTime": begin, "EndingDateTime": end } });
        }
        json!({
            "meta": {
                "concept-id": granule_id,
                "collection-concept-id": collection,
                "provider-id": "TEST",
            },
            "umm": umm,
        })
    }
}
