//! Collection classification.
//!
//! The classifier samples one granule of a collection, works out how it would
//! be read, opens it to list its fields and derives the single tile request a
//! probe should make. It never fails: every problem becomes an
//! [`Outcome`] on the returned [`Assessment`].
//!
//! ```text
//! count granules ─► sample offset ─► fetch granule ─► resolve URL
//!       │                                  │               │
//!   0: no_granule_found          none: no_granule_found   none: failed_to_extract_url
//!                                                          │
//!            validate format ◄─────────────────────────────┘
//!                  │ unsupported_format
//!                  ▼
//!            select backend ─► open (bounded) ─► pick field ─► tile request
//!                                  │ cant_open_file     │ cant_extract_variables
//! ```

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::catalog::{CatalogClient, MAX_GRANULE_OFFSET};
use crate::credentials::CredentialSession;
use crate::formats;
use crate::model::{AccessMode, Assessment, Backend, CollectionRef, GranuleRef, TileRequest};
use crate::opener::{OpenRequest, OpenerSet};
use crate::outcome::Outcome;

/// Chooses which granule of a collection to sample.
pub trait OffsetSampler: Send + Sync {
    /// Returns an offset in `[0, bound)`. `bound` is at least 1.
    fn sample(&self, bound: u64) -> u64;
}

/// Uniform random sampling.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSampler;

impl OffsetSampler for RandomSampler {
    fn sample(&self, bound: u64) -> u64 {
        rand::thread_rng().gen_range(0..bound.max(1))
    }
}

/// Always samples the same offset, clamped to the bound.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedSampler(pub u64);

impl OffsetSampler for FixedSampler {
    fn sample(&self, bound: u64) -> u64 {
        self.0.min(bound.saturating_sub(1))
    }
}

/// Classifier settings.
#[derive(Debug, Clone)]
pub struct ClassifierOptions {
    /// Preferred link class.
    pub access_mode: AccessMode,
    /// Upper bound on a single dataset open.
    pub open_timeout: Duration,
    /// Tiling endpoint used to render `tiles_url`.
    pub tiler_endpoint: String,
}

/// Builds assessments for collections.
#[derive(Clone)]
pub struct Classifier {
    catalog: Arc<dyn CatalogClient>,
    openers: OpenerSet,
    sampler: Arc<dyn OffsetSampler>,
    options: ClassifierOptions,
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Classifier {
    /// Creates a classifier sampling granules uniformly at random.
    #[must_use]
    pub fn new(catalog: Arc<dyn CatalogClient>, openers: OpenerSet, options: ClassifierOptions) -> Self {
        Self {
            catalog,
            openers,
            sampler: Arc::new(RandomSampler),
            options,
        }
    }

    /// Replaces the granule sampler.
    #[must_use]
    pub fn with_sampler(mut self, sampler: Arc<dyn OffsetSampler>) -> Self {
        self.sampler = sampler;
        self
    }

    /// Returns the classifier settings.
    #[must_use]
    pub const fn options(&self) -> &ClassifierOptions {
        &self.options
    }

    /// Classifies a collection from one sampled granule.
    pub async fn classify(&self, collection: &CollectionRef, credentials: &CredentialSession) -> Assessment {
        let concept_id = collection.concept_id.as_str();
        let mut base = Assessment::new(concept_id);
        base.data_centers.clone_from(&collection.data_centers);
        base.format.clone_from(&collection.file_format);

        let count = match self.catalog.granule_count(concept_id).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(concept_id, error = %e, "granule count failed");
                return base.with_outcome(Outcome::FailedToExtract, Some(e.to_string()));
            }
        };
        if count == 0 {
            tracing::info!(concept_id, "collection has no granules");
            return base.with_outcome(Outcome::NoGranuleFound, Some("collection has no granules".into()));
        }

        let offset = self.sampler.sample(count.min(MAX_GRANULE_OFFSET));
        let granule = match self.catalog.granule_at(concept_id, offset).await {
            Ok(Some(granule)) => granule,
            Ok(None) => {
                return base.with_outcome(
                    Outcome::NoGranuleFound,
                    Some(format!("no granule at offset {offset} of {count}")),
                );
            }
            Err(e) => {
                tracing::warn!(concept_id, offset, error = %e, "granule fetch failed");
                return base.with_outcome(Outcome::FailedToExtract, Some(e.to_string()));
            }
        };

        self.classify_granule(collection, &granule, credentials).await
    }

    /// Classifies a collection from a given granule.
    pub async fn classify_granule(
        &self,
        collection: &CollectionRef,
        granule: &GranuleRef,
        credentials: &CredentialSession,
    ) -> Assessment {
        let concept_id = collection.concept_id.as_str();
        let mut assessment = Assessment::new(concept_id);
        assessment.granule_id = Some(granule.granule_id.clone());
        assessment.data_centers.clone_from(&collection.data_centers);

        let Some(url) = granule.data_url(self.options.access_mode) else {
            tracing::info!(concept_id, granule_id = %granule.granule_id, "no data link");
            return assessment.with_outcome(
                Outcome::FailedToExtractUrl,
                Some(format!("granule {} has no data link", granule.granule_id)),
            );
        };
        assessment.data_url = Some(url.to_string());

        let format = collection.file_format.clone().or_else(|| granule.format.clone());
        let extension = formats::infer_extension(url);
        assessment.format.clone_from(&format);
        assessment.extension.clone_from(&extension);

        if let Err(reason) = formats::validate(format.as_deref(), extension.as_deref()) {
            tracing::info!(concept_id, %reason, "unsupported format");
            return assessment.with_outcome(Outcome::UnsupportedFormat, Some(reason));
        }

        let backend = formats::select_backend(format.as_deref(), extension.as_deref());
        assessment.backend = Some(backend);

        let provider = granule
            .provider_id
            .as_deref()
            .or_else(|| collection.data_center());
        let scoped = credentials.for_provider(provider).await;
        let request = OpenRequest {
            url,
            provider,
            credentials: &scoped,
        };
        let opener = self.openers.for_backend(backend);
        let opened = tokio::time::timeout(self.options.open_timeout, opener.open(&request)).await;

        let fields = match opened {
            Ok(Ok(info)) => info.fields,
            Ok(Err(e)) => {
                tracing::info!(concept_id, url, error = %e, "cannot open file");
                return assessment.with_outcome(Outcome::CantOpenFile, Some(e.to_string()));
            }
            Err(_) => {
                tracing::info!(concept_id, url, "open timed out");
                return assessment.with_outcome(
                    Outcome::CantOpenFile,
                    Some(format!(
                        "open timed out after {}s",
                        self.options.open_timeout.as_secs()
                    )),
                );
            }
        };

        if fields.is_empty() {
            return assessment.with_outcome(
                Outcome::CantExtractVariables,
                Some(format!("no fields found in {url}")),
            );
        }

        let field = formats::choose_field(backend, &fields).map(str::to_string);
        assessment.data_variables = fields;

        let datetime = match backend {
            Backend::Raster => None,
            Backend::Array if granule.temporal_extent.is_empty() => {
                tracing::info!(concept_id, "no temporal extent, probe skipped");
                assessment.detail = Some("no temporal extent; probe skipped".into());
                return assessment;
            }
            Backend::Array => Some(granule.temporal_extent.clone()),
        };

        if let Some(field) = field {
            let tile_request = TileRequest::probe(concept_id, backend, field, datetime);
            assessment.tiles_url = Some(tile_request.tiles_url(&self.options.tiler_endpoint));
            assessment.tile_request = Some(tile_request);
        }
        assessment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::memory::MemoryCatalog;
    use crate::model::{Link, LinkKind, TemporalExtent};
    use crate::opener::StaticOpener;

    fn granule(url: &str, extent: TemporalExtent) -> GranuleRef {
        GranuleRef {
            granule_id: "G1-P".into(),
            collection_concept_id: "C1-P".into(),
            links: vec![Link {
                url: url.into(),
                kind: LinkKind::Direct,
                subtype: None,
            }],
            temporal_extent: extent,
            format: None,
            provider_id: Some("P".into()),
            raw: serde_json::Value::Null,
        }
    }

    fn classifier(catalog: MemoryCatalog, opener: StaticOpener) -> Classifier {
        Classifier::new(
            Arc::new(catalog),
            OpenerSet::uniform(Arc::new(opener)),
            ClassifierOptions {
                access_mode: AccessMode::Direct,
                open_timeout: Duration::from_secs(5),
                tiler_endpoint: "https://tiler.example".into(),
            },
        )
        .with_sampler(Arc::new(FixedSampler(0)))
    }

    #[test]
    fn fixed_sampler_clamps() {
        assert_eq!(FixedSampler(10).sample(3), 2);
        assert_eq!(FixedSampler(1).sample(3), 1);
    }

    #[test]
    fn random_sampler_stays_in_bounds() {
        for _ in 0..100 {
            assert!(RandomSampler.sample(3) < 3);
        }
        assert_eq!(RandomSampler.sample(1), 0);
    }

    #[tokio::test]
    async fn array_without_temporal_extent_is_pending() {
        let catalog = MemoryCatalog::new();
        let g = granule("s3://b/a.nc", TemporalExtent::default());
        catalog.insert(CollectionRef::new("C1-P"), vec![g]).unwrap();
        let opener = StaticOpener::new().with_dataset("s3://b/a.nc", ["lat", "Tair"]);

        let a = classifier(catalog, opener)
            .classify(&CollectionRef::new("C1-P"), &CredentialSession::anonymous())
            .await;
        assert_eq!(a.backend, Some(Backend::Array));
        assert!(a.outcome.is_none());
        assert!(a.tile_request.is_none());
        assert_eq!(a.data_variables, vec!["lat", "Tair"]);
    }

    #[tokio::test]
    async fn array_with_extent_prefers_known_variable() {
        let catalog = MemoryCatalog::new();
        let g = granule("s3://b/a.nc4", TemporalExtent::new("2020-01-01", "2020-01-02"));
        catalog.insert(CollectionRef::new("C1-P"), vec![g]).unwrap();
        let opener = StaticOpener::new().with_dataset("s3://b/a.nc4", ["lat", "Tair"]);

        let a = classifier(catalog, opener)
            .classify(&CollectionRef::new("C1-P"), &CredentialSession::anonymous())
            .await;
        let req = a.tile_request.expect("request");
        assert_eq!(req.field, "Tair");
        assert_eq!(req.datetime.map(|d| d.as_interval()).as_deref(), Some("2020-01-01/2020-01-02"));
        assert!(a.tiles_url.unwrap().contains("variable=Tair"));
    }

    #[tokio::test]
    async fn open_failure_and_empty_fields() {
        let catalog = MemoryCatalog::new();
        catalog
            .insert(CollectionRef::new("C1-P"), vec![granule("s3://b/a.tif", TemporalExtent::default())])
            .unwrap();
        let a = classifier(catalog.clone(), StaticOpener::new())
            .classify(&CollectionRef::new("C1-P"), &CredentialSession::anonymous())
            .await;
        assert_eq!(a.outcome, Some(Outcome::CantOpenFile));

        let empty: [&str; 0] = [];
        let opener = StaticOpener::new().with_dataset("s3://b/a.tif", empty);
        let a = classifier(catalog, opener)
            .classify(&CollectionRef::new("C1-P"), &CredentialSession::anonymous())
            .await;
        assert_eq!(a.outcome, Some(Outcome::CantExtractVariables));
        assert!(a.tile_request.is_none());
    }

    #[tokio::test]
    async fn slow_open_is_bounded() {
        let catalog = MemoryCatalog::new();
        catalog
            .insert(CollectionRef::new("C1-P"), vec![granule("s3://b/a.tif", TemporalExtent::default())])
            .unwrap();
        let opener = StaticOpener::new()
            .with_dataset("s3://b/a.tif", ["Red"])
            .with_delay(Duration::from_secs(60));
        let mut c = classifier(catalog, opener);
        c.options.open_timeout = Duration::from_millis(20);

        let a = c
            .classify(&CollectionRef::new("C1-P"), &CredentialSession::anonymous())
            .await;
        assert_eq!(a.outcome, Some(Outcome::CantOpenFile));
        assert!(a.detail.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn missing_link_fails_url_extraction() {
        let catalog = MemoryCatalog::new();
        let mut g = granule("s3://b/a.tif", TemporalExtent::default());
        g.links.clear();
        catalog.insert(CollectionRef::new("C1-P"), vec![g]).unwrap();

        let a = classifier(catalog, StaticOpener::new())
            .classify(&CollectionRef::new("C1-P"), &CredentialSession::anonymous())
            .await;
        assert_eq!(a.outcome, Some(Outcome::FailedToExtractUrl));
        assert_eq!(a.granule_id.as_deref(), Some("G1-P"));
    }

    #[tokio::test]
    async fn catalog_failure_is_failed_to_extract() {
        let catalog = MemoryCatalog::new();
        catalog.set_unreachable(true).unwrap();
        let a = classifier(catalog, StaticOpener::new())
            .classify(&CollectionRef::new("C1-P"), &CredentialSession::anonymous())
            .await;
        assert_eq!(a.outcome, Some(Outcome::FailedToExtract));
    }

    /// Opens only when handed the AWS keys issued for the granule's provider.
    struct KeyedOpener;

    #[async_trait::async_trait]
    impl crate::opener::DatasetOpener for KeyedOpener {
        async fn open(
            &self,
            request: &OpenRequest<'_>,
        ) -> crate::error::Result<crate::opener::DatasetInfo> {
            match (&request.credentials.s3, request.provider) {
                (Some(keys), Some("P")) if keys.access_key_id == "AKIA-P" => {
                    Ok(crate::opener::DatasetInfo {
                        fields: vec!["Red".into()],
                    })
                }
                _ => Err(crate::error::Error::Open {
                    url: request.url.to_string(),
                    message: "access denied".into(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn opener_receives_provider_keys() {
        use crate::credentials::{Credentials, S3Credentials, StaticCredentials};

        let catalog = MemoryCatalog::new();
        catalog
            .insert(
                CollectionRef::new("C1-P"),
                vec![granule("s3://b/a.tif", TemporalExtent::default())],
            )
            .unwrap();
        let c = Classifier::new(
            Arc::new(catalog),
            OpenerSet::uniform(Arc::new(KeyedOpener)),
            classifier(MemoryCatalog::new(), StaticOpener::new()).options().clone(),
        )
        .with_sampler(Arc::new(FixedSampler(0)));

        let provider = StaticCredentials::new(Credentials::bearer("t"))
            .with_s3("P", S3Credentials::new("AKIA-P", "secret", None));
        let session = CredentialSession::start(Arc::new(provider.clone())).await.unwrap();

        let a = c.classify(&CollectionRef::new("C1-P"), &session).await;
        assert_eq!(a.outcome, None);
        assert_eq!(a.tile_request.unwrap().field, "Red");

        let denied = c
            .classify(&CollectionRef::new("C1-P"), &CredentialSession::anonymous())
            .await;
        assert_eq!(denied.outcome, Some(Outcome::CantOpenFile));
        assert_eq!(provider.s3_requests(), vec!["P"]);
    }
}
