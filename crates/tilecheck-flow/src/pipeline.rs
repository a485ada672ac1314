//! Run drivers.
//!
//! Two ways to cover the catalog share the same unit of work (classify, then
//! probe when a tile request exists):
//!
//! - **Pool** ([`Pipeline::run`]): pages the catalog, runs each page on the
//!   executor in-process, persists and appends each page before fetching the
//!   next one.
//! - **Fabric** ([`Pipeline::setup`], [`Pipeline::process`],
//!   [`Pipeline::reprocess`]): marks every collection pending in the result
//!   store, then drains pending collections in batches. Several machines may
//!   drain the same store by taking disjoint [`Shard`]s.
//!
//! Single collections and single granules go through the same executor so
//! the unit deadline still applies.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::Instrument;

use tilecheck_core::observability::batch_span;

use crate::catalog::{CatalogClient, CollectionQuery};
use crate::classify::{Classifier, OffsetSampler};
use crate::config::RunConfig;
use crate::credentials::{CredentialProvider, CredentialSession};
use crate::error::{Error, Result};
use crate::executor::{self, UnitReport, UnitState};
use crate::export::ReportWriter;
use crate::metrics::FlowMetrics;
use crate::model::{Assessment, CollectionRef, GranuleRef, WorkItem};
use crate::opener::OpenerSet;
use crate::outcome::Outcome;
use crate::partition::{plan, PageDescriptor};
use crate::probe::{ProbeRunner, TileBackend};
use crate::store::keys::NO_REASON;
use crate::store::ResultStore;

/// A slice of the concept id space, for splitting fabric work across machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shard {
    index: usize,
    count: usize,
}

impl Shard {
    /// The whole id space.
    pub const ALL: Self = Self { index: 0, count: 1 };

    /// Creates shard `index` of `count`.
    ///
    /// # Errors
    ///
    /// Returns an error if `count` is zero or `index >= count`.
    pub fn new(index: usize, count: usize) -> Result<Self> {
        if count == 0 || index >= count {
            return Err(Error::config(format!(
                "shard index {index} out of range for {count} shards"
            )));
        }
        Ok(Self { index, count })
    }

    /// Returns true if this shard owns `concept_id`.
    ///
    /// Ownership depends only on the id bytes, so every machine agrees on it.
    #[must_use]
    pub fn owns(&self, concept_id: &str) -> bool {
        if self.count == 1 {
            return true;
        }
        let digest = Sha256::digest(concept_id.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        let bucket = u64::from_be_bytes(head) % self.count as u64;
        bucket == self.index as u64
    }
}

impl Default for Shard {
    fn default() -> Self {
        Self::ALL
    }
}

/// Totals of one run.
///
/// `processed == successes() + failures() + unprobed()` always holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Collections targeted.
    pub total: usize,
    /// Assessments produced.
    pub processed: usize,
    /// Assessments by outcome label (`none` for unprobed).
    pub by_outcome: BTreeMap<String, usize>,
    /// Pages skipped because they could not be fetched.
    pub failed_pages: usize,
    /// Results that could not be written to the store.
    pub persist_failures: usize,
    /// Units abandoned at the deadline.
    pub timed_out: usize,
}

impl RunSummary {
    fn record(&mut self, report: &UnitReport) {
        self.processed += 1;
        if report.state == UnitState::TimedOut {
            self.timed_out += 1;
        }
        *self
            .by_outcome
            .entry(report.assessment.outcome_label().to_string())
            .or_default() += 1;
    }

    fn count(&self, label: &str) -> usize {
        self.by_outcome.get(label).copied().unwrap_or(0)
    }

    /// Assessments that tiled.
    #[must_use]
    pub fn successes(&self) -> usize {
        self.count(Outcome::Success.as_label())
    }

    /// Assessments with a failure outcome.
    #[must_use]
    pub fn failures(&self) -> usize {
        Outcome::ALL
            .iter()
            .filter(|o| !o.is_success())
            .map(|o| self.count(o.as_label()))
            .sum()
    }

    /// Assessments classified without a probe verdict.
    #[must_use]
    pub fn unprobed(&self) -> usize {
        self.count(NO_REASON)
    }
}

/// Totals of a fabric setup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SetupSummary {
    /// Collections targeted.
    pub total: usize,
    /// Markers created.
    pub marked: usize,
    /// Collections that were already pending.
    pub already_pending: usize,
    /// Pages skipped because they could not be fetched.
    pub failed_pages: usize,
    /// Markers that could not be written.
    pub persist_failures: usize,
}

/// Destination for each page of assessments.
pub trait PageSink: Send {
    /// Writes one page of assessments.
    ///
    /// # Errors
    ///
    /// Returns an error if the page cannot be written.
    fn write_page(&mut self, rows: &[Assessment]) -> Result<()>;
}

impl<W: Write + Send> PageSink for ReportWriter<W> {
    fn write_page(&mut self, rows: &[Assessment]) -> Result<()> {
        self.append(rows)
    }
}

impl PageSink for Vec<Assessment> {
    fn write_page(&mut self, rows: &[Assessment]) -> Result<()> {
        self.extend_from_slice(rows);
        Ok(())
    }
}

/// The classify-then-probe unit and what it needs.
#[derive(Clone)]
struct Stages {
    catalog: Arc<dyn CatalogClient>,
    classifier: Classifier,
    probe: ProbeRunner,
}

impl Stages {
    async fn finish(&self, assessment: Assessment, credentials: &CredentialSession) -> Assessment {
        if assessment.is_probe_ready() {
            self.probe.probe(assessment, credentials.login()).await
        } else {
            assessment
        }
    }

    async fn assess(&self, collection: &CollectionRef, credentials: &CredentialSession) -> Assessment {
        let assessment = self.classifier.classify(collection, credentials).await;
        self.finish(assessment, credentials).await
    }

    async fn assess_granule(
        &self,
        collection: &CollectionRef,
        granule: &GranuleRef,
        credentials: &CredentialSession,
    ) -> Assessment {
        let assessment = self
            .classifier
            .classify_granule(collection, granule, credentials)
            .await;
        self.finish(assessment, credentials).await
    }

    async fn assess_by_id(&self, concept_id: &str, credentials: &CredentialSession) -> Result<Assessment> {
        match self.catalog.collection_by_id(concept_id).await? {
            Some(collection) => Ok(self.assess(&collection, credentials).await),
            None => Ok(Assessment::failed(
                concept_id,
                Outcome::FailedToExtract,
                "collection not found in catalog",
            )),
        }
    }
}

/// Drives classify+probe units over the catalog.
pub struct Pipeline {
    stages: Stages,
    credentials: Arc<dyn CredentialProvider>,
    config: RunConfig,
    metrics: FlowMetrics,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Creates a pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(
        catalog: Arc<dyn CatalogClient>,
        openers: OpenerSet,
        tiles: Arc<dyn TileBackend>,
        credentials: Arc<dyn CredentialProvider>,
        config: RunConfig,
    ) -> Result<Self> {
        config.validate()?;
        let classifier = Classifier::new(Arc::clone(&catalog), openers, config.classifier_options());
        Ok(Self {
            stages: Stages {
                catalog,
                classifier,
                probe: ProbeRunner::new(tiles),
            },
            credentials,
            config,
            metrics: FlowMetrics::new(),
        })
    }

    /// Replaces the granule sampler.
    #[must_use]
    pub fn with_sampler(mut self, sampler: Arc<dyn OffsetSampler>) -> Self {
        self.stages.classifier = self.stages.classifier.with_sampler(sampler);
        self
    }

    /// Returns the run configuration.
    #[must_use]
    pub const fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Number of collections to cover: catalog hits, capped by `total`.
    async fn collection_total(&self) -> Result<usize> {
        let probe = self
            .stages
            .catalog
            .search_collections(&CollectionQuery::page(1, 1))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "cannot count catalog collections");
                e
            })?;
        let hits = usize::try_from(probe.hits).unwrap_or(usize::MAX);
        Ok(self.config.total.map_or(hits, |cap| cap.min(hits)))
    }

    async fn fetch_page(&self, page: &PageDescriptor) -> Result<Vec<CollectionRef>> {
        let mut items = self
            .stages
            .catalog
            .search_collections(&CollectionQuery::page(page.page_num(), page.stride))
            .await?
            .items;
        items.truncate(page.page_size);
        Ok(items)
    }

    async fn execute_collections(&self, items: Vec<WorkItem>, credentials: CredentialSession) -> Vec<UnitReport> {
        let stages = self.stages.clone();
        executor::run(items, self.config.executor_options(), move |item: WorkItem| {
            let stages = stages.clone();
            let credentials = credentials.clone();
            async move { Ok(stages.assess(&item.collection, &credentials).await) }
        })
        .await
    }

    async fn execute_ids(&self, items: Vec<WorkItem>, credentials: CredentialSession) -> Vec<UnitReport> {
        let stages = self.stages.clone();
        executor::run(items, self.config.executor_options(), move |item: WorkItem| {
            let stages = stages.clone();
            let credentials = credentials.clone();
            async move { stages.assess_by_id(item.concept_id(), &credentials).await }
        })
        .await
    }

    /// Writes every report to the store and tallies it. Write failures are
    /// counted; the assessment still counts as processed.
    async fn persist(&self, store: Option<&ResultStore>, reports: &[UnitReport], summary: &mut RunSummary) {
        for report in reports {
            summary.record(report);
            let Some(store) = store else { continue };
            if let Err(e) = store.put_result(&report.assessment).await {
                tracing::error!(
                    concept_id = report.item.concept_id(),
                    error = %e,
                    "failed to persist result"
                );
                self.metrics.record_persist_failure();
                summary.persist_failures += 1;
            }
        }
    }

    fn check_strict(&self, reports: &[UnitReport]) -> Result<()> {
        if !self.config.strict {
            return Ok(());
        }
        match reports
            .iter()
            .find(|r| r.assessment.outcome == Some(Outcome::TileGenerationFailed))
        {
            Some(report) => Err(Error::StrictAbort {
                concept_id: report.assessment.collection_concept_id.clone(),
                detail: report.assessment.detail.clone().unwrap_or_default(),
            }),
            None => Ok(()),
        }
    }

    /// Pool run: pages the catalog and assesses every collection in-process.
    ///
    /// Each page is persisted (when a store is given) and written to `sink`
    /// before the next page is fetched. A page that cannot be fetched is
    /// skipped and counted.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be counted, a page cannot be
    /// written to `sink`, or strict mode sees a tile generation failure.
    pub async fn run(&self, store: Option<&ResultStore>, sink: &mut dyn PageSink) -> Result<RunSummary> {
        let total = self.collection_total().await?;
        let pages = plan(total, self.config.page_size);
        tracing::info!(total, pages = pages.len(), page_size = self.config.page_size, "pool run planned");

        let mut summary = RunSummary {
            total,
            ..RunSummary::default()
        };

        for page in &pages {
            let span = batch_span("run", page.page_index, page.page_size);
            let result = async {
                let collections = match self.fetch_page(page).await {
                    Ok(collections) => collections,
                    Err(e) => {
                        tracing::warn!(page_num = page.page_num(), error = %e, "page fetch failed; skipping");
                        self.metrics.record_page_failed();
                        summary.failed_pages += 1;
                        return Ok(());
                    }
                };
                let credentials = match CredentialSession::start(Arc::clone(&self.credentials)).await {
                    Ok(credentials) => credentials,
                    Err(e) => {
                        tracing::warn!(error = %e, "credential acquisition failed; skipping page");
                        self.metrics.record_page_failed();
                        summary.failed_pages += 1;
                        return Ok(());
                    }
                };

                let items = collections
                    .into_iter()
                    .map(|c| WorkItem::new(page.page_index, c))
                    .collect();
                let reports = self.execute_collections(items, credentials).await;
                self.persist(store, &reports, &mut summary).await;

                let rows: Vec<Assessment> = reports.iter().map(|r| r.assessment.clone()).collect();
                sink.write_page(&rows)?;
                self.metrics.record_page_processed();
                tracing::info!(
                    processed = summary.processed,
                    total = summary.total,
                    "page complete"
                );
                self.check_strict(&reports)
            }
            .instrument(span)
            .await;
            result?;
        }

        tracing::info!(
            processed = summary.processed,
            successes = summary.successes(),
            failures = summary.failures(),
            failed_pages = summary.failed_pages,
            persist_failures = summary.persist_failures,
            "pool run complete"
        );
        Ok(summary)
    }

    /// Fabric setup: marks every catalog collection pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be counted.
    pub async fn setup(&self, store: &ResultStore) -> Result<SetupSummary> {
        let total = self.collection_total().await?;
        let mut summary = SetupSummary {
            total,
            ..SetupSummary::default()
        };

        for page in plan(total, self.config.page_size) {
            let collections = match self
                .fetch_page(&page)
                .instrument(batch_span("setup", page.page_index, page.page_size))
                .await
            {
                Ok(collections) => collections,
                Err(e) => {
                    tracing::warn!(page_num = page.page_num(), error = %e, "page fetch failed; skipping");
                    self.metrics.record_page_failed();
                    summary.failed_pages += 1;
                    continue;
                }
            };
            for collection in &collections {
                match store.mark_pending(&collection.concept_id).await {
                    Ok(true) => summary.marked += 1,
                    Ok(false) => summary.already_pending += 1,
                    Err(e) => {
                        tracing::error!(concept_id = %collection.concept_id, error = %e, "failed to mark pending");
                        self.metrics.record_persist_failure();
                        summary.persist_failures += 1;
                    }
                }
            }
            self.metrics.record_page_processed();
        }

        tracing::info!(
            total = summary.total,
            marked = summary.marked,
            already_pending = summary.already_pending,
            "fabric setup complete"
        );
        Ok(summary)
    }

    /// Fabric process: assesses every pending collection this shard owns.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed, or strict mode sees a
    /// tile generation failure.
    pub async fn process(&self, store: &ResultStore, shard: Shard) -> Result<RunSummary> {
        let ids = store.unprocessed().await?;
        self.drive(store, ids, shard, "process").await
    }

    /// Fabric reprocess: re-drives collections whose result carries `reason`.
    ///
    /// `reason` is an outcome label, `success`, or `none` for unprobed results.
    ///
    /// # Errors
    ///
    /// Returns an error if the reason is unknown, the store cannot be listed,
    /// or strict mode sees a tile generation failure.
    pub async fn reprocess(&self, store: &ResultStore, reason: &str, shard: Shard) -> Result<RunSummary> {
        let ids = match reason {
            NO_REASON => store.list_by_outcome(Some(false), Some(NO_REASON)).await?,
            label => {
                let outcome: Outcome = label.parse().map_err(Error::config)?;
                if outcome.is_success() {
                    store.list_by_outcome(Some(true), None).await?
                } else {
                    store.list_by_outcome(Some(false), Some(outcome.as_label())).await?
                }
            }
        };
        self.drive(store, ids, shard, "reprocess").await
    }

    async fn drive(&self, store: &ResultStore, ids: Vec<String>, shard: Shard, op: &str) -> Result<RunSummary> {
        let ids: Vec<String> = ids.into_iter().filter(|id| shard.owns(id)).collect();
        let mut summary = RunSummary {
            total: ids.len(),
            ..RunSummary::default()
        };
        tracing::info!(op, total = ids.len(), shard = ?shard, "fabric batch planned");

        for (batch_index, batch) in ids.chunks(self.config.batch_size).enumerate() {
            let span = batch_span(op, batch_index, batch.len());
            let result = async {
                let credentials = match CredentialSession::start(Arc::clone(&self.credentials)).await {
                    Ok(credentials) => credentials,
                    Err(e) => {
                        tracing::warn!(error = %e, "credential acquisition failed; skipping batch");
                        self.metrics.record_page_failed();
                        summary.failed_pages += 1;
                        return Ok(());
                    }
                };
                let items = batch
                    .iter()
                    .map(|id| WorkItem::new(batch_index, CollectionRef::new(id.clone())))
                    .collect();
                let reports = self.execute_ids(items, credentials).await;
                self.persist(Some(store), &reports, &mut summary).await;
                self.metrics.record_page_processed();
                tracing::info!(processed = summary.processed, total = summary.total, "batch complete");
                self.check_strict(&reports)
            }
            .instrument(span)
            .await;
            result?;
        }

        tracing::info!(
            op,
            processed = summary.processed,
            successes = summary.successes(),
            failures = summary.failures(),
            persist_failures = summary.persist_failures,
            "fabric batch complete"
        );
        Ok(summary)
    }

    async fn single(&self, item: WorkItem, unit: SingleUnit) -> Result<Assessment> {
        let credentials = CredentialSession::start(Arc::clone(&self.credentials)).await?;
        let stages = self.stages.clone();
        let reports = executor::run(vec![item], self.config.executor_options(), move |item: WorkItem| {
            let stages = stages.clone();
            let credentials = credentials.clone();
            let unit = unit.clone();
            async move {
                Ok(match unit {
                    SingleUnit::Collection => stages.assess(&item.collection, &credentials).await,
                    SingleUnit::Granule(granule) => {
                        stages.assess_granule(&item.collection, &granule, &credentials).await
                    }
                })
            }
        })
        .await;
        reports
            .into_iter()
            .next()
            .map(|r| r.assessment)
            .ok_or_else(|| {
                Error::Core(tilecheck_core::Error::Internal {
                    message: "executor returned no report".into(),
                })
            })
    }

    /// Assesses one collection by concept id.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection does not exist or the catalog fails.
    pub async fn assess_collection(&self, concept_id: &str) -> Result<Assessment> {
        let collection = self
            .stages
            .catalog
            .collection_by_id(concept_id)
            .await?
            .ok_or_else(|| Error::catalog(format!("collection {concept_id} not found")))?;
        self.single(WorkItem::new(0, collection), SingleUnit::Collection).await
    }

    /// Assesses the collection of one granule, using that granule instead of a
    /// random sample.
    ///
    /// # Errors
    ///
    /// Returns an error if the granule does not exist or the catalog fails.
    pub async fn assess_granule(&self, granule_id: &str) -> Result<Assessment> {
        let granule = self
            .stages
            .catalog
            .granule_by_id(granule_id)
            .await?
            .ok_or_else(|| Error::catalog(format!("granule {granule_id} not found")))?;
        let collection = self
            .stages
            .catalog
            .collection_by_id(&granule.collection_concept_id)
            .await?
            .unwrap_or_else(|| CollectionRef::new(granule.collection_concept_id.clone()));
        self.single(WorkItem::new(0, collection), SingleUnit::Granule(Box::new(granule)))
            .await
    }
}

#[derive(Clone)]
enum SingleUnit {
    Collection,
    Granule(Box<GranuleRef>),
}

/// Writes every stored result to `sink`, sorted by concept id.
///
/// # Errors
///
/// Returns an error if the store cannot be listed or the sink fails.
pub async fn export(store: &ResultStore, sink: &mut dyn PageSink) -> Result<usize> {
    let mut results = store.all_results().await?;
    results.sort_by(|a, b| a.collection_concept_id.cmp(&b.collection_concept_id));
    sink.write_page(&results)?;
    tracing::info!(rows = results.len(), "results exported");
    Ok(results.len())
}
