//! # tilecheck-flow
//!
//! Catalog-scale probe pipeline deciding, collection by collection, whether a
//! tiling service can render a dataset.
//!
//! Every collection becomes one [`Assessment`](model::Assessment) with an
//! [`Outcome`](outcome::Outcome) from a closed taxonomy:
//!
//! - **Classify**: sample a granule, resolve its link, validate its format,
//!   pick a reader backend, open it and list its fields
//! - **Probe**: render one tile at `0/0/0` for the chosen field
//! - **Execute**: run units on a bounded pool with a per-unit deadline that
//!   does not rely on the unit cooperating
//! - **Persist**: record pending markers and outcome-partitioned results on
//!   object storage so runs resume and re-drive by outcome
//!
//! ## Guarantees
//!
//! - **Total**: every scheduled collection yields exactly one assessment
//! - **Resumable**: a result object is the only record of "processed"
//! - **Write-once per run**: reprocessing replaces a result, never merges
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use tilecheck_flow::catalog::memory::MemoryCatalog;
//! use tilecheck_flow::config::RunConfig;
//! use tilecheck_flow::credentials::StaticCredentials;
//! use tilecheck_flow::error::Result;
//! use tilecheck_flow::opener::{OpenerSet, StaticOpener};
//! use tilecheck_flow::pipeline::Pipeline;
//! use tilecheck_flow::probe::StaticTileBackend;
//!
//! # async fn example() -> Result<()> {
//! let pipeline = Pipeline::new(
//!     Arc::new(MemoryCatalog::new()),
//!     OpenerSet::uniform(Arc::new(StaticOpener::new())),
//!     Arc::new(StaticTileBackend::new()),
//!     Arc::new(StaticCredentials::default()),
//!     RunConfig::default(),
//! )?;
//!
//! let mut rows = Vec::new();
//! let summary = pipeline.run(None, &mut rows).await?;
//! assert_eq!(summary.processed, rows.len());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod catalog;
pub mod classify;
pub mod config;
pub mod credentials;
pub mod error;
pub mod executor;
pub mod export;
pub mod formats;
pub mod metrics;
pub mod model;
pub mod opener;
pub mod outcome;
pub mod partition;
pub mod pipeline;
pub mod probe;
pub mod store;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::catalog::{CatalogClient, CollectionQuery, GranuleQuery, SearchPage};
    pub use crate::classify::{Classifier, ClassifierOptions};
    pub use crate::config::RunConfig;
    pub use crate::credentials::{CredentialProvider, CredentialSession, Credentials};
    pub use crate::error::{Error, Result};
    pub use crate::executor::{ExecutorOptions, UnitReport, UnitState};
    pub use crate::metrics::FlowMetrics;
    pub use crate::model::{AccessMode, Assessment, Backend, CollectionRef, GranuleRef, TileRequest, WorkItem};
    pub use crate::opener::{DatasetOpener, OpenerSet};
    pub use crate::outcome::Outcome;
    pub use crate::partition::{plan, PageDescriptor};
    pub use crate::pipeline::{PageSink, Pipeline, RunSummary, Shard};
    pub use crate::probe::{ProbeRunner, TileBackend};
    pub use crate::store::ResultStore;
}
