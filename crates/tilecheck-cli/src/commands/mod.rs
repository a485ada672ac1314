//! Subcommand implementations and the wiring they share.

pub mod assess;
pub mod fabric;
pub mod run;
pub mod status;

use std::sync::Arc;

use anyhow::{Context, Result};
use tilecheck_core::storage::open_backend;
use tilecheck_flow::catalog::cmr::CmrClient;
use tilecheck_flow::credentials::EnvCredentials;
use tilecheck_flow::opener::gdal::GdalInfoOpener;
use tilecheck_flow::opener::OpenerSet;
use tilecheck_flow::pipeline::{Pipeline, RunSummary};
use tilecheck_flow::probe::titiler::TitilerBackend;
use tilecheck_flow::store::ResultStore;

use crate::{Config, OutputFormat};

/// Builds a pipeline over the live catalog, `gdalinfo` and the tiling service.
///
/// # Errors
///
/// Returns an error if an HTTP client cannot be built or the configuration is invalid.
pub fn build_pipeline(config: &Config) -> Result<Pipeline> {
    let run = &config.run;
    let catalog = CmrClient::new(run.catalog_url.clone(), run.request_timeout)
        .context("Failed to create catalog client")?;
    let tiles = TitilerBackend::new(run.tiler_endpoint.clone(), run.request_timeout)
        .context("Failed to create tiler client")?;
    let credentials =
        EnvCredentials::new(run.request_timeout).context("Failed to create credentials client")?;

    Pipeline::new(
        Arc::new(catalog),
        OpenerSet::uniform(Arc::new(GdalInfoOpener::default())),
        Arc::new(tiles),
        Arc::new(credentials),
        run.clone(),
    )
    .context("Failed to build pipeline")
}

/// Opens the configured result store.
///
/// # Errors
///
/// Returns an error if the location cannot be opened or the prefix is invalid.
pub fn open_store(config: &Config) -> Result<ResultStore> {
    let backend = open_backend(&config.run.store_location)
        .with_context(|| format!("Failed to open store at {}", config.run.store_location))?;
    ResultStore::new(backend, &config.run.store_prefix).context("Invalid store prefix")
}

/// Prints a run summary in the configured format.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn print_summary(summary: &RunSummary, config: &Config) -> Result<()> {
    use owo_colors::OwoColorize;

    match config.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(summary)?);
        }
        OutputFormat::Text => {
            println!("Processed: {}/{}", summary.processed, summary.total);
            println!("  Succeeded: {}", summary.successes().to_string().green());
            if summary.failures() > 0 {
                println!("  Failed:    {}", summary.failures().to_string().red());
            } else {
                println!("  Failed:    {}", summary.failures());
            }
            println!("  Unprobed:  {}", summary.unprobed());
            println!("  Timed out: {}", summary.timed_out);
            if summary.failed_pages > 0 {
                println!("  Skipped pages: {}", summary.failed_pages.to_string().yellow());
            }
            if summary.persist_failures > 0 {
                println!("  Unsaved results: {}", summary.persist_failures.to_string().yellow());
            }
        }
        OutputFormat::Table => {
            status::print_counts(summary.by_outcome.iter().map(|(k, v)| (k.as_str(), *v)));
        }
    }
    Ok(())
}
