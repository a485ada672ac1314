//! # tilecheck-cli
//!
//! Command-line driver for catalog-wide tiling compatibility checks.
//!
//! ## Commands
//!
//! - `tilecheck run` - Page the catalog in-process and write a parquet report
//! - `tilecheck collection <ID>` - Assess one collection
//! - `tilecheck granule <ID>` - Assess one collection through a given granule
//! - `tilecheck setup` - Mark every catalog collection pending in the store
//! - `tilecheck process` - Assess pending collections (optionally one shard)
//! - `tilecheck reprocess --reason R` - Re-drive collections by outcome
//! - `tilecheck status` - Count stored results by outcome
//! - `tilecheck export` - Write every stored result to a parquet report
//!
//! ## Configuration
//!
//! Settings come from `TILECHECK_*` environment variables over built-in
//! defaults; command-line flags override both:
//!
//! - `TILECHECK_CATALOG_URL` - Catalog search endpoint
//! - `TILECHECK_TILER_ENDPOINT` - Tiling service endpoint
//! - `TILECHECK_STORE` - Result store location (`s3://bucket`, a path, or `memory://`)
//! - `EARTHDATA_TOKEN` or `EARTHDATA_USERNAME`/`EARTHDATA_PASSWORD` - Data access credentials

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
// CLI uses print! macros intentionally
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]

pub mod commands;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tilecheck_core::observability::LogFormat;
use tilecheck_flow::config::RunConfig;
use tilecheck_flow::model::AccessMode;

/// tilecheck - Catalog-wide tiling compatibility checks.
#[derive(Debug, Parser)]
#[command(name = "tilecheck")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Catalog search endpoint.
    #[arg(long, global = true)]
    pub catalog_url: Option<String>,

    /// Tiling service endpoint.
    #[arg(long, global = true)]
    pub tiler_endpoint: Option<String>,

    /// Result store location.
    #[arg(long, global = true)]
    pub store: Option<String>,

    /// Key prefix inside the result store.
    #[arg(long, global = true)]
    pub store_prefix: Option<String>,

    /// Preferred link class (direct or external).
    #[arg(long, global = true)]
    pub access_mode: Option<AccessMode>,

    /// Collections per catalog page.
    #[arg(long, global = true)]
    pub page_size: Option<usize>,

    /// Stop after this many collections.
    #[arg(long, global = true)]
    pub total: Option<usize>,

    /// Concurrent units.
    #[arg(long, short = 'j', global = true)]
    pub concurrency: Option<usize>,

    /// Units per fabric batch.
    #[arg(long, global = true)]
    pub batch_size: Option<usize>,

    /// Deadline per unit, in seconds.
    #[arg(long, global = true)]
    pub unit_timeout: Option<u64>,

    /// Deadline per dataset open, in seconds.
    #[arg(long, global = true)]
    pub open_timeout: Option<u64>,

    /// Abort on the first tile generation failure.
    #[arg(long, global = true)]
    pub strict: bool,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Log format (pretty or json).
    #[arg(long, global = true, env = "TILECHECK_LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Get the effective configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment holds malformed settings or the
    /// merged configuration is invalid.
    pub fn config(&self) -> Result<Config> {
        let base = RunConfig::from_env().context("Failed to read TILECHECK_* environment")?;
        let run = self.apply(base);
        run.validate().context("Invalid configuration")?;
        Ok(Config {
            run,
            format: self.format.clone(),
        })
    }

    fn apply(&self, mut run: RunConfig) -> RunConfig {
        if let Some(url) = &self.catalog_url {
            run.catalog_url.clone_from(url);
        }
        if let Some(endpoint) = &self.tiler_endpoint {
            run.tiler_endpoint.clone_from(endpoint);
        }
        if let Some(store) = &self.store {
            run.store_location.clone_from(store);
        }
        if let Some(prefix) = &self.store_prefix {
            run.store_prefix.clone_from(prefix);
        }
        if let Some(mode) = self.access_mode {
            run.access_mode = mode;
        }
        if let Some(page_size) = self.page_size {
            run.page_size = page_size;
        }
        if self.total.is_some() {
            run.total = self.total;
        }
        if let Some(concurrency) = self.concurrency {
            run.concurrency = concurrency;
        }
        if let Some(batch_size) = self.batch_size {
            run.batch_size = batch_size;
        }
        if let Some(secs) = self.unit_timeout {
            run.unit_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.open_timeout {
            run.open_timeout = Duration::from_secs(secs);
        }
        run.strict |= self.strict;
        run
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Page the catalog and assess every collection in-process.
    Run(commands::run::RunArgs),
    /// Assess one collection by concept id.
    Collection(commands::assess::TargetArgs),
    /// Assess a collection through one granule.
    Granule(commands::assess::TargetArgs),
    /// Mark every catalog collection pending in the result store.
    Setup,
    /// Assess pending collections.
    Process(commands::fabric::ShardArgs),
    /// Re-drive collections whose stored result carries a reason.
    Reprocess(commands::fabric::ReprocessArgs),
    /// Count stored results by outcome.
    Status,
    /// Write every stored result to a parquet report.
    Export(commands::fabric::ExportArgs),
}

/// Output format.
#[derive(Debug, Clone, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output.
    Json,
    /// Table output.
    Table,
}

/// CLI configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pipeline settings.
    pub run: RunConfig,
    /// Output format.
    pub format: OutputFormat,
}

impl Config {
    /// Report path, overridden by `output` when given.
    #[must_use]
    pub fn report_path(&self, output: Option<&PathBuf>) -> PathBuf {
        output.cloned().unwrap_or_else(|| self.run.output.clone())
    }
}
