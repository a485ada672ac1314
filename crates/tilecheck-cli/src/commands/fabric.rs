//! Store-backed commands - setup, process, reprocess and export.
//!
//! `setup` marks every catalog collection pending; any number of `process`
//! invocations (optionally sharded) then drain the pending set, each unit
//! writing its own result object.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tilecheck_flow::export::ReportWriter;
use tilecheck_flow::pipeline::{self, Shard};

use super::{build_pipeline, open_store, print_summary};
use crate::{Config, OutputFormat};

/// Which slice of the pending set to work on.
#[derive(Debug, Args)]
pub struct ShardArgs {
    /// Index of this shard.
    #[arg(long, default_value = "0")]
    pub shard_index: usize,

    /// Total number of shards.
    #[arg(long, default_value = "1")]
    pub shard_count: usize,
}

impl ShardArgs {
    fn shard(&self) -> Result<Shard> {
        Shard::new(self.shard_index, self.shard_count).context("Invalid shard")
    }
}

/// Arguments for the reprocess command.
#[derive(Debug, Args)]
pub struct ReprocessArgs {
    /// Outcome label to re-drive (`success`, a failure label, or `none`).
    #[arg(long)]
    pub reason: String,

    /// Shard selection.
    #[command(flatten)]
    pub shard: ShardArgs,
}

/// Arguments for the export command.
#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Parquet report path (defaults to `TILECHECK_OUTPUT`).
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

/// Execute the setup command.
///
/// # Errors
///
/// Returns an error if the catalog is unreachable or the store cannot be opened.
pub async fn setup(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let summary = build_pipeline(config)?
        .setup(&store)
        .await
        .context("Setup failed")?;

    match config.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Text | OutputFormat::Table => {
            println!("Collections: {}", summary.total);
            println!("  Marked pending:  {}", summary.marked);
            println!("  Already pending: {}", summary.already_pending);
            if summary.failed_pages > 0 {
                println!("  Skipped pages:   {}", summary.failed_pages);
            }
            if summary.persist_failures > 0 {
                println!("  Unsaved markers: {}", summary.persist_failures);
            }
        }
    }
    Ok(())
}

/// Execute the process command.
///
/// # Errors
///
/// Returns an error if the shard is invalid, the store cannot be listed, or
/// strict mode aborts.
pub async fn process(args: ShardArgs, config: &Config) -> Result<()> {
    let shard = args.shard()?;
    let store = open_store(config)?;
    let summary = build_pipeline(config)?
        .process(&store, shard)
        .await
        .context("Processing failed")?;
    print_summary(&summary, config)
}

/// Execute the reprocess command.
///
/// # Errors
///
/// Returns an error if the reason is unknown, the shard is invalid, the
/// store cannot be listed, or strict mode aborts.
pub async fn reprocess(args: ReprocessArgs, config: &Config) -> Result<()> {
    let shard = args.shard.shard()?;
    let store = open_store(config)?;
    let summary = build_pipeline(config)?
        .reprocess(&store, &args.reason, shard)
        .await
        .with_context(|| format!("Reprocessing {} failed", args.reason))?;
    print_summary(&summary, config)
}

/// Execute the export command.
///
/// # Errors
///
/// Returns an error if the store cannot be listed or the report cannot be written.
pub async fn export(args: ExportArgs, config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let path = config.report_path(args.output.as_ref());
    let mut writer = ReportWriter::create(&path)
        .with_context(|| format!("Failed to create report at {}", path.display()))?;

    pipeline::export(&store, &mut writer).await.context("Export failed")?;
    let rows = writer.finish().context("Failed to finalize report")?;

    println!("Exported {rows} results to {}", path.display());
    Ok(())
}
