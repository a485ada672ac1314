//! Run command - pool run over the whole catalog.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tilecheck_flow::export::ReportWriter;

use super::{build_pipeline, open_store, print_summary};
use crate::Config;

/// Arguments for the run command.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Parquet report path (defaults to `TILECHECK_OUTPUT`).
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// Also write every result to the result store.
    #[arg(long)]
    pub persist: bool,
}

/// Execute the run command.
///
/// # Errors
///
/// Returns an error if the catalog is unreachable, the report cannot be
/// written, or strict mode aborts.
pub async fn execute(args: RunArgs, config: &Config) -> Result<()> {
    let pipeline = build_pipeline(config)?;
    let store = if args.persist {
        Some(open_store(config)?)
    } else {
        None
    };

    let path = config.report_path(args.output.as_ref());
    let mut writer = ReportWriter::create(&path)
        .with_context(|| format!("Failed to create report at {}", path.display()))?;

    let outcome = pipeline.run(store.as_ref(), &mut writer).await;
    // rows already appended stay readable even when the run aborts
    let rows = writer.finish().context("Failed to finalize report")?;
    let summary = outcome.context("Run aborted")?;

    print_summary(&summary, config)?;
    tracing::info!(rows, path = %path.display(), "report written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args_parsing() {
        use clap::Parser;

        #[derive(Parser)]
        struct TestCli {
            #[command(flatten)]
            args: RunArgs,
        }

        let cli = TestCli::parse_from(["test", "--output", "out.parquet", "--persist"]);
        assert_eq!(cli.args.output, Some(PathBuf::from("out.parquet")));
        assert!(cli.args.persist);

        let cli = TestCli::parse_from(["test"]);
        assert!(cli.args.output.is_none());
        assert!(!cli.args.persist);
    }
}
