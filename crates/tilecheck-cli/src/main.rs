//! tilecheck CLI - catalog-wide tiling compatibility checks.
//!
//! The main entry point for the `tilecheck` binary.

use anyhow::Result;
use clap::Parser;
use tilecheck_core::observability::init_logging;

use tilecheck_cli::{commands, Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);
    let config = cli.config()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.run.concurrency.clamp(1, 64))
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match cli.command {
            Commands::Run(args) => commands::run::execute(args, &config).await,
            Commands::Collection(args) => commands::assess::collection(args, &config).await,
            Commands::Granule(args) => commands::assess::granule(args, &config).await,
            Commands::Setup => commands::fabric::setup(&config).await,
            Commands::Process(args) => commands::fabric::process(args, &config).await,
            Commands::Reprocess(args) => commands::fabric::reprocess(args, &config).await,
            Commands::Status => commands::status::execute(&config).await,
            Commands::Export(args) => commands::fabric::export(args, &config).await,
        }
    })
}
