//! Single-target commands - assess one collection or one granule.

use anyhow::{Context, Result};
use clap::Args;
use owo_colors::OwoColorize;
use tilecheck_flow::model::Assessment;

use super::build_pipeline;
use crate::{Config, OutputFormat};

/// Arguments naming one catalog record.
#[derive(Debug, Args)]
pub struct TargetArgs {
    /// Concept id of the collection or granule.
    pub id: String,
}

/// Assess the collection `args.id`.
///
/// # Errors
///
/// Returns an error if the collection is not in the catalog.
pub async fn collection(args: TargetArgs, config: &Config) -> Result<()> {
    let assessment = build_pipeline(config)?
        .assess_collection(&args.id)
        .await
        .with_context(|| format!("Failed to assess collection {}", args.id))?;
    print_assessment(&assessment, config)
}

/// Assess the collection of granule `args.id` through that granule.
///
/// # Errors
///
/// Returns an error if the granule is not in the catalog.
pub async fn granule(args: TargetArgs, config: &Config) -> Result<()> {
    let assessment = build_pipeline(config)?
        .assess_granule(&args.id)
        .await
        .with_context(|| format!("Failed to assess granule {}", args.id))?;
    print_assessment(&assessment, config)
}

fn print_assessment(a: &Assessment, config: &Config) -> Result<()> {
    match config.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(a)?);
        }
        OutputFormat::Text | OutputFormat::Table => {
            let label = a.outcome_label();
            let outcome = if a.is_success() {
                label.green().to_string()
            } else if a.outcome.is_some() {
                label.red().to_string()
            } else {
                label.dimmed().to_string()
            };

            println!("Collection: {}", a.collection_concept_id);
            println!("Outcome:    {outcome}");
            if let Some(detail) = &a.detail {
                println!("Detail:     {detail}");
            }
            if let Some(granule) = &a.granule_id {
                println!("Granule:    {granule}");
            }
            if let Some(url) = &a.data_url {
                println!("Data URL:   {url}");
            }
            if let Some(backend) = a.backend {
                println!("Backend:    {backend}");
            }
            if !a.data_variables.is_empty() {
                println!("Fields:     {}", a.data_variables.join(", "));
            }
            if let Some(tiles) = &a.tiles_url {
                println!("Tiles URL:  {tiles}");
            }
        }
    }
    Ok(())
}
