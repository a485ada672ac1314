//! Status command - count stored results.

use anyhow::{Context, Result};
use owo_colors::OwoColorize;

use super::open_store;
use crate::{Config, OutputFormat};

/// Execute the status command.
///
/// Lists result keys only; no result body is read.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or listed.
pub async fn execute(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let status = store.status().await.context("Failed to list results")?;

    match config.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        OutputFormat::Text => {
            println!("Pending:   {}", status.pending.yellow());
            println!("Processed: {}", status.processed);
            println!("  Succeeded: {}", status.successful.green());
            // successes and unprobed results share reason=none
            let unprobed = status
                .by_reason
                .get("none")
                .copied()
                .unwrap_or(0)
                .saturating_sub(status.successful);
            println!("  Unprobed:  {}", unprobed.dimmed());
            for (reason, count) in status.by_reason.iter().filter(|(r, _)| r.as_str() != "none") {
                println!("  {}: {count}", format_reason(reason));
            }
        }
        OutputFormat::Table => print_counts(status.by_reason.iter().map(|(k, v)| (k.as_str(), *v))),
    }

    Ok(())
}

/// Prints `(label, count)` pairs as a table.
pub fn print_counts<'a>(counts: impl Iterator<Item = (&'a str, usize)>) {
    use tabled::{Table, Tabled};

    #[derive(Tabled)]
    struct CountRow {
        #[tabled(rename = "Outcome")]
        outcome: String,
        #[tabled(rename = "Count")]
        count: usize,
    }

    let rows: Vec<_> = counts
        .map(|(outcome, count)| CountRow {
            outcome: outcome.to_string(),
            count,
        })
        .collect();

    if rows.is_empty() {
        println!("No results found");
    } else {
        println!("{}", Table::new(rows));
    }
}

fn format_reason(reason: &str) -> String {
    match reason {
        "timeout" | "tile_generation_failed" => reason.red().to_string(),
        "none" => reason.dimmed().to_string(),
        _ => reason.to_string(),
    }
}
