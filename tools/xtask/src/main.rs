//! Workspace automation tasks.
//!
//! Run with: `cargo xtask <command>`

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

const CRATE_PREFIX: &str = "tilecheck-";
const REQUIRED_ATTRS: &[&str] = &["#![forbid(unsafe_code)]", "#![deny(missing_docs)]"];

#[derive(Parser)]
#[command(name = "xtask", about = "tilecheck workspace automation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all CI checks locally
    Ci,
    /// Validate workspace conventions
    Lint,
    /// Generate coverage report
    Coverage,
    /// Exercise the binary against an in-memory store
    Smoke,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ci => run_ci(),
        Commands::Lint => run_lint(),
        Commands::Coverage => run_coverage(),
        Commands::Smoke => run_smoke(),
    }
}

fn run_ci() -> Result<()> {
    println!("Running CI checks...\n");

    run_cmd("cargo", &["fmt", "--check"])?;
    run_cmd("cargo", &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"])?;
    run_cmd("cargo", &["test", "--workspace"])?;
    run_cmd("cargo", &["doc", "--workspace", "--no-deps"])?;
    run_lint()?;

    println!("\nAll CI checks passed!");
    Ok(())
}

fn run_lint() -> Result<()> {
    println!("Validating workspace conventions...\n");

    for entry in std::fs::read_dir("crates")? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(CRATE_PREFIX) {
            anyhow::bail!("Crate '{name}' does not follow {CRATE_PREFIX}* naming");
        }

        let lib = entry.path().join("src/lib.rs");
        if lib.exists() {
            check_crate_attrs(&name, &lib)?;
        }
    }

    println!("All conventions validated!");
    Ok(())
}

fn check_crate_attrs(name: &str, lib: &Path) -> Result<()> {
    let source =
        std::fs::read_to_string(lib).with_context(|| format!("Failed to read {}", lib.display()))?;
    for attr in REQUIRED_ATTRS {
        if !source.contains(attr) {
            anyhow::bail!("Crate '{name}' is missing {attr} in {}", lib.display());
        }
    }
    Ok(())
}

fn run_coverage() -> Result<()> {
    run_cmd("cargo", &["llvm-cov", "--workspace", "--html"])?;
    println!("\nCoverage report: target/llvm-cov/html/index.html");
    Ok(())
}

fn run_smoke() -> Result<()> {
    run_cmd(
        "cargo",
        &["run", "-q", "-p", "tilecheck-cli", "--", "--store", "memory://", "--format", "json", "status"],
    )?;
    println!("\nSmoke check passed!");
    Ok(())
}

fn run_cmd(cmd: &str, args: &[&str]) -> Result<()> {
    println!("$ {} {}", cmd, args.join(" "));
    let status = Command::new(cmd)
        .args(args)
        .status()
        .with_context(|| format!("Failed to run: {} {}", cmd, args.join(" ")))?;

    if !status.success() {
        anyhow::bail!("Command failed: {} {}", cmd, args.join(" "));
    }
    Ok(())
}
