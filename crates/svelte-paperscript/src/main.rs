//! svelte-paperscript: Svelte preprocessor for PaperScript components.

mod cli;
mod config;
mod orchestrator;
mod output;

use clap::Parser;
use cli::Args;
use miette::{IntoDiagnostic, Result};
use paperscript_runner::PaperScriptRunner;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    // Handle bun version command
    if args.bun_version {
        match PaperScriptRunner::get_bun_version(Some(args.workspace.as_path())).await {
            Ok((version, path)) => {
                println!("bun {}", version);
                println!("path: {}", path);
                if let Some(cache_dir) = PaperScriptRunner::get_cache_dir() {
                    println!("cache: {}", cache_dir);
                }
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let summary = orchestrator::run(args).await.into_diagnostic()?;
    if summary.error_count > 0 {
        std::process::exit(1);
    }
    Ok(())
}
