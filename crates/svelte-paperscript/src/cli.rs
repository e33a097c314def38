//! CLI argument parsing.

use camino::Utf8PathBuf;
use clap::{Parser, ValueEnum};

/// Preprocess Svelte components written in PaperScript.
#[derive(Debug, Parser)]
#[command(name = "svelte-paperscript")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Working directory to scan
    #[arg(long, default_value = ".")]
    pub workspace: Utf8PathBuf,

    /// Directory for transformed components, relative to the workspace
    #[arg(long = "out-dir", default_value = ".svelte-paperscript")]
    pub out_dir: Utf8PathBuf,

    /// Do not produce source maps, overriding svelte.config.js
    #[arg(long = "no-source-map")]
    pub no_source_map: bool,

    /// Glob patterns to ignore
    #[arg(long)]
    pub ignore: Vec<String>,

    /// Output format
    #[arg(long, value_enum, default_value = "human")]
    pub output: OutputFormat,

    /// Print transformed components to stdout instead of writing them
    #[arg(long)]
    pub emit: bool,

    /// Watch mode
    #[arg(long)]
    pub watch: bool,

    /// Preserve watch output (don't clear screen)
    #[arg(long = "preserveWatchOutput")]
    pub preserve_watch_output: bool,

    /// Number of bun compiler workers (defaults to available parallelism)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Show the bun version and path used to compile PaperScript
    #[arg(long = "bun-version")]
    pub bun_version: bool,
}

/// Output format options.
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    #[default]
    Human,
    /// JSON output
    Json,
}

impl Args {
    /// Source map setting forced from the command line, if any.
    pub fn source_map_override(&self) -> Option<bool> {
        self.no_source_map.then_some(false)
    }

    /// Number of bun workers to start.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}
