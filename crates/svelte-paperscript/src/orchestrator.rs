//! Main orchestration logic.

use crate::cli::Args;
use crate::config::{SvelteConfig, CONFIG_FILES};
use crate::output::{FileReport, RunSummary};
use camino::{Utf8Path, Utf8PathBuf};
use globset::{Glob, GlobSet, GlobSetBuilder};
use paperscript_runner::{CompileInput, PaperScriptRunner, RunnerError};
use paperscript_transformer::markup::is_paperscript;
use paperscript_transformer::{
    paperscript_preprocess, script_blocks, CompileOptions, CompiledScripts, Host, HostOutput,
    PaperscriptOptions, PreprocessorStage, SourceMapV3,
};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use walkdir::WalkDir;

/// Orchestration errors.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Failed to read file.
    #[error("failed to read {0}")]
    ReadFailed(String),

    /// Failed to write an output file.
    #[error("failed to write {0}")]
    WriteFailed(String),

    /// Invalid glob pattern.
    #[error("invalid glob pattern: {0}")]
    InvalidGlob(String),

    /// Watch error.
    #[error("watch error: {0}")]
    WatchFailed(String),

    /// The PaperScript compiler could not be run.
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// Default ignore patterns, relative to the workspace.
const DEFAULT_IGNORES: &[&str] = &[
    "**/node_modules/**",
    "**/dist/**",
    "**/.svelte-kit/**",
    "**/.svelte-paperscript/**",
];

/// A component file that declares a PaperScript script.
struct SourceFile {
    path: Utf8PathBuf,
    relative: String,
    source: String,
}

/// One entry of a `<file>.map.json` file.
#[derive(Debug, Serialize)]
struct MapEntry<'a> {
    stage: &'a str,
    hook: &'a str,
    map: &'a SourceMapV3,
}

/// Runs the preprocessor over the workspace.
pub async fn run(args: Args) -> Result<RunSummary, OrchestratorError> {
    let workspace = resolve_path(&current_dir(), &args.workspace);

    if args.watch {
        run_watch_mode(&args, &workspace).await
    } else {
        run_once(&args, &workspace).await
    }
}

fn current_dir() -> Utf8PathBuf {
    std::env::current_dir()
        .ok()
        .and_then(|p| Utf8PathBuf::try_from(p).ok())
        .unwrap_or_default()
}

/// Expands `~` and resolves `path` against `base` when relative.
fn resolve_path(base: &Utf8Path, path: &Utf8Path) -> Utf8PathBuf {
    let expanded = Utf8PathBuf::from(shellexpand::tilde(path.as_str()).as_ref());
    if expanded.is_relative() {
        base.join(expanded)
    } else {
        expanded
    }
}

fn build_ignore_set(
    patterns: &[String],
    out_dir: Option<&Utf8Path>,
) -> Result<GlobSet, OrchestratorError> {
    let mut ignore_builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| OrchestratorError::InvalidGlob(e.to_string()))?;
        ignore_builder.add(glob);
    }

    let out_dir_pattern = out_dir.map(|dir| format!("{dir}/**"));
    for pattern in DEFAULT_IGNORES
        .iter()
        .copied()
        .chain(out_dir_pattern.as_deref())
    {
        if let Ok(glob) = Glob::new(pattern) {
            ignore_builder.add(glob);
        }
    }

    ignore_builder
        .build()
        .map_err(|e| OrchestratorError::InvalidGlob(e.to_string()))
}

/// Finds component files under `workspace`, sorted by path.
fn discover_files(workspace: &Utf8Path, extensions: &[&str], ignore: &GlobSet) -> Vec<Utf8PathBuf> {
    let mut files: Vec<Utf8PathBuf> = WalkDir::new(workspace)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| Utf8PathBuf::try_from(e.into_path()).ok())
        .filter(|p| has_extension(p.file_name().unwrap_or(""), extensions))
        .filter(|p| {
            let relative = p.strip_prefix(workspace).unwrap_or(p.as_path());
            !ignore.is_match(relative.as_str())
        })
        .collect();
    files.sort();
    files
}

fn has_extension(file_name: &str, extensions: &[&str]) -> bool {
    extensions.iter().any(|ext| file_name.ends_with(ext))
}

/// What a watched path change means for the next run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchChange {
    /// A component file outside the output directory.
    Component,
    /// A svelte config file at the workspace root.
    Config,
    Ignored,
}

fn classify_change(
    path: &Path,
    workspace: &Utf8Path,
    extensions: &[&str],
    out_dir: &Utf8Path,
) -> WatchChange {
    // Our own output lives in the workspace too.
    if path.starts_with(out_dir.as_std_path()) {
        return WatchChange::Ignored;
    }
    let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
        return WatchChange::Ignored;
    };
    if path.parent() == Some(workspace.as_std_path()) && CONFIG_FILES.contains(&file_name) {
        WatchChange::Config
    } else if has_extension(file_name, extensions) {
        WatchChange::Component
    } else {
        WatchChange::Ignored
    }
}

/// Runs a single preprocessing pass.
async fn run_once(args: &Args, workspace: &Utf8Path) -> Result<RunSummary, OrchestratorError> {
    let start = Instant::now();
    let config = SvelteConfig::load(workspace);
    let options = PaperscriptOptions {
        source_map: config.source_map(args.source_map_override()),
    };
    let out_dir = resolve_path(workspace, &args.out_dir);
    let ignore = build_ignore_set(&args.ignore, out_dir.strip_prefix(workspace).ok())?;
    let files = discover_files(workspace, &config.file_extensions(), &ignore);
    tracing::debug!(files = files.len(), source_map = options.source_map, "scanned workspace");

    let read: Vec<Result<Option<SourceFile>, FileReport>> = files
        .par_iter()
        .map(|path| {
            let relative = path
                .strip_prefix(workspace)
                .unwrap_or(path.as_path())
                .to_string();
            match fs::read_to_string(path) {
                Ok(source) if is_paperscript(&source) => Ok(Some(SourceFile {
                    path: path.clone(),
                    relative,
                    source,
                })),
                Ok(_) => Ok(None),
                Err(e) => Err(FileReport::error(
                    relative,
                    OrchestratorError::ReadFailed(format!("{path}: {e}")).to_string(),
                )),
            }
        })
        .collect();

    let mut reports = Vec::new();
    let mut sources = Vec::new();
    for entry in read {
        match entry {
            Ok(Some(file)) => sources.push(file),
            Ok(None) => {}
            Err(report) => reports.push(report),
        }
    }

    let compiled = compile_scripts(args, workspace, &sources, options).await?;
    let stages = paperscript_preprocess(options, Arc::new(compiled));

    let processed: Vec<(FileReport, Option<String>)> = sources
        .par_iter()
        .map(|file| process_file(file, &stages, &out_dir, args.emit))
        .collect();

    for (report, emitted) in processed {
        if let Some(code) = emitted {
            println!("=== {} ===\n{}", report.filename, code);
        }
        reports.push(report);
    }

    let summary = RunSummary::new(files.len(), reports);
    println!("{}", summary.render(args.output));
    tracing::debug!(elapsed = ?start.elapsed(), "run finished");

    Ok(summary)
}

/// Compiles every PaperScript body up front with the bun runner.
async fn compile_scripts(
    args: &Args,
    workspace: &Utf8Path,
    sources: &[SourceFile],
    options: PaperscriptOptions,
) -> Result<CompiledScripts, OrchestratorError> {
    let mut seen = HashSet::new();
    let mut inputs = Vec::new();
    for file in sources {
        for block in script_blocks(&file.source) {
            let body = &file.source[block.body];
            if seen.insert(body) {
                inputs.push(CompileInput {
                    filename: file.path.clone(),
                    source: body.to_string(),
                });
            }
        }
    }

    let mut compiled = CompiledScripts::new();
    if inputs.is_empty() {
        return Ok(compiled);
    }

    let bun_path = PaperScriptRunner::find_bun(Some(workspace)).ok_or(RunnerError::NotFound)?;
    let runner = PaperScriptRunner::new(bun_path, workspace.to_owned(), args.worker_count())?;
    let outputs = runner
        .compile_scripts(
            inputs,
            CompileOptions {
                source_maps: options.source_map,
            },
        )
        .await?;

    for output in outputs {
        compiled.insert(output.source, output.result);
    }
    Ok(compiled)
}

fn process_file(
    file: &SourceFile,
    stages: &[Box<dyn PreprocessorStage>],
    out_dir: &Utf8Path,
    emit: bool,
) -> (FileReport, Option<String>) {
    let output = match Host::run(stages, &file.source, Some(&file.relative)) {
        Ok(output) => output,
        Err(e) => return (FileReport::error(&file.relative, e.to_string()), None),
    };

    if emit {
        return (FileReport::transformed(&file.relative, None), Some(output.code));
    }

    match write_output(out_dir, &file.relative, &output) {
        Ok(target) => (
            FileReport::transformed(&file.relative, Some(target.to_string())),
            None,
        ),
        Err(e) => (FileReport::error(&file.relative, e.to_string()), None),
    }
}

/// Writes a transformed component and, when there are maps, `<file>.map.json`.
fn write_output(
    out_dir: &Utf8Path,
    relative: &str,
    output: &HostOutput,
) -> Result<Utf8PathBuf, OrchestratorError> {
    let target = out_dir.join(relative);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| OrchestratorError::WriteFailed(format!("{parent}: {e}")))?;
    }
    fs::write(&target, &output.code)
        .map_err(|e| OrchestratorError::WriteFailed(format!("{target}: {e}")))?;

    let map_path = Utf8PathBuf::from(format!("{target}.map.json"));
    if output.maps.is_empty() {
        let _ = fs::remove_file(&map_path);
        return Ok(target);
    }

    let entries: Vec<MapEntry<'_>> = output
        .maps
        .iter()
        .map(|hook_map| MapEntry {
            stage: hook_map.stage,
            hook: hook_map.hook.as_str(),
            map: &hook_map.map,
        })
        .collect();
    let json = serde_json::to_string_pretty(&entries)
        .map_err(|e| OrchestratorError::WriteFailed(format!("{map_path}: {e}")))?;
    fs::write(&map_path, json)
        .map_err(|e| OrchestratorError::WriteFailed(format!("{map_path}: {e}")))?;

    Ok(target)
}

/// Runs in watch mode.
async fn run_watch_mode(args: &Args, workspace: &Utf8Path) -> Result<RunSummary, OrchestratorError> {
    use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
    use std::time::Duration;

    println!("Starting watch mode...\n");

    let out_dir = resolve_path(workspace, &args.out_dir);
    let _summary = run_once(args, workspace).await?;

    let (tx, mut rx) = tokio::sync::mpsc::channel(100);

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<notify::Event, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.blocking_send(event);
            }
        },
        Config::default().with_poll_interval(Duration::from_secs(1)),
    )
    .map_err(|e| OrchestratorError::WatchFailed(e.to_string()))?;

    watcher
        .watch(workspace.as_std_path(), RecursiveMode::Recursive)
        .map_err(|e| OrchestratorError::WatchFailed(e.to_string()))?;

    println!("Watching for changes... (Ctrl+C to stop)\n");

    let mut config = SvelteConfig::load(workspace);

    while let Some(event) = rx.recv().await {
        let changes: Vec<WatchChange> = {
            let extensions = config.file_extensions();
            event
                .paths
                .iter()
                .map(|p| classify_change(p, workspace, &extensions, &out_dir))
                .collect()
        };
        if changes.contains(&WatchChange::Config) {
            config = SvelteConfig::load(workspace);
        }

        if changes.iter().any(|change| *change != WatchChange::Ignored) {
            if !args.preserve_watch_output {
                print!("\x1B[2J\x1B[1;1H");
            }

            println!("File changed, re-running...\n");

            if let Err(e) = run_once(args, workspace).await {
                eprintln!("Error: {}", e);
            }
        }
    }

    Err(OrchestratorError::WatchFailed(
        "watch channel closed unexpectedly".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperscript_transformer::{Hook, HookMap};
    use pretty_assertions::assert_eq;

    fn temp_workspace() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, root)
    }

    #[test]
    fn test_resolve_path() {
        let base = Utf8Path::new("/work");
        assert_eq!(resolve_path(base, Utf8Path::new("app")), Utf8Path::new("/work/app"));
        assert_eq!(resolve_path(base, Utf8Path::new("/abs")), Utf8Path::new("/abs"));
    }

    #[test]
    fn test_discover_files() {
        let (_dir, root) = temp_workspace();
        for path in [
            "src/App.svelte",
            "src/lib/Sketch.svelte",
            "src/lib/util.js",
            "node_modules/pkg/Button.svelte",
            "out/src/App.svelte",
            "src/legacy/Old.svelte",
        ] {
            let path = root.join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, "").unwrap();
        }

        let ignore =
            build_ignore_set(&["src/legacy/**".to_string()], Some(Utf8Path::new("out"))).unwrap();
        let files: Vec<String> = discover_files(&root, &[".svelte"], &ignore)
            .iter()
            .map(|p| p.strip_prefix(&root).unwrap().to_string())
            .collect();
        assert_eq!(files, vec!["src/App.svelte", "src/lib/Sketch.svelte"]);
    }

    #[test]
    fn test_watch_follows_configured_extensions() {
        let workspace = Utf8Path::new("/work");
        let out_dir = Utf8Path::new("/work/out");
        let extensions = [".svelte", ".paper.html"];
        let classify =
            |path: &str| classify_change(Path::new(path), workspace, &extensions, out_dir);

        assert_eq!(classify("/work/src/Sketch.paper.html"), WatchChange::Component);
        assert_eq!(classify("/work/src/App.svelte"), WatchChange::Component);
        assert_eq!(classify("/work/src/page.html"), WatchChange::Ignored);
        assert_eq!(classify("/work/out/src/Sketch.paper.html"), WatchChange::Ignored);
        assert_eq!(classify("/work/svelte.config.js"), WatchChange::Config);
        assert_eq!(classify("/work/src/svelte.config.js"), WatchChange::Ignored);

        assert_eq!(
            classify_change(
                Path::new("/work/src/Sketch.paper.html"),
                workspace,
                &[".svelte"],
                out_dir
            ),
            WatchChange::Ignored
        );
    }

    #[test]
    fn test_invalid_glob() {
        let err = build_ignore_set(&["src/[".to_string()], None).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidGlob(_)));
    }

    #[test]
    fn test_write_output_with_maps() {
        let (_dir, root) = temp_workspace();
        let map = SourceMapV3 {
            version: 3,
            file: Some("src/App.svelte".to_string()),
            sources: vec!["src/App.svelte".to_string()],
            sources_content: None,
            names: Vec::new(),
            mappings: "AAAA".to_string(),
        };
        let output = HostOutput {
            code: "<script></script>".to_string(),
            maps: vec![HookMap {
                stage: "paperscriptProcessComponent",
                hook: Hook::Markup,
                map,
            }],
        };

        let target = write_output(&root, "src/App.svelte", &output).unwrap();
        assert_eq!(target, root.join("src/App.svelte"));
        assert_eq!(fs::read_to_string(&target).unwrap(), "<script></script>");

        let json = fs::read_to_string(root.join("src/App.svelte.map.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["stage"], "paperscriptProcessComponent");
        assert_eq!(value[0]["hook"], "markup");
        assert_eq!(value[0]["map"]["mappings"], "AAAA");
    }

    #[test]
    fn test_write_output_removes_stale_map() {
        let (_dir, root) = temp_workspace();
        let stale = root.join("App.svelte.map.json");
        fs::write(&stale, "[]").unwrap();

        let output = HostOutput {
            code: "x".to_string(),
            maps: Vec::new(),
        };
        write_output(&root, "App.svelte", &output).unwrap();
        assert!(!stale.exists());
    }
}
