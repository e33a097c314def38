//! bun process runner.

use blake3::Hasher;
use camino::{Utf8Path, Utf8PathBuf};
use fs2::FileExt;
use paperscript_transformer::{CompileError, CompileOptions, CompiledScript, SourceMapV3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

const CACHE_DIR_NAME: &str = "svelte-paperscript";
const BUN_SCRIPT_FILENAME: &str = "bun-paperscript-compiler.mjs";
const BUN_SCRIPT_SOURCE: &str = r#"import { createInterface } from 'node:readline';
import { stdin, stdout } from 'node:process';
import { createRequire } from 'node:module';
import { pathToFileURL } from 'node:url';

let PaperScript = null;
const require = createRequire(pathToFileURL(process.cwd() + '/'));
const failures = [];
for (const name of ['paper', 'paper-core']) {
  try {
    const mod = await import(pathToFileURL(require.resolve(name)).href);
    const paper = mod.default || mod;
    PaperScript = paper.PaperScript;
    if (PaperScript) break;
  } catch (err) {
    failures.push(`${name}: ${err && err.message ? err.message : String(err)}`);
  }
}
if (!PaperScript) {
  console.error(`svelte-paperscript bun runner failed to load paper: ${failures.join('; ')}`);
  process.exit(2);
}

stdout.write(JSON.stringify({ ready: true }) + '\n');

const rl = createInterface({ input: stdin, crlfDelay: Infinity });

for await (const line of rl) {
  if (!line.trim()) continue;

  let req;
  try {
    req = JSON.parse(line);
  } catch (err) {
    const message = err && err.message ? err.message : String(err);
    stdout.write(JSON.stringify({ id: null, error: `invalid json: ${message}` }) + '\n');
    continue;
  }

  const id = req.id;
  const options = req.options || {};

  try {
    const result = PaperScript.compile(req.source, {
      url: req.filename,
      sourceMaps: Boolean(options.sourceMaps)
    });
    const map = typeof result.map === 'string' ? JSON.parse(result.map) : result.map;
    stdout.write(JSON.stringify({ id, code: result.code, map: map || null }) + '\n');
  } catch (err) {
    const message = err && err.message ? err.message : String(err);
    stdout.write(JSON.stringify({ id, error: message }) + '\n');
  }
}
"#;

/// Error types for the bun runner.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Failed to spawn bun process.
    #[error("failed to spawn bun: {0}")]
    SpawnFailed(#[from] std::io::Error),

    /// bun process exited with error.
    #[error("bun exited with code {code}: {stderr}")]
    ProcessFailed { code: i32, stderr: String },

    /// bun binary not found.
    #[error("bun binary not found - install it from https://bun.sh or add it to the workspace")]
    NotFound,

    /// The runner script could not be written to the cache directory.
    #[error("failed to prepare runner script: {0}")]
    ScriptSetup(String),

    /// bun runner protocol error.
    #[error("bun runner protocol error: {0}")]
    ProtocolError(String),

    /// Failed to parse bun response.
    #[error("failed to parse bun response: {0}")]
    ParseError(String),
}

/// A PaperScript body to compile.
#[derive(Debug, Clone)]
pub struct CompileInput {
    pub filename: Utf8PathBuf,
    pub source: String,
}

/// The compiler's answer for one [`CompileInput`].
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub filename: Utf8PathBuf,
    pub source: String,
    pub result: Result<CompiledScript, CompileError>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestOptions {
    source_maps: bool,
}

#[derive(Debug, Serialize)]
struct BunRequest<'a> {
    id: u64,
    filename: &'a str,
    source: &'a str,
    options: RequestOptions,
}

#[derive(Debug, Deserialize)]
struct BunResponse {
    id: Option<u64>,
    code: Option<String>,
    map: Option<SourceMapV3>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BunReady {
    ready: bool,
}

/// Decodes one response line into its request id and compile result.
fn decode_response(
    line: &str,
) -> Result<(u64, Result<CompiledScript, CompileError>), RunnerError> {
    let response: BunResponse = serde_json::from_str(line)
        .map_err(|e| RunnerError::ParseError(format!("invalid response: {e} ({line})")))?;

    let Some(id) = response.id else {
        return Err(RunnerError::ProtocolError(
            response
                .error
                .unwrap_or_else(|| format!("missing response id: {line}")),
        ));
    };

    let result = match (response.error, response.code) {
        (Some(error), _) => Err(CompileError::new(error)),
        (None, Some(code)) => Ok(CompiledScript {
            code,
            map: response.map,
        }),
        (None, None) => {
            return Err(RunnerError::ProtocolError(format!(
                "response {id} has neither code nor error"
            )))
        }
    };
    Ok((id, result))
}

/// The bun runner.
#[derive(Debug, Clone)]
pub struct PaperScriptRunner {
    bun_path: Utf8PathBuf,
    workspace_root: Utf8PathBuf,
    script_path: Utf8PathBuf,
    worker_count: usize,
}

impl PaperScriptRunner {
    /// Creates a new runner, writing the worker script to the cache directory.
    pub fn new(
        bun_path: Utf8PathBuf,
        workspace_root: Utf8PathBuf,
        worker_count: usize,
    ) -> Result<Self, RunnerError> {
        let script_path = ensure_script()?;
        let worker_count = worker_count.max(1);
        Ok(Self {
            bun_path,
            workspace_root,
            script_path,
            worker_count,
        })
    }

    /// Attempts to find bun in workspace, PATH or home directory.
    /// 1. Workspace node_modules/.bin/bun (if workspace_root provided)
    /// 2. PATH
    /// 3. ~/.bun/bin/bun (default install location)
    pub fn find_bun(workspace_root: Option<&Utf8Path>) -> Option<Utf8PathBuf> {
        if let Some(workspace) = workspace_root {
            let bin = workspace.join("node_modules/.bin");
            if let Some(path) = find_bun_in_bin(&bin) {
                return Some(path);
            }
        }

        if let Ok(path) = which::which("bun") {
            if let Ok(utf8_path) = Utf8PathBuf::try_from(path) {
                return Some(utf8_path);
            }
        }

        if let Some(home) = dirs::home_dir() {
            if let Ok(home) = Utf8PathBuf::try_from(home) {
                let bun_home = home.join(".bun/bin");
                if let Some(path) = find_bun_in_bin(&bun_home) {
                    return Some(path);
                }
            }
        }

        None
    }

    /// Gets the cache directory for svelte-paperscript.
    pub fn get_cache_dir() -> Option<Utf8PathBuf> {
        dirs::cache_dir()
            .and_then(|p| Utf8PathBuf::try_from(p).ok())
            .map(|p| p.join(CACHE_DIR_NAME))
    }

    /// Gets the version of the bun binary that would be used for `workspace_root`.
    pub async fn get_bun_version(
        workspace_root: Option<&Utf8Path>,
    ) -> Result<(String, Utf8PathBuf), RunnerError> {
        let bun_path = Self::find_bun(workspace_root).ok_or(RunnerError::NotFound)?;

        let output = Command::new(&bun_path)
            .arg("--version")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(RunnerError::SpawnFailed)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RunnerError::ProcessFailed {
                code: output.status.code().unwrap_or(-1),
                stderr: stderr.to_string(),
            });
        }

        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((version, bun_path))
    }

    /// Compiles PaperScript bodies, spreading them over the worker pool.
    ///
    /// Outputs come back grouped by worker, not in input order.
    pub async fn compile_scripts(
        &self,
        inputs: Vec<CompileInput>,
        options: CompileOptions,
    ) -> Result<Vec<CompileOutput>, RunnerError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let worker_count = self.worker_count.min(inputs.len()).max(1);
        tracing::debug!(scripts = inputs.len(), workers = worker_count, "compiling paperscript");

        let mut chunks: Vec<Vec<CompileInput>> = vec![Vec::new(); worker_count];
        for (idx, input) in inputs.into_iter().enumerate() {
            chunks[idx % worker_count].push(input);
        }

        let mut handles = Vec::new();
        for chunk in chunks.into_iter().filter(|c| !c.is_empty()) {
            let bun_path = self.bun_path.clone();
            let workspace_root = self.workspace_root.clone();
            let script_path = self.script_path.clone();
            handles.push(tokio::spawn(async move {
                let mut worker = BunWorker::spawn(bun_path, workspace_root, script_path).await?;
                worker.compile_batch(chunk, options).await
            }));
        }

        let mut outputs = Vec::new();
        for handle in handles {
            let chunk_outputs = handle
                .await
                .map_err(|e| RunnerError::ProtocolError(format!("join error: {e}")))??;
            outputs.extend(chunk_outputs);
        }

        Ok(outputs)
    }
}

fn find_bun_in_bin(bin: &Utf8Path) -> Option<Utf8PathBuf> {
    let candidates: &[&str] = if cfg!(windows) {
        &["bun.exe", "bun.cmd", "bun"]
    } else {
        &["bun"]
    };

    candidates
        .iter()
        .map(|candidate| bin.join(candidate))
        .find(|path| path.exists())
}

fn ensure_script() -> Result<Utf8PathBuf, RunnerError> {
    let cache_dir = PaperScriptRunner::get_cache_dir()
        .ok_or_else(|| RunnerError::ScriptSetup("could not determine cache directory".into()))?;
    write_script(&cache_dir)
}

/// Writes the worker script into `dir` unless an identical copy is there.
///
/// Concurrent runs serialize on a lock file next to the script.
fn write_script(dir: &Utf8Path) -> Result<Utf8PathBuf, RunnerError> {
    fs::create_dir_all(dir)
        .map_err(|e| RunnerError::ScriptSetup(format!("failed to create cache dir: {e}")))?;

    let lock = fs::File::create(dir.join(format!("{BUN_SCRIPT_FILENAME}.lock")))
        .map_err(|e| RunnerError::ScriptSetup(format!("failed to create lock file: {e}")))?;
    lock.lock_exclusive()
        .map_err(|e| RunnerError::ScriptSetup(format!("failed to lock cache dir: {e}")))?;

    let script_path = dir.join(BUN_SCRIPT_FILENAME);
    let mut hasher = Hasher::new();
    hasher.update(BUN_SCRIPT_SOURCE.as_bytes());
    let expected_hash = hasher.finalize();

    let up_to_date = fs::read(&script_path).is_ok_and(|existing| {
        let mut hasher = Hasher::new();
        hasher.update(&existing);
        hasher.finalize() == expected_hash
    });

    let written = if up_to_date {
        Ok(())
    } else {
        tracing::debug!(path = %script_path, "writing bun runner script");
        fs::write(&script_path, BUN_SCRIPT_SOURCE)
    };
    let _ = FileExt::unlock(&lock);

    written.map_err(|e| RunnerError::ScriptSetup(format!("failed to write bun runner script: {e}")))?;
    Ok(script_path)
}

struct BunWorker {
    child: Child,
    stdin: ChildStdin,
    stdout: tokio::io::Lines<BufReader<ChildStdout>>,
    stderr_task: Option<JoinHandle<String>>,
}

impl BunWorker {
    async fn spawn(
        bun_path: Utf8PathBuf,
        workspace_root: Utf8PathBuf,
        script_path: Utf8PathBuf,
    ) -> Result<Self, RunnerError> {
        tracing::debug!(bun = %bun_path, workspace = %workspace_root, "spawning bun worker");
        let mut child = Command::new(&bun_path)
            .arg(&script_path)
            .current_dir(&workspace_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(RunnerError::SpawnFailed)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RunnerError::ProtocolError("failed to open bun stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunnerError::ProtocolError("failed to open bun stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RunnerError::ProtocolError("failed to open bun stderr".to_string()))?;

        let stderr_task = tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut buffer = String::new();
            let _ = reader.read_to_string(&mut buffer).await;
            buffer
        });

        let mut stdout_reader = BufReader::new(stdout).lines();

        let ready_line = stdout_reader
            .next_line()
            .await
            .map_err(|e| RunnerError::ProtocolError(format!("failed to read bun ready: {e}")))?;

        let Some(ready_line) = ready_line else {
            let stderr = stderr_task.await.unwrap_or_default();
            let status = child.wait().await.map_err(RunnerError::SpawnFailed)?;
            return Err(RunnerError::ProcessFailed {
                code: status.code().unwrap_or(-1),
                stderr,
            });
        };

        let ready: BunReady = serde_json::from_str(&ready_line)
            .map_err(|e| RunnerError::ParseError(format!("invalid ready response: {e}")))?;
        if !ready.ready {
            return Err(RunnerError::ProtocolError(format!(
                "unexpected bun ready response: {}",
                ready_line
            )));
        }

        Ok(Self {
            child,
            stdin,
            stdout: stdout_reader,
            stderr_task: Some(stderr_task),
        })
    }

    /// Sends every request and collects every response.
    ///
    /// Writing and reading run concurrently: bun answers while it is still
    /// receiving, and a batch larger than both pipe buffers stalls unless
    /// responses are drained as requests go out.
    async fn compile_batch(
        &mut self,
        inputs: Vec<CompileInput>,
        options: CompileOptions,
    ) -> Result<Vec<CompileOutput>, RunnerError> {
        let mut pending = HashMap::new();
        let mut requests = Vec::new();

        for (id, input) in (1u64..).zip(inputs) {
            let request = BunRequest {
                id,
                filename: input.filename.as_str(),
                source: &input.source,
                options: RequestOptions {
                    source_maps: options.source_maps,
                },
            };

            serde_json::to_writer(&mut requests, &request).map_err(|e| {
                RunnerError::ProtocolError(format!("failed to serialize request: {e}"))
            })?;
            requests.push(b'\n');

            pending.insert(id, input);
        }

        let Self {
            child,
            stdin,
            stdout,
            stderr_task,
        } = self;

        let write = async {
            let written = match stdin.write_all(&requests).await {
                Ok(()) => stdin.flush().await,
                Err(e) => Err(e),
            };
            match written {
                Ok(()) => Ok(()),
                // The worker exited; the reader reports its status.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
                Err(e) => Err(RunnerError::ProtocolError(format!(
                    "failed to write to bun stdin: {e}"
                ))),
            }
        };

        let read = async {
            let mut outputs = Vec::with_capacity(pending.len());

            while !pending.is_empty() {
                let line = stdout.next_line().await.map_err(|e| {
                    RunnerError::ProtocolError(format!("failed to read bun response: {e}"))
                })?;

                let Some(line) = line else {
                    let stderr = match stderr_task.take() {
                        Some(handle) => handle.await.unwrap_or_default(),
                        None => String::new(),
                    };
                    let status = child.wait().await.map_err(RunnerError::SpawnFailed)?;
                    return Err(RunnerError::ProcessFailed {
                        code: status.code().unwrap_or(-1),
                        stderr,
                    });
                };

                let (id, result) = decode_response(&line)?;
                let input = pending.remove(&id).ok_or_else(|| {
                    RunnerError::ProtocolError(format!("unexpected response id {id}"))
                })?;

                if let Err(error) = &result {
                    tracing::debug!(file = %input.filename, %error, "paperscript compile failed");
                }
                outputs.push(CompileOutput {
                    filename: input.filename,
                    source: input.source,
                    result,
                });
            }

            Ok::<_, RunnerError>(outputs)
        };

        let ((), outputs) = tokio::try_join!(write, read)?;
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_request_shape() {
        let request = BunRequest {
            id: 7,
            filename: "src/Sketch.svelte",
            source: "var a = b + c;",
            options: RequestOptions { source_maps: true },
        };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"id":7,"filename":"src/Sketch.svelte","source":"var a = b + c;","options":{"sourceMaps":true}}"#
        );
    }

    #[test]
    fn test_decode_code_response() {
        let (id, result) =
            decode_response(r#"{"id":3,"code":"var a = __$__(b, '+', c);"}"#).unwrap();
        assert_eq!(id, 3);
        let compiled = result.unwrap();
        assert_eq!(compiled.code, "var a = __$__(b, '+', c);");
        assert_eq!(compiled.map, None);
    }

    #[test]
    fn test_decode_response_with_map() {
        let line = r#"{"id":1,"code":"a","map":{"version":3,"file":"A.svelte","names":[],"mappings":"AAAA","sourceRoot":"","sources":["A.svelte"],"sourcesContent":["a"]}}"#;
        let (_, result) = decode_response(line).unwrap();
        let map = result.unwrap().map.unwrap();
        assert_eq!(map.version, 3);
        assert_eq!(map.sources, vec!["A.svelte".to_string()]);
        assert_eq!(map.mappings, "AAAA");
    }

    #[test]
    fn test_decode_compile_error() {
        let (id, result) =
            decode_response(r#"{"id":2,"error":"Unexpected token (1:6)"}"#).unwrap();
        assert_eq!(id, 2);
        assert_eq!(result.unwrap_err().to_string(), "Unexpected token (1:6)");
    }

    #[test]
    fn test_decode_protocol_errors() {
        let err = decode_response(r#"{"id":null,"error":"invalid json: x"}"#).unwrap_err();
        assert!(matches!(err, RunnerError::ProtocolError(ref msg) if msg == "invalid json: x"));

        let err = decode_response(r#"{"id":4}"#).unwrap_err();
        assert!(matches!(err, RunnerError::ProtocolError(_)));

        let err = decode_response("not json").unwrap_err();
        assert!(matches!(err, RunnerError::ParseError(_)));
    }

    #[test]
    fn test_write_script_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(dir.path()).unwrap();

        let path = write_script(dir).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), BUN_SCRIPT_SOURCE);

        fs::write(&path, "stale").unwrap();
        let again = write_script(dir).unwrap();
        assert_eq!(again, path);
        assert_eq!(fs::read_to_string(&path).unwrap(), BUN_SCRIPT_SOURCE);
    }

    #[test]
    fn test_find_bun_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        assert_eq!(find_bun_in_bin(&root.join("node_modules/.bin")), None);

        let bin = root.join("node_modules/.bin");
        fs::create_dir_all(&bin).unwrap();
        let name = if cfg!(windows) { "bun.exe" } else { "bun" };
        fs::write(bin.join(name), "").unwrap();

        assert_eq!(
            PaperScriptRunner::find_bun(Some(root)),
            Some(bin.join(name))
        );
    }

    /// Answers every request with a 4 KiB body, like a compiler that replies
    /// as soon as each line arrives.
    #[cfg(unix)]
    const ECHO_WORKER: &str = r#"pad=$(printf '%4096s' '' | tr ' ' 'x')
echo '{"ready":true}'
id=0
while IFS= read -r line; do
  id=$((id + 1))
  printf '{"id":%d,"code":"%s"}\n' "$id" "$pad"
done
"#;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_large_batch_streams_responses() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let script_path = root.join("worker.sh");
        fs::write(&script_path, ECHO_WORKER).unwrap();

        let runner = PaperScriptRunner {
            bun_path: Utf8PathBuf::from("/bin/sh"),
            workspace_root: root.to_path_buf(),
            script_path,
            worker_count: 1,
        };

        // Far more than a pipe buffer in each direction.
        let inputs: Vec<CompileInput> = (0..400)
            .map(|i| CompileInput {
                filename: Utf8PathBuf::from(format!("src/Sketch{i}.svelte")),
                source: format!("var a{i} = b + c; // {}", "y".repeat(2048)),
            })
            .collect();

        let outputs = tokio::time::timeout(
            std::time::Duration::from_secs(60),
            runner.compile_scripts(inputs, CompileOptions { source_maps: false }),
        )
        .await
        .expect("batch should not stall")
        .unwrap();

        assert_eq!(outputs.len(), 400);
        for output in &outputs {
            let compiled = output.result.as_ref().unwrap();
            assert_eq!(compiled.code.len(), 4096);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_worker_exit_reports_status() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let script_path = root.join("worker.sh");
        fs::write(
            &script_path,
            "echo '{\"ready\":true}'\nread -r line\necho 'paper crashed' >&2\nexit 3\n",
        )
        .unwrap();

        let runner = PaperScriptRunner {
            bun_path: Utf8PathBuf::from("/bin/sh"),
            workspace_root: root.to_path_buf(),
            script_path,
            worker_count: 1,
        };
        let inputs = vec![CompileInput {
            filename: Utf8PathBuf::from("src/Sketch.svelte"),
            source: "var a = b + c;".to_string(),
        }];

        let err = runner
            .compile_scripts(inputs, CompileOptions { source_maps: false })
            .await
            .unwrap_err();
        assert!(
            matches!(err, RunnerError::ProcessFailed { code: 3, ref stderr } if stderr.contains("paper crashed")),
            "{err:?}"
        );
    }

    #[test]
    fn test_script_resolves_paper_packages() {
        assert!(BUN_SCRIPT_SOURCE.contains("['paper', 'paper-core']"));
        assert!(BUN_SCRIPT_SOURCE.contains("PaperScript.compile(req.source"));
        assert!(BUN_SCRIPT_SOURCE.contains("JSON.stringify({ ready: true })"));
    }
}
