//! The two preprocessing stages handed to a host.
//!
//! Stage one compiles PaperScript bodies to JavaScript, stage two rewrites the
//! component markup and wraps the compiled body in the runtime scaffold. Each
//! stage's markup hook decides whether the file uses PaperScript and records
//! the outcome in a [`PassContext`] that the host passes to the script hook of
//! the same pass.

use crate::buffer::{BufferMode, PlainBuffer, TextBuffer, TrackedBuffer};
use crate::compiler::{CompileError, CompileOptions, DialectCompiler};
use crate::markup::{bind_canvas, is_paperscript, remove_lang_attribute};
use crate::scaffold::inject_scaffold;
use source_map::{SourceMapV3, V3Options};
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;

/// Name of the compile stage.
pub const COMPILE_STAGE: &str = "paperscriptCompileScript";
/// Name of the component processing stage.
pub const PROCESS_STAGE: &str = "paperscriptProcessComponent";

/// Options for [`paperscript_preprocess`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaperscriptOptions {
    /// Produce source maps from every hook. Defaults to `true`.
    pub source_map: bool,
}

impl Default for PaperscriptOptions {
    fn default() -> Self {
        Self { source_map: true }
    }
}

/// Detection outcome for one file in one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Detection {
    /// The markup hook has not run yet.
    #[default]
    Unchecked,
    /// The file declares a PaperScript script.
    Dialect,
    /// The file is an ordinary component.
    Plain,
}

/// Per-file, per-pass state shared by a stage's markup and script hooks.
#[derive(Debug, Clone, Default)]
pub struct PassContext {
    detection: Detection,
}

impl PassContext {
    /// A context in the [`Detection::Unchecked`] state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs detection on the full file content and records the outcome.
    pub fn detect(&mut self, content: &str) -> Detection {
        self.detection = if is_paperscript(content) {
            Detection::Dialect
        } else {
            Detection::Plain
        };
        self.detection
    }

    /// Current detection state.
    pub fn detection(&self) -> Detection {
        self.detection
    }

    /// Returns true once the file was detected as PaperScript.
    pub fn uses_dialect(&self) -> bool {
        self.detection == Detection::Dialect
    }
}

/// What a hook receives from the host.
#[derive(Debug, Clone, Default)]
pub struct PreprocessInput {
    /// The whole file for markup hooks, the element body for script hooks.
    pub content: String,
    pub filename: Option<String>,
    /// Attributes of the `<script>` element. Empty for markup hooks.
    pub attributes: Vec<(String, Option<String>)>,
}

impl PreprocessInput {
    /// Input carrying only content and a file name.
    pub fn new(content: impl Into<String>, filename: Option<&str>) -> Self {
        Self {
            content: content.into(),
            filename: filename.map(str::to_string),
            attributes: Vec::new(),
        }
    }
}

/// Replacement text returned by a hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed {
    pub code: String,
    pub map: Option<SourceMapV3>,
}

/// Errors returned from preprocessing hooks.
#[derive(Debug, Error)]
pub enum PreprocessError {
    /// The dialect compiler rejected a script.
    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// A preprocessing stage with optional markup and script hooks.
///
/// Hooks return `Ok(None)` to leave the content untouched.
pub trait PreprocessorStage: Send + Sync {
    /// Stage name reported to the host.
    fn name(&self) -> &'static str;

    /// Runs on the whole file.
    fn markup(
        &self,
        _ctx: &mut PassContext,
        _input: &PreprocessInput,
    ) -> Result<Option<Processed>, PreprocessError> {
        Ok(None)
    }

    /// Runs on each `<script>` element body, after [`markup`](Self::markup).
    fn script(
        &self,
        _ctx: &PassContext,
        _input: &PreprocessInput,
    ) -> Result<Option<Processed>, PreprocessError> {
        Ok(None)
    }
}

/// Stage one: compile PaperScript to JavaScript with operator markers.
pub struct CompileStage {
    compiler: Arc<dyn DialectCompiler>,
    options: PaperscriptOptions,
}

impl CompileStage {
    pub fn new(compiler: Arc<dyn DialectCompiler>, options: PaperscriptOptions) -> Self {
        Self { compiler, options }
    }
}

impl PreprocessorStage for CompileStage {
    fn name(&self) -> &'static str {
        COMPILE_STAGE
    }

    fn markup(
        &self,
        ctx: &mut PassContext,
        input: &PreprocessInput,
    ) -> Result<Option<Processed>, PreprocessError> {
        let detection = ctx.detect(&input.content);
        tracing::debug!(stage = COMPILE_STAGE, filename = ?input.filename, ?detection, "detected");
        Ok(None)
    }

    fn script(
        &self,
        ctx: &PassContext,
        input: &PreprocessInput,
    ) -> Result<Option<Processed>, PreprocessError> {
        if !ctx.uses_dialect() {
            return Ok(None);
        }

        let options = CompileOptions {
            source_maps: self.options.source_map,
        };
        let compiled = self.compiler.compile(&input.content, &options)?;
        tracing::debug!(
            filename = ?input.filename,
            bytes_in = input.content.len(),
            bytes_out = compiled.code.len(),
            "compiled paperscript"
        );

        Ok(Some(Processed {
            code: compiled.code,
            map: compiled.map.filter(|_| self.options.source_map),
        }))
    }
}

/// Stage two: rewrite markup and scaffold the compiled script.
///
/// `B` is the buffer implementation used for every edit, which decides whether
/// hooks return source maps.
pub struct ProcessStage<B> {
    buffer: PhantomData<fn() -> B>,
}

impl<B: TextBuffer> ProcessStage<B> {
    pub fn new() -> Self {
        Self {
            buffer: PhantomData,
        }
    }
}

impl<B: TextBuffer> Default for ProcessStage<B> {
    fn default() -> Self {
        Self::new()
    }
}

fn map_options(input: &PreprocessInput) -> V3Options {
    V3Options {
        file: input.filename.clone(),
        source: None,
        include_content: true,
        hires: true,
    }
}

impl<B: TextBuffer> PreprocessorStage for ProcessStage<B> {
    fn name(&self) -> &'static str {
        PROCESS_STAGE
    }

    fn markup(
        &self,
        ctx: &mut PassContext,
        input: &PreprocessInput,
    ) -> Result<Option<Processed>, PreprocessError> {
        let detection = ctx.detect(&input.content);
        tracing::debug!(stage = PROCESS_STAGE, filename = ?input.filename, ?detection, "detected");
        if detection != Detection::Dialect {
            return Ok(None);
        }

        let markup = bind_canvas(remove_lang_attribute(B::new(&input.content)));
        Ok(Some(Processed {
            code: markup.render(),
            map: markup.render_map(&map_options(input)),
        }))
    }

    fn script(
        &self,
        ctx: &PassContext,
        input: &PreprocessInput,
    ) -> Result<Option<Processed>, PreprocessError> {
        if !ctx.uses_dialect() {
            return Ok(None);
        }

        let script = inject_scaffold(B::new(&input.content));
        Ok(Some(Processed {
            code: script.render(),
            map: script.render_map(&map_options(input)),
        }))
    }
}

/// Builds the ordered stage list for a host.
///
/// The buffer implementation is picked here, once, from
/// [`PaperscriptOptions::source_map`].
pub fn paperscript_preprocess(
    options: PaperscriptOptions,
    compiler: Arc<dyn DialectCompiler>,
) -> Vec<Box<dyn PreprocessorStage>> {
    let process: Box<dyn PreprocessorStage> = match BufferMode::for_source_maps(options.source_map)
    {
        BufferMode::Tracked => Box::new(ProcessStage::<TrackedBuffer>::new()),
        BufferMode::Plain => Box::new(ProcessStage::<PlainBuffer>::new()),
    };
    vec![Box::new(CompileStage::new(compiler, options)), process]
}
