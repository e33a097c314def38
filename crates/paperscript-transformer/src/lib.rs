//! PaperScript support for Svelte components.
//!
//! This crate turns a component whose script is written in PaperScript into an
//! ordinary Svelte component. It handles:
//! - Detecting `<script lang="paperscript">` and binding the first `<canvas>`
//! - Rewriting the compiler's operator markers into runtime dispatch calls
//! - Exposing the scope names a script uses and wiring its event handlers
//! - Source maps back to the text each hook received
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use paperscript_transformer::{
//!     paperscript_preprocess, CompileError, CompileOptions, CompiledScript, Host,
//!     PaperscriptOptions,
//! };
//!
//! let compiler = Arc::new(
//!     |script: &str, _: &CompileOptions| -> Result<CompiledScript, CompileError> {
//!         Ok(CompiledScript::new(script.replace("a + b", "__$__(a, '+', b)")))
//!     },
//! );
//! let stages = paperscript_preprocess(PaperscriptOptions { source_map: false }, compiler);
//!
//! let source = r#"<script lang="paperscript">
//! var c = a + b;
//! </script>
//! <canvas></canvas>"#;
//!
//! let output = Host::run(&stages, source, Some("App.svelte")).unwrap();
//! assert!(output.code.contains("__paper_binary_op(a, '+', b)"));
//! assert!(output.code.contains("bind:this={__paper_canvas}"));
//! ```

pub mod buffer;
mod compiler;
pub mod dispatch;
mod host;
pub mod markup;
pub mod operators;
mod preprocess;
pub mod scaffold;
pub mod scanner;

pub use buffer::{BufferMode, Pattern, PlainBuffer, Replacement, TextBuffer, TrackedBuffer};
pub use compiler::{CompileError, CompileOptions, CompiledScript, CompiledScripts, DialectCompiler};
pub use host::{script_blocks, Hook, HookMap, Host, HostOutput, ScriptBlock};
pub use preprocess::{
    paperscript_preprocess, CompileStage, Detection, PaperscriptOptions, PassContext,
    PreprocessError, PreprocessInput, PreprocessorStage, Processed, ProcessStage,
    COMPILE_STAGE, PROCESS_STAGE,
};
pub use scanner::{scan_usage, Usage};
pub use source_map::{SourceMapV3, V3Options};
