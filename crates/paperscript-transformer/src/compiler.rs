//! The PaperScript compiler seam.
//!
//! Compiling PaperScript to JavaScript is paper.js' job. The pipeline only
//! needs something implementing [`DialectCompiler`]; the CLI backs it with a
//! table of scripts compiled ahead of time by a bun worker pool.

use source_map::SourceMapV3;
use std::collections::HashMap;
use thiserror::Error;

/// Options passed to the dialect compiler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Ask the compiler for a source map.
    pub source_maps: bool,
}

/// JavaScript produced from a PaperScript body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledScript {
    /// The compiled code, with operator markers.
    pub code: String,
    /// The compiler's own source map, if it produced one.
    pub map: Option<SourceMapV3>,
}

impl CompiledScript {
    /// Compiled code without a map.
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            map: None,
        }
    }
}

/// An error reported by the dialect compiler, passed on unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CompileError {
    pub message: String,
}

impl CompileError {
    /// Creates a new compile error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Compiles PaperScript source to JavaScript with operator markers.
pub trait DialectCompiler: Send + Sync {
    /// Compiles one script body.
    fn compile(&self, script: &str, options: &CompileOptions)
        -> Result<CompiledScript, CompileError>;
}

impl<F> DialectCompiler for F
where
    F: Fn(&str, &CompileOptions) -> Result<CompiledScript, CompileError> + Send + Sync,
{
    fn compile(
        &self,
        script: &str,
        options: &CompileOptions,
    ) -> Result<CompiledScript, CompileError> {
        self(script, options)
    }
}

/// Results of compiling scripts ahead of time, looked up by source text.
#[derive(Debug, Clone, Default)]
pub struct CompiledScripts {
    by_source: HashMap<String, Result<CompiledScript, CompileError>>,
}

impl CompiledScripts {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the result of compiling `source`.
    pub fn insert(&mut self, source: String, result: Result<CompiledScript, CompileError>) {
        self.by_source.insert(source, result);
    }

    /// Number of recorded scripts.
    pub fn len(&self) -> usize {
        self.by_source.len()
    }

    /// Returns true if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty()
    }
}

impl DialectCompiler for CompiledScripts {
    fn compile(
        &self,
        script: &str,
        _options: &CompileOptions,
    ) -> Result<CompiledScript, CompileError> {
        match self.by_source.get(script) {
            Some(result) => result.clone(),
            None => Err(CompileError::new(
                "script was not compiled ahead of time",
            )),
        }
    }
}
