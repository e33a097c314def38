//! bun process runner for the PaperScript compiler.

mod runner;

pub use runner::{CompileInput, CompileOutput, PaperScriptRunner, RunnerError};
