//! Source position tracking and mapping for svelte-paperscript.
//!
//! This crate provides utilities for tracking source positions through text
//! rewrites and for rendering the result as a standard (version 3) source map
//! that debuggers and the Svelte compiler can consume.

mod builder;
mod line_index;
mod span;
mod v3;

pub use builder::{Mapping, MappingKind, SourceMap, SourceMapBuilder};
pub use line_index::{LineCol, LineCursor, LineIndex};
pub use span::{ByteOffset, Span};
pub use v3::{encode_vlq, SourceMapV3, V3Options};
