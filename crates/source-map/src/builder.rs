//! Span-level position maps, built while output text is emitted.

use crate::{ByteOffset, Span};
use text_size::TextSize;

/// How a generated span relates to its original span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingKind {
    /// Copied unchanged; every byte maps 1:1.
    Verbatim,
    /// Rewritten; the whole generated span maps to the start of the original span.
    Transformed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub generated: Span,
    pub original: Span,
    pub kind: MappingKind,
}

impl Mapping {
    fn original_of(&self, generated: ByteOffset) -> ByteOffset {
        match self.kind {
            MappingKind::Verbatim => self.original.start + (generated - self.generated.start),
            MappingKind::Transformed => self.original.start,
        }
    }
}

/// Mappings from generated text back to original text, ordered by generated
/// position. Generated text without a mapping has no origin.
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    mappings: Vec<Mapping>,
}

impl SourceMap {
    pub fn mappings(&self) -> impl Iterator<Item = &Mapping> {
        self.mappings.iter()
    }

    /// Where `generated` came from, if anywhere.
    pub fn original_position(&self, generated: ByteOffset) -> Option<ByteOffset> {
        let idx = self
            .mappings
            .partition_point(|m| m.generated.start <= generated)
            .checked_sub(1)?;
        let mapping = &self.mappings[idx];
        mapping
            .generated
            .contains(generated)
            .then(|| mapping.original_of(generated))
    }
}

/// Builds a [`SourceMap`] from output pieces emitted in order.
#[derive(Debug, Default)]
pub struct SourceMapBuilder {
    mappings: Vec<Mapping>,
    generated_offset: ByteOffset,
}

impl SourceMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emits `text` copied from the original at `original_start`.
    pub fn add_source(&mut self, original_start: ByteOffset, text: &str) {
        let len = TextSize::of(text);
        self.push(
            Span::new(original_start, original_start + len),
            len,
            MappingKind::Verbatim,
        );
    }

    /// Emits text with no origin.
    pub fn add_generated(&mut self, text: &str) {
        self.generated_offset += TextSize::of(text);
    }

    /// Emits `generated_text` in place of `original`. Deletions map nothing.
    pub fn add_transformed(&mut self, original: Span, generated_text: &str) {
        self.push(original, TextSize::of(generated_text), MappingKind::Transformed);
    }

    fn push(&mut self, original: Span, generated_len: TextSize, kind: MappingKind) {
        if generated_len == TextSize::from(0) {
            return;
        }
        let generated_start = self.generated_offset;
        self.generated_offset += generated_len;
        self.mappings.push(Mapping {
            generated: Span::new(generated_start, self.generated_offset),
            original,
            kind,
        });
    }

    pub fn build(self) -> SourceMap {
        SourceMap {
            mappings: self.mappings,
        }
    }
}
