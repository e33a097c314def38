//! Edit buffers.
//!
//! Both the markup and the script are rewritten through the same handful of
//! operations: regex replacement, prepend and append. [`TrackedBuffer`] keeps
//! enough bookkeeping to render a source map pointing back at the text it was
//! created from; [`PlainBuffer`] performs the same edits on a bare `String` and
//! never produces a map. Code that rewrites text is written once, generic over
//! [`TextBuffer`], and the variant is picked when the pipeline is built.

use regex::{Captures, Regex};
use source_map::{SourceMap, SourceMapBuilder, SourceMapV3, Span, V3Options};
use std::fmt;
use std::ops::Range;

/// A regular expression plus the JavaScript-style "global" flag.
///
/// Global patterns replace every non-overlapping match; others only the first.
#[derive(Debug, Clone)]
pub struct Pattern {
    regex: Regex,
    global: bool,
}

impl Pattern {
    /// A pattern that only replaces its first match.
    pub fn first(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
            global: false,
        })
    }

    /// A pattern that replaces every match.
    pub fn global(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
            global: true,
        })
    }

    /// The underlying regex.
    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// Computes the edits this pattern produces on `text`, in ascending order.
    fn edits(&self, text: &str, with: &Replacement<'_>) -> Vec<(Range<usize>, String)> {
        let expand = |caps: Captures<'_>| {
            let range = caps.get(0).map_or(0..0, |m| m.range());
            (range, with.expand(&caps))
        };

        if self.global {
            self.regex.captures_iter(text).map(expand).collect()
        } else {
            self.regex.captures(text).map(expand).into_iter().collect()
        }
    }
}

/// What a match is replaced with.
pub enum Replacement<'a> {
    /// Inserted as-is.
    Literal(&'a str),
    /// Expanded with `$1` / `${name}` group references.
    Template(&'a str),
    /// Computed from the full match and its groups.
    With(&'a dyn Fn(&Captures<'_>) -> String),
}

impl Replacement<'_> {
    fn expand(&self, caps: &Captures<'_>) -> String {
        match self {
            Replacement::Literal(text) => (*text).to_string(),
            Replacement::Template(template) => {
                let mut out = String::new();
                caps.expand(template, &mut out);
                out
            }
            Replacement::With(replacer) => replacer(caps),
        }
    }
}

impl fmt::Debug for Replacement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Replacement::Literal(text) => f.debug_tuple("Literal").field(text).finish(),
            Replacement::Template(text) => f.debug_tuple("Template").field(text).finish(),
            Replacement::With(_) => f.write_str("With(..)"),
        }
    }
}

/// The edit operations shared by both buffer variants.
///
/// Every operation consumes the buffer and returns the edited one. Rendered text
/// always reflects all edits in the order they were applied.
pub trait TextBuffer: Sized {
    /// Wraps `text` for editing.
    fn new(text: &str) -> Self;

    /// Replaces matches of `pattern` in the current text.
    fn replace(self, pattern: &Pattern, with: Replacement<'_>) -> Self;

    /// Inserts `text` before everything else.
    fn prepend(self, text: &str) -> Self;

    /// Inserts `text` after everything else.
    fn append(self, text: &str) -> Self;

    /// Returns the current text.
    fn render(&self) -> String;

    /// Returns a source map from the current text back to the text passed to
    /// [`TextBuffer::new`], if this variant tracks positions.
    fn render_map(&self, options: &V3Options) -> Option<SourceMapV3>;
}

/// Which buffer variant a pipeline uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMode {
    /// [`TrackedBuffer`]: edits produce source maps.
    Tracked,
    /// [`PlainBuffer`]: edits on a plain string, no maps.
    Plain,
}

impl BufferMode {
    /// Selects the variant for the `sourceMap` option.
    pub fn for_source_maps(enabled: bool) -> Self {
        if enabled {
            Self::Tracked
        } else {
            Self::Plain
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkKind {
    /// Unchanged slice of the original text.
    Original,
    /// Text that replaced `original`.
    Edited,
    /// Text with no counterpart in the original.
    Inserted,
}

#[derive(Debug, Clone)]
struct Chunk {
    kind: ChunkKind,
    original: Span,
    content: String,
}

/// A buffer that remembers which output ranges came from which input ranges.
#[derive(Debug, Clone)]
pub struct TrackedBuffer {
    original: String,
    chunks: Vec<Chunk>,
}

impl TrackedBuffer {
    /// Returns the span-based position map for the current text.
    pub fn position_map(&self) -> SourceMap {
        let mut builder = SourceMapBuilder::new();
        for chunk in &self.chunks {
            match chunk.kind {
                ChunkKind::Original => builder.add_source(chunk.original.start, &chunk.content),
                ChunkKind::Edited => builder.add_transformed(chunk.original, &chunk.content),
                ChunkKind::Inserted => builder.add_generated(&chunk.content),
            }
        }
        builder.build()
    }

    /// The text this buffer was created from.
    pub fn original(&self) -> &str {
        &self.original
    }

    /// Rendered start offset of every chunk.
    fn chunk_starts(&self) -> Vec<usize> {
        let mut offset = 0;
        self.chunks
            .iter()
            .map(|chunk| {
                let start = offset;
                offset += chunk.content.len();
                start
            })
            .collect()
    }

    /// Grows `range` to the bounds of any edited or inserted chunk it touches.
    ///
    /// Such chunks only map as a whole, so an edit reaching into one rewrites
    /// all of it. An empty range only grows when it falls strictly inside one.
    fn widen(&self, starts: &[usize], range: &Range<usize>) -> Range<usize> {
        let chunk_at = |pos: usize| {
            let idx = starts.partition_point(|&start| start <= pos).checked_sub(1)?;
            let chunk = &self.chunks[idx];
            let bounds = starts[idx]..starts[idx] + chunk.content.len();
            (chunk.kind != ChunkKind::Original).then_some(bounds)
        };

        if range.is_empty() {
            return match chunk_at(range.start) {
                Some(bounds) if bounds.start < range.start && range.start < bounds.end => bounds,
                _ => range.clone(),
            };
        }

        let start = chunk_at(range.start)
            .filter(|bounds| bounds.contains(&range.start))
            .map_or(range.start, |bounds| bounds.start);
        let end = chunk_at(range.end - 1)
            .filter(|bounds| bounds.contains(&(range.end - 1)))
            .map_or(range.end, |bounds| bounds.end);
        start..end
    }

    /// Turns ascending, non-overlapping edits of `rendered` into splices over
    /// whole chunks. Edits whose widened ranges overlap share one splice.
    fn splices(
        &self,
        rendered: &str,
        starts: &[usize],
        edits: Vec<(Range<usize>, String)>,
    ) -> Vec<Splice> {
        let mut splices: Vec<Splice> = Vec::new();
        // Rendered offset up to which the last splice's content is built.
        let mut built = 0;

        for (range, text) in edits {
            let widened = self.widen(starts, &range);
            let merge = splices
                .last()
                .is_some_and(|last| widened.start < last.range.end);

            if merge {
                if let Some(last) = splices.last_mut() {
                    last.content.push_str(&rendered[built..range.start]);
                    last.content.push_str(&text);
                    last.range.end = last.range.end.max(widened.end);
                }
            } else {
                if let Some(last) = splices.last_mut() {
                    last.content.push_str(&rendered[built..last.range.end]);
                }
                let mut content = rendered[widened.start..range.start].to_string();
                content.push_str(&text);
                splices.push(Splice {
                    range: widened,
                    content,
                });
            }
            built = range.end;
        }

        if let Some(last) = splices.last_mut() {
            last.content.push_str(&rendered[built..last.range.end]);
        }
        splices
    }

    /// Rebuilds the chunk list with `splices` applied, in one pass.
    fn apply(&mut self, starts: &[usize], splices: Vec<Splice>) {
        let old = std::mem::take(&mut self.chunks);
        let original_end = Span::empty(self.original.len() as u32);
        let mut walk = ChunkWalk {
            chunks: &old,
            starts,
            idx: 0,
            consumed: 0,
            out: Vec::with_capacity(old.len() + 2 * splices.len()),
        };

        for splice in splices {
            if splice.range.is_empty() {
                walk.copy_until(splice.range.start, false);
                if splice.content.is_empty() {
                    continue;
                }
                let anchor = walk.anchor().unwrap_or(original_end);
                walk.out.push(Chunk {
                    kind: ChunkKind::Inserted,
                    original: anchor,
                    content: splice.content,
                });
                continue;
            }

            walk.copy_until(splice.range.start, true);
            let (first, cover) = walk.consume_until(splice.range.end);
            match cover {
                Some(original) => walk.out.push(Chunk {
                    kind: ChunkKind::Edited,
                    original,
                    content: splice.content,
                }),
                None if !splice.content.is_empty() => walk.out.push(Chunk {
                    kind: ChunkKind::Inserted,
                    original: first.unwrap_or(original_end),
                    content: splice.content,
                }),
                None => {}
            }
        }

        walk.copy_until(usize::MAX, true);
        self.chunks = walk.out;
    }
}

/// A rendered range to replace with `content`. Its bounds never fall inside
/// an edited or inserted chunk. An empty range inserts `content`.
#[derive(Debug)]
struct Splice {
    range: Range<usize>,
    content: String,
}

/// Forward walk over the chunk list while building its replacement.
struct ChunkWalk<'a> {
    chunks: &'a [Chunk],
    starts: &'a [usize],
    idx: usize,
    /// Bytes of `chunks[idx]` already copied or consumed. Only original chunks
    /// are ever entered part way.
    consumed: usize,
    out: Vec<Chunk>,
}

impl ChunkWalk<'_> {
    /// The part of the current chunk from `consumed` to `to`.
    fn piece(&self, to: usize) -> Chunk {
        let chunk = &self.chunks[self.idx];
        if chunk.kind != ChunkKind::Original || (self.consumed == 0 && to == chunk.content.len()) {
            return chunk.clone();
        }
        let base = usize::from(chunk.original.start);
        Chunk {
            kind: ChunkKind::Original,
            original: Span::from_range(base + self.consumed..base + to),
            content: chunk.content[self.consumed..to].to_string(),
        }
    }

    /// Copies chunks up to rendered offset `target`. Zero-length chunks at
    /// `target` are copied only if `take_empty` is set.
    fn copy_until(&mut self, target: usize, take_empty: bool) {
        while let Some(chunk) = self.chunks.get(self.idx) {
            let start = self.starts[self.idx];
            let len = chunk.content.len();

            if len == 0 {
                if start < target || (start == target && take_empty) {
                    self.out.push(chunk.clone());
                    self.idx += 1;
                    continue;
                }
                break;
            }

            if start + len <= target {
                let piece = self.piece(len);
                self.out.push(piece);
                self.idx += 1;
                self.consumed = 0;
            } else {
                if start + self.consumed < target {
                    let local = target - start;
                    let piece = self.piece(local);
                    self.out.push(piece);
                    self.consumed = local;
                }
                break;
            }
        }
    }

    /// Where text inserted at the current position points in the original.
    fn anchor(&self) -> Option<Span> {
        let chunk = self.chunks.get(self.idx)?;
        let base = match chunk.kind {
            ChunkKind::Original => usize::from(chunk.original.start) + self.consumed,
            _ => usize::from(chunk.original.start),
        };
        Some(Span::empty(base as u32))
    }

    /// Skips chunks up to rendered offset `end`, returning the original span
    /// of the first piece skipped and the span covering every skipped piece
    /// that has an origin.
    fn consume_until(&mut self, end: usize) -> (Option<Span>, Option<Span>) {
        let mut first = None;
        let mut cover: Option<Span> = None;

        while let Some(chunk) = self.chunks.get(self.idx) {
            let start = self.starts[self.idx];
            let len = chunk.content.len();
            if start + self.consumed >= end {
                break;
            }

            let to = len.min(end - start);
            let piece = self.piece(to);
            if first.is_none() {
                first = Some(piece.original);
            }
            if piece.kind != ChunkKind::Inserted {
                cover = Some(cover.map_or(piece.original, |span| span.cover(piece.original)));
            }

            if to == len {
                self.idx += 1;
                self.consumed = 0;
            } else {
                self.consumed = to;
                break;
            }
        }

        (first, cover)
    }
}

impl TextBuffer for TrackedBuffer {
    fn new(text: &str) -> Self {
        let chunks = if text.is_empty() {
            Vec::new()
        } else {
            vec![Chunk {
                kind: ChunkKind::Original,
                original: Span::from_range(0..text.len()),
                content: text.to_string(),
            }]
        };

        Self {
            original: text.to_string(),
            chunks,
        }
    }

    fn replace(mut self, pattern: &Pattern, with: Replacement<'_>) -> Self {
        let rendered = self.render();
        let edits = pattern.edits(&rendered, &with);
        if edits.is_empty() {
            return self;
        }

        let starts = self.chunk_starts();
        let splices = self.splices(&rendered, &starts, edits);
        self.apply(&starts, splices);
        self
    }

    fn prepend(mut self, text: &str) -> Self {
        match self.chunks.first_mut() {
            Some(chunk) if chunk.kind == ChunkKind::Inserted => chunk.content.insert_str(0, text),
            _ => self.chunks.insert(
                0,
                Chunk {
                    kind: ChunkKind::Inserted,
                    original: Span::empty(0u32),
                    content: text.to_string(),
                },
            ),
        }
        self
    }

    fn append(mut self, text: &str) -> Self {
        let end = Span::from_range(self.original.len()..self.original.len());
        match self.chunks.last_mut() {
            Some(chunk) if chunk.kind == ChunkKind::Inserted => chunk.content.push_str(text),
            _ => self.chunks.push(Chunk {
                kind: ChunkKind::Inserted,
                original: end,
                content: text.to_string(),
            }),
        }
        self
    }

    fn render(&self) -> String {
        self.chunks.iter().map(|chunk| chunk.content.as_str()).collect()
    }

    fn render_map(&self, options: &V3Options) -> Option<SourceMapV3> {
        let rendered = self.render();
        Some(
            self.position_map()
                .to_v3(&rendered, &self.original, options),
        )
    }
}

/// A buffer that edits a plain string and never produces a map.
#[derive(Debug, Clone, Default)]
pub struct PlainBuffer {
    text: String,
}

impl TextBuffer for PlainBuffer {
    fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }

    fn replace(self, pattern: &Pattern, with: Replacement<'_>) -> Self {
        let edits = pattern.edits(&self.text, &with);
        if edits.is_empty() {
            return self;
        }

        let mut out = String::with_capacity(self.text.len());
        let mut last = 0;
        for (range, replacement) in edits {
            out.push_str(&self.text[last..range.start]);
            out.push_str(&replacement);
            last = range.end;
        }
        out.push_str(&self.text[last..]);

        Self { text: out }
    }

    fn prepend(mut self, text: &str) -> Self {
        self.text.insert_str(0, text);
        self
    }

    fn append(mut self, text: &str) -> Self {
        self.text.push_str(text);
        self
    }

    fn render(&self) -> String {
        self.text.clone()
    }

    fn render_map(&self, _options: &V3Options) -> Option<SourceMapV3> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use source_map::ByteOffset;

    fn upper(caps: &Captures<'_>) -> String {
        caps[0].to_uppercase()
    }

    fn edit<B: TextBuffer>(text: &str) -> B {
        let digits = Pattern::global(r"\d+").unwrap();
        let first_word = Pattern::first(r"[a-z]+").unwrap();

        B::new(text)
            .replace(&digits, Replacement::Template("<$0>"))
            .replace(&first_word, Replacement::With(&upper))
            .prepend("// head\n")
            .append("\n// tail")
    }

    #[test]
    fn test_variants_render_identically() {
        let text = "let a = 10 + 20;\nlet b = 3;";
        let tracked: TrackedBuffer = edit(text);
        let plain: PlainBuffer = edit(text);

        assert_eq!(
            tracked.render(),
            "// head\nLET a = <10> + <20>;\nlet b = <3>;\n// tail"
        );
        assert_eq!(tracked.render(), plain.render());
    }

    #[test]
    fn test_first_only_replaces_once() {
        let pattern = Pattern::first("a").unwrap();
        let out = PlainBuffer::new("aaa").replace(&pattern, Replacement::Literal("b"));
        assert_eq!(out.render(), "baa");

        let out = TrackedBuffer::new("aaa").replace(&pattern, Replacement::Literal("b"));
        assert_eq!(out.render(), "baa");
    }

    #[test]
    fn test_literal_does_not_expand_groups() {
        let pattern = Pattern::global("x").unwrap();
        let out = TrackedBuffer::new("x-x").replace(&pattern, Replacement::Literal("$0$"));
        assert_eq!(out.render(), "$0$-$0$");
    }

    #[test]
    fn test_plain_never_maps() {
        let buffer: PlainBuffer = edit("a 1");
        assert!(buffer.render_map(&V3Options::default()).is_none());
    }

    #[test]
    fn test_tracked_maps_unedited_bytes() {
        let pattern = Pattern::global(r"__\$__").unwrap();
        let buffer = TrackedBuffer::new("x = __$__(a, '+', b);")
            .replace(&pattern, Replacement::Literal("__paper_binary_op"))
            .prepend("let y;\n");
        let rendered = buffer.render();
        let map = buffer.position_map();

        // "x" keeps its position relative to the original.
        let x = rendered.find("x =").unwrap() as u32;
        assert_eq!(
            map.original_position(ByteOffset::from(x)),
            Some(ByteOffset::from(0))
        );

        // Anything inside the rewritten call maps to the marker start.
        let call = rendered.find("paper_binary").unwrap() as u32;
        assert_eq!(
            map.original_position(ByteOffset::from(call)),
            Some(ByteOffset::from(4))
        );

        // Arguments after the marker are unedited.
        let args = rendered.find("(a").unwrap() as u32;
        assert_eq!(
            map.original_position(ByteOffset::from(args)),
            Some(ByteOffset::from(9))
        );

        // Prepended text has no origin.
        assert_eq!(map.original_position(ByteOffset::from(0)), None);
    }

    #[test]
    fn test_replace_over_previous_edit() {
        let first = Pattern::global("b").unwrap();
        let second = Pattern::global("aXc").unwrap();
        let buffer = TrackedBuffer::new("abc abc")
            .replace(&first, Replacement::Literal("X"))
            .replace(&second, Replacement::Literal("Y"));

        assert_eq!(buffer.render(), "Y Y");
        let map = buffer.position_map();
        assert_eq!(
            map.original_position(ByteOffset::from(2)),
            Some(ByteOffset::from(4))
        );
    }

    #[test]
    fn test_replace_inside_prepended_text() {
        let pattern = Pattern::first("head").unwrap();
        let buffer = TrackedBuffer::new("body")
            .prepend("head:")
            .replace(&pattern, Replacement::Literal("HEAD"));

        assert_eq!(buffer.render(), "HEAD:body");
        let map = buffer.position_map();
        assert_eq!(map.original_position(ByteOffset::from(0)), None);
        assert_eq!(
            map.original_position(ByteOffset::from(5)),
            Some(ByteOffset::from(0))
        );
    }

    #[test]
    fn test_empty_match_insertion() {
        let pattern = Pattern::first("^").unwrap();
        let tracked = TrackedBuffer::new("abc").replace(&pattern, Replacement::Literal(">"));
        let plain = PlainBuffer::new("abc").replace(&pattern, Replacement::Literal(">"));
        assert_eq!(tracked.render(), ">abc");
        assert_eq!(plain.render(), ">abc");
    }

    #[test]
    fn test_deletion() {
        let pattern = Pattern::first(r"\s+lang='x'").unwrap();
        let buffer =
            TrackedBuffer::new("<script lang='x'>").replace(&pattern, Replacement::Literal(""));
        assert_eq!(buffer.render(), "<script>");
        let map = buffer.position_map();
        assert_eq!(
            map.original_position(ByteOffset::from(7)),
            Some(ByteOffset::from(16))
        );
    }

    #[test]
    fn test_many_edits_keep_positions() {
        let text: String = (0..2000)
            .map(|i| format!("a{i} = __$__(b, '+', c);\n"))
            .collect();
        let marker = Pattern::global(r"__\$__").unwrap();
        let call = Pattern::global(r"__paper_binary_op\(b").unwrap();
        let rewrite = |buffer: TrackedBuffer| {
            buffer
                .replace(&marker, Replacement::Literal("__paper_binary_op"))
                .replace(&call, Replacement::Literal("op(b"))
        };

        let tracked = rewrite(TrackedBuffer::new(&text));
        let plain = PlainBuffer::new(&text)
            .replace(&marker, Replacement::Literal("__paper_binary_op"))
            .replace(&call, Replacement::Literal("op(b"));
        let rendered = tracked.render();
        assert_eq!(rendered, plain.render());

        let map = tracked.position_map();
        let calls = rendered.match_indices("op(b").map(|(i, _)| i);
        let markers = text.match_indices("__$__").map(|(i, _)| i);
        for (generated, original) in calls.zip(markers) {
            assert_eq!(
                map.original_position(ByteOffset::from(generated as u32)),
                Some(ByteOffset::from(original as u32))
            );
        }

        let generated_tails = rendered.match_indices(", c);").map(|(i, _)| i);
        let original_tails = text.match_indices(", c);").map(|(i, _)| i);
        for (generated, original) in generated_tails.zip(original_tails) {
            assert_eq!(
                map.original_position(ByteOffset::from(generated as u32 + 2)),
                Some(ByteOffset::from(original as u32 + 2))
            );
        }
        assert_eq!(map.mappings().count(), 2000 * 2 + 1);
    }

    #[test]
    fn test_insertions_between_edits() {
        let pattern = Pattern::global(r"b|\b").unwrap();
        let tracked = TrackedBuffer::new("ab cd")
            .prepend("> ")
            .replace(&pattern, Replacement::Template("[$0]"));
        let plain = PlainBuffer::new("ab cd")
            .prepend("> ")
            .replace(&pattern, Replacement::Template("[$0]"));
        assert_eq!(tracked.render(), plain.render());

        let rendered = tracked.render();
        let map = tracked.position_map();
        let c = rendered.find('c').unwrap() as u32;
        assert_eq!(
            map.original_position(ByteOffset::from(c)),
            Some(ByteOffset::from(3))
        );
    }

    #[test]
    fn test_render_map_fields() {
        let options = V3Options {
            file: Some("App.svelte".to_string()),
            include_content: true,
            hires: true,
            ..Default::default()
        };
        let map = TrackedBuffer::new("ab")
            .prepend("\n")
            .render_map(&options)
            .unwrap();
        assert_eq!(map.sources, vec!["App.svelte".to_string()]);
        assert_eq!(map.sources_content, Some(vec![Some("ab".to_string())]));
        assert_eq!(map.mappings, ";AAAA,CAAC");
    }

    #[test]
    fn test_buffer_mode_selection() {
        assert_eq!(BufferMode::for_source_maps(true), BufferMode::Tracked);
        assert_eq!(BufferMode::for_source_maps(false), BufferMode::Plain);
    }
}
