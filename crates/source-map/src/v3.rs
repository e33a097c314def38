//! Rendering of span-based source maps as standard version 3 source maps.

use crate::builder::MappingKind;
use crate::{LineCol, LineCursor, SourceMap};
use serde::{Deserialize, Serialize};
use text_size::TextSize;

const BASE64_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Options controlling how a [`SourceMap`] is rendered to a v3 map.
#[derive(Debug, Clone, Default)]
pub struct V3Options {
    /// Name of the generated file (`file` field).
    pub file: Option<String>,
    /// Name of the original file. Falls back to `file`.
    pub source: Option<String>,
    /// Embed the original text in `sourcesContent`.
    pub include_content: bool,
    /// Emit a segment for every character of unchanged text instead of one per line.
    pub hires: bool,
}

/// A version 3 source map, as consumed by browsers and bundlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMapV3 {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources_content: Option<Vec<Option<String>>>,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub mappings: String,
}

impl SourceMapV3 {
    /// Serializes the map to its JSON text form.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parses a map from JSON text.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl SourceMap {
    /// Renders this map as a v3 source map.
    ///
    /// `generated` is the text the map's generated spans index into, `original`
    /// the text its original spans index into. Columns are UTF-16 based.
    pub fn to_v3(&self, generated: &str, original: &str, options: &V3Options) -> SourceMapV3 {
        let mut generated_cursor = LineCursor::new(generated);
        let mut original_cursor = LineCursor::new(original);
        let mut segments = Vec::new();

        for mapping in self.mappings() {
            let Some(text) = mapping.generated.slice(generated) else {
                continue;
            };

            let mut previous = None;
            for (i, ch) in text.char_indices() {
                let line_start = i == 0 || previous == Some('\n');
                previous = Some(ch);

                let emit = match mapping.kind {
                    MappingKind::Verbatim => options.hires || line_start,
                    MappingKind::Transformed => line_start,
                };
                if !emit {
                    continue;
                }

                let delta = match mapping.kind {
                    MappingKind::Verbatim => TextSize::from(i as u32),
                    MappingKind::Transformed => TextSize::from(0),
                };
                let generated_pos =
                    generated_cursor.seek(mapping.generated.start + TextSize::from(i as u32));
                let original_pos = original_cursor.seek(mapping.original.start + delta);

                if let (Some(g), Some(o)) = (generated_pos, original_pos) {
                    segments.push((g, o));
                }
            }
        }

        let source = options
            .source
            .clone()
            .or_else(|| options.file.clone())
            .unwrap_or_default();

        SourceMapV3 {
            version: 3,
            file: options.file.clone(),
            sources: vec![source],
            sources_content: options
                .include_content
                .then(|| vec![Some(original.to_string())]),
            names: Vec::new(),
            mappings: encode_mappings(&segments),
        }
    }
}

/// Encodes `(generated, original)` segment pairs, sorted by generated position,
/// into the `mappings` string. All segments refer to source index 0.
fn encode_mappings(segments: &[(LineCol, LineCol)]) -> String {
    let mut out = String::new();
    let mut line = 0u32;
    let mut first_in_line = true;
    let mut prev_generated_col = 0i64;
    let mut prev_original_line = 0i64;
    let mut prev_original_col = 0i64;

    for (generated, original) in segments {
        while line < generated.line {
            out.push(';');
            line += 1;
            prev_generated_col = 0;
            first_in_line = true;
        }
        if !first_in_line {
            out.push(',');
        }
        first_in_line = false;

        encode_vlq(&mut out, i64::from(generated.col) - prev_generated_col);
        encode_vlq(&mut out, 0);
        encode_vlq(&mut out, i64::from(original.line) - prev_original_line);
        encode_vlq(&mut out, i64::from(original.col) - prev_original_col);

        prev_generated_col = i64::from(generated.col);
        prev_original_line = i64::from(original.line);
        prev_original_col = i64::from(original.col);
    }

    out
}

/// Appends the base64 VLQ encoding of `value` to `out`.
pub fn encode_vlq(out: &mut String, value: i64) {
    let mut vlq = if value < 0 {
        ((-value) << 1) | 1
    } else {
        value << 1
    };

    loop {
        let mut digit = (vlq & 0b11111) as usize;
        vlq >>= 5;
        if vlq > 0 {
            digit |= 0b100000;
        }
        out.push(BASE64_ALPHABET[digit] as char);
        if vlq == 0 {
            break;
        }
    }
}
