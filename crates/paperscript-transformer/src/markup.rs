//! Component markup edits.
//!
//! Both edits are shallow, first-match regex rewrites: the first
//! `<script lang="paperscript">` loses its `lang` attribute and the first
//! `<canvas>` is bound to the scope's canvas variable. Components with several
//! canvases only get the first one bound.

use crate::buffer::{Pattern, Replacement, TextBuffer};
use crate::scaffold::CANVAS_VAR;
use regex::Captures;
use std::sync::OnceLock;

/// Value of the `lang` attribute that marks a PaperScript component.
pub const DIALECT_LANG: &str = "paperscript";

fn lang_attribute() -> &'static Pattern {
    static PATTERN: OnceLock<Pattern> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let pattern = format!(r#"(?i)<script\s+lang=["']{DIALECT_LANG}["']"#);
        Pattern::first(&pattern).expect("lang attribute pattern is valid")
    })
}

fn canvas_tag() -> &'static Pattern {
    static PATTERN: OnceLock<Pattern> = OnceLock::new();
    PATTERN.get_or_init(|| Pattern::first(r"(?i)<canvas\s*(.*?)>").expect("canvas pattern is valid"))
}

fn bound_canvas(caps: &Captures<'_>) -> String {
    format!("<canvas {} bind:this={{{CANVAS_VAR}}}>", &caps[1])
}

/// Returns true if the component declares a PaperScript script.
pub fn is_paperscript(content: &str) -> bool {
    lang_attribute().regex().is_match(content.trim())
}

/// Turns the first `<script lang="paperscript"` into a plain `<script`.
pub fn remove_lang_attribute<B: TextBuffer>(markup: B) -> B {
    markup.replace(lang_attribute(), Replacement::Literal("<script"))
}

/// Adds `bind:this={__paper_canvas}` to the first `<canvas>` tag, keeping its
/// existing attributes.
pub fn bind_canvas<B: TextBuffer>(markup: B) -> B {
    markup.replace(canvas_tag(), Replacement::With(&bound_canvas))
}
