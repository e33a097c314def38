//! A minimal host that drives preprocessing stages over a component file.
//!
//! Stages run in order. For each stage the markup hook sees the whole file,
//! then the script hook sees the body of every `<script>` element, in document
//! order. Hook results replace the text they were given before the next stage
//! runs.

use crate::preprocess::{PassContext, PreprocessError, PreprocessInput, PreprocessorStage};
use regex::Regex;
use source_map::SourceMapV3;
use std::fmt;
use std::ops::Range;
use std::sync::OnceLock;

fn script_element() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)<!--.*?-->|<script(\s[^>]*)?>(.*?)</script\s*>")
            .expect("script element pattern is valid")
    })
}

fn attribute() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"([^\s=/]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#)
            .expect("attribute pattern is valid")
    })
}

/// A `<script>` element found in a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptBlock {
    /// Attributes of the opening tag, in source order.
    pub attributes: Vec<(String, Option<String>)>,
    /// Byte range of the element body.
    pub body: Range<usize>,
}

/// Finds `<script>` elements outside of HTML comments.
pub fn script_blocks(content: &str) -> Vec<ScriptBlock> {
    script_element()
        .captures_iter(content)
        .filter_map(|caps| {
            let body = caps.get(2)?;
            let attributes = caps
                .get(1)
                .map(|attrs| parse_attributes(attrs.as_str()))
                .unwrap_or_default();
            Some(ScriptBlock {
                attributes,
                body: body.range(),
            })
        })
        .collect()
}

fn parse_attributes(source: &str) -> Vec<(String, Option<String>)> {
    attribute()
        .captures_iter(source)
        .map(|caps| {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|value| value.as_str().to_string());
            (caps[1].to_string(), value)
        })
        .collect()
}

/// Which hook produced a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    Markup,
    Script,
}

impl Hook {
    pub fn as_str(self) -> &'static str {
        match self {
            Hook::Markup => "markup",
            Hook::Script => "script",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A map emitted by one hook invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookMap {
    pub stage: &'static str,
    pub hook: Hook,
    pub map: SourceMapV3,
}

/// The result of running every stage over a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostOutput {
    pub code: String,
    /// Maps in the order the hooks produced them.
    pub maps: Vec<HookMap>,
}

/// Runs preprocessing stages the way a component compiler would.
pub struct Host;

impl Host {
    /// Runs `stages` over `content`, giving each stage a fresh [`PassContext`].
    pub fn run(
        stages: &[Box<dyn PreprocessorStage>],
        content: &str,
        filename: Option<&str>,
    ) -> Result<HostOutput, PreprocessError> {
        let mut code = content.to_string();
        let mut maps = Vec::new();

        for stage in stages {
            let mut ctx = PassContext::new();

            let input = PreprocessInput::new(code.as_str(), filename);
            if let Some(processed) = stage.markup(&mut ctx, &input)? {
                code = processed.code;
                if let Some(map) = processed.map {
                    maps.push(HookMap {
                        stage: stage.name(),
                        hook: Hook::Markup,
                        map,
                    });
                }
            }

            let blocks = script_blocks(&code);
            let mut spliced = String::with_capacity(code.len());
            let mut last = 0;
            let mut replaced = 0usize;
            for block in blocks {
                let input = PreprocessInput {
                    content: code[block.body.clone()].to_string(),
                    filename: filename.map(str::to_string),
                    attributes: block.attributes,
                };
                let Some(processed) = stage.script(&ctx, &input)? else {
                    continue;
                };

                spliced.push_str(&code[last..block.body.start]);
                spliced.push_str(&processed.code);
                last = block.body.end;
                replaced += 1;
                if let Some(map) = processed.map {
                    maps.push(HookMap {
                        stage: stage.name(),
                        hook: Hook::Script,
                        map,
                    });
                }
            }
            if replaced > 0 {
                spliced.push_str(&code[last..]);
                code = spliced;
            }

            tracing::debug!(
                stage = stage.name(),
                ?filename,
                detection = ?ctx.detection(),
                scripts = replaced,
                "stage finished"
            );
        }

        Ok(HostOutput { code, maps })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_script_blocks() {
        let content = "<!-- <script>ignored</script> -->\n\
                       <script context=\"module\" lang='paperscript' defer>a</script>\n\
                       <div></div>\n\
                       <script>\nb\n</script >";
        let blocks = script_blocks(content);
        assert_eq!(blocks.len(), 2);
        assert_eq!(&content[blocks[0].body.clone()], "a");
        assert_eq!(
            blocks[0].attributes,
            vec![
                ("context".to_string(), Some("module".to_string())),
                ("lang".to_string(), Some("paperscript".to_string())),
                ("defer".to_string(), None),
            ]
        );
        assert_eq!(&content[blocks[1].body.clone()], "\nb\n");
        assert!(blocks[1].attributes.is_empty());
    }

    #[test]
    fn test_empty_stage_list() {
        let out = Host::run(&[], "<script>a</script>", None).unwrap();
        assert_eq!(out.code, "<script>a</script>");
        assert!(out.maps.is_empty());
    }

    #[test]
    fn test_hook_names() {
        assert_eq!(Hook::Markup.to_string(), "markup");
        assert_eq!(Hook::Script.as_str(), "script");
    }
}
