//! Runtime scaffolding around a compiled PaperScript body.
//!
//! The body ends up inside an `onMount` callback: the scope is set up against
//! the bound canvas, the names the body uses are destructured from the scope,
//! and after the body has run its event handlers are installed on a tool and on
//! the view.

use crate::buffer::TextBuffer;
use crate::operators::{dispatch_runtime, rewrite_operators};
use crate::scanner::{scan_usage, Usage};
use std::fmt::Write;

/// Variable holding the component's `PaperScope`.
pub const SCOPE_VAR: &str = "__paper_scope";
/// Variable the canvas element is bound to.
pub const CANVAS_VAR: &str = "__paper_canvas";
/// Variable holding the tool that receives mouse and key handlers.
pub const TOOL_VAR: &str = "__tool";

/// Rewrites operator markers and wraps the script in the runtime scaffold.
pub fn inject_scaffold<B: TextBuffer>(script: B) -> B {
    let script = rewrite_operators(script);
    let usage = scan_usage(&script.render());
    tracing::debug!(
        symbols = usage.symbols.len(),
        tool_callbacks = usage.tool_callbacks.len(),
        view_callbacks = usage.view_callbacks.len(),
        "injecting scaffold"
    );

    script
        .prepend(&prologue(&usage))
        .append(&epilogue(&usage))
}

/// Code placed before the script body. Leaves the `onMount` callback open.
pub fn prologue(usage: &Usage) -> String {
    let mut js = format!(
        "\nimport paper from 'paper';\n\
         import {{ onMount }} from 'svelte';\n\
         let {CANVAS_VAR};\n\
         let {SCOPE_VAR} = new paper.PaperScope();\n"
    );
    js.push_str(&dispatch_runtime());
    let _ = write!(
        js,
        "onMount(() => {{\n    {SCOPE_VAR}.setup({CANVAS_VAR});\n"
    );

    if !usage.symbols.is_empty() {
        let names: String = usage.symbols.iter().map(|name| format!("{name},")).collect();
        let _ = writeln!(js, "    let {{{names}}} = {SCOPE_VAR};");
    }

    js
}

/// Code placed after the script body. Closes the `onMount` callback.
///
/// Assigning a tool handler is wrapped in `try`/`catch` and failures are
/// dropped, so a non-function value that shares a handler name cannot break
/// mounting. This also hides genuine mistakes in handler definitions.
pub fn epilogue(usage: &Usage) -> String {
    let mut js = format!("\n    let {TOOL_VAR} = new {SCOPE_VAR}.Tool();\n");

    for name in &usage.tool_callbacks {
        let _ = write!(
            js,
            "    try {{\n        \
             if (typeof {name} === 'function') {{\n            \
             {TOOL_VAR}.{name} = {name};\n        \
             }}\n    \
             }} catch (e) {{}}\n"
        );
    }

    for name in &usage.view_callbacks {
        let _ = writeln!(
            js,
            "    if (typeof {name} === 'function') {{ {SCOPE_VAR}.view.{name} = {name}; }}"
        );
    }

    let _ = write!(
        js,
        "    {SCOPE_VAR}.view.emit('resize', {{size: {SCOPE_VAR}.view.size, delta: new {SCOPE_VAR}.Point()}});\n    \
         {SCOPE_VAR}.view.requestUpdate();\n\
         }});\n"
    );

    js
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{PlainBuffer, TrackedBuffer};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_no_destructuring_without_symbols() {
        let js = prologue(&Usage::default());
        assert!(!js.contains("= __paper_scope;"));
        assert!(js.ends_with("onMount(() => {\n    __paper_scope.setup(__paper_canvas);\n"));
    }

    #[test]
    fn test_destructures_used_symbols() {
        let usage = Usage {
            symbols: vec!["view", "Path", "Point"],
            ..Default::default()
        };
        let js = prologue(&usage);
        assert!(js.ends_with("    let {view,Path,Point,} = __paper_scope;\n"));
        assert!(js.starts_with("\nimport paper from 'paper';\nimport { onMount } from 'svelte';\n"));
        assert!(js.contains("let __paper_scope = new paper.PaperScope();\n"));
        assert!(js.contains("function __paper_binary_op(left, operator, right) {"));
        assert!(js.contains("function __paper_unary_op(operator, value) {"));
    }

    #[test]
    fn test_epilogue_wires_callbacks() {
        let usage = Usage {
            tool_callbacks: vec!["onMouseDown"],
            view_callbacks: vec!["onResize", "onFrame"],
            ..Default::default()
        };
        let js = epilogue(&usage);
        assert_eq!(
            js,
            "\n    let __tool = new __paper_scope.Tool();\n\
             \x20   try {\n\
             \x20       if (typeof onMouseDown === 'function') {\n\
             \x20           __tool.onMouseDown = onMouseDown;\n\
             \x20       }\n\
             \x20   } catch (e) {}\n\
             \x20   if (typeof onResize === 'function') { __paper_scope.view.onResize = onResize; }\n\
             \x20   if (typeof onFrame === 'function') { __paper_scope.view.onFrame = onFrame; }\n\
             \x20   __paper_scope.view.emit('resize', {size: __paper_scope.view.size, delta: new __paper_scope.Point()});\n\
             \x20   __paper_scope.view.requestUpdate();\n\
             });\n"
        );
    }

    #[test]
    fn test_inject_wraps_body() {
        let body = "\nvar p = new Path();\np.add(__$__(view.center, '+', 10));\nfunction onFrame() {}\n";
        let out = inject_scaffold(PlainBuffer::new(body)).render();

        let setup = out.find("__paper_scope.setup(__paper_canvas);").unwrap();
        let destructure = out.find("let {view,Path,} = __paper_scope;").unwrap();
        let call = out.find("p.add(__paper_binary_op(view.center, '+', 10));").unwrap();
        let frame = out
            .find("if (typeof onFrame === 'function')")
            .unwrap();
        assert!(setup < destructure && destructure < call && call < frame);
        assert!(out.ends_with("__paper_scope.view.requestUpdate();\n});\n"));
        assert!(!out.contains("__$__"));
    }

    #[test]
    fn test_variants_agree() {
        let body = "var c = $__('-', new Point(1, 2));\nfunction onKeyDown(e) {}\n";
        assert_eq!(
            inject_scaffold(TrackedBuffer::new(body)).render(),
            inject_scaffold(PlainBuffer::new(body)).render()
        );
    }
}
