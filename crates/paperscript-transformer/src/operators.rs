//! Rewriting of the PaperScript compiler's operator markers.
//!
//! `paper.PaperScript.compile` turns `a + b` into `__$__(a, '+', b)` and `-a`
//! into `$__('-', a)`. The markers are swapped for calls to the dispatch
//! functions emitted by [`dispatch_runtime`].

use crate::buffer::{Pattern, Replacement, TextBuffer};
use crate::dispatch::{BinaryOperator, UnaryOperator};
use regex::Captures;
use std::fmt::Write;
use std::sync::OnceLock;

/// Marker the dialect compiler emits for a binary operator.
pub const BINARY_MARKER: &str = "__$__";
/// Marker the dialect compiler emits for a unary operator.
pub const UNARY_MARKER: &str = "$__";
/// Name of the emitted binary dispatch function.
pub const BINARY_DISPATCH: &str = "__paper_binary_op";
/// Name of the emitted unary dispatch function.
pub const UNARY_DISPATCH: &str = "__paper_unary_op";

fn binary_marker() -> &'static Pattern {
    static PATTERN: OnceLock<Pattern> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Pattern::global(&regex::escape(BINARY_MARKER)).expect("binary marker pattern is valid")
    })
}

/// `$__` not preceded by `__`.
///
/// The regex crate has no lookbehind, so the (at most two) preceding characters
/// are matched as group 1 and written back unchanged. A preceding `__` can only
/// be the tail of a binary marker, which never matches here.
fn unary_marker() -> &'static Pattern {
    static PATTERN: OnceLock<Pattern> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let pattern = format!(r"(^_?|[^_]_?){}", regex::escape(UNARY_MARKER));
        Pattern::global(&pattern).expect("unary marker pattern is valid")
    })
}

fn unary_call(caps: &Captures<'_>) -> String {
    format!("{}{UNARY_DISPATCH}", &caps[1])
}

/// Replaces operator markers with dispatch calls.
///
/// Binary markers go first so the unary pass sees the marker layout the
/// compiler produced rather than a partially rewritten one.
pub fn rewrite_operators<B: TextBuffer>(script: B) -> B {
    script
        .replace(binary_marker(), Replacement::Literal(BINARY_DISPATCH))
        .replace(unary_marker(), Replacement::With(&unary_call))
}

/// JavaScript for the operator tables and both dispatch functions.
pub fn dispatch_runtime() -> String {
    let mut js = String::from("let binaryOperators = {\n");
    let binary: Vec<String> = BinaryOperator::ALL
        .iter()
        .map(|op| format!("    '{}': '{}'", op.symbol(), op.method()))
        .collect();
    js.push_str(&binary.join(",\n"));
    js.push_str("\n};\nlet unaryOperators = {\n");
    let unary: Vec<String> = UnaryOperator::ALL
        .iter()
        .map(|op| format!("    '{}': '{}'", op.symbol(), op.method()))
        .collect();
    js.push_str(&unary.join(",\n"));
    js.push_str("\n};\n");

    let _ = write!(
        js,
        "function {BINARY_DISPATCH}(left, operator, right) {{\n    \
         let handler = binaryOperators[operator];\n    \
         if (left?.[handler]) {{\n        \
         let res = left[handler](right);\n        \
         return operator === '{}' ? !res : res;\n    \
         }}\n    \
         switch (operator) {{\n",
        BinaryOperator::NotEquals.symbol()
    );
    for op in BinaryOperator::ALL {
        let _ = writeln!(
            js,
            "    case '{0}': return left {0} right;",
            op.symbol()
        );
    }
    js.push_str(
        "    default: throw new Error(`Unsupported operator: ${operator}`);\n    }\n}\n",
    );

    let _ = write!(
        js,
        "function {UNARY_DISPATCH}(operator, value) {{\n    \
         let handler = unaryOperators[operator];\n    \
         return value?.[handler] ? value[handler]() : operator === '{}' ? -value : +value;\n\
         }}\n",
        UnaryOperator::Negate.symbol()
    );

    js
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{PlainBuffer, TrackedBuffer};
    use pretty_assertions::assert_eq;

    fn rewrite(code: &str) -> String {
        rewrite_operators(PlainBuffer::new(code)).render()
    }

    #[test]
    fn test_binary_marker() {
        assert_eq!(
            rewrite("var c = __$__(a, '+', b);"),
            "var c = __paper_binary_op(a, '+', b);"
        );
    }

    #[test]
    fn test_unary_marker() {
        assert_eq!(
            rewrite("var c = $__('-', a);"),
            "var c = __paper_unary_op('-', a);"
        );
        assert_eq!(rewrite("$__('-', a)"), "__paper_unary_op('-', a)");
        assert_eq!(rewrite("_$__('-', a)"), "___paper_unary_op('-', a)");
    }

    #[test]
    fn test_adjacent_markers() {
        assert_eq!(
            rewrite("__$__($__('-', a), '*', __$__(b, '+', $__('-', c)))"),
            "__paper_binary_op(__paper_unary_op('-', a), '*', \
             __paper_binary_op(b, '+', __paper_unary_op('-', c)))"
        );
        assert_eq!(
            rewrite("$__('-', $__('-', a))"),
            "__paper_unary_op('-', __paper_unary_op('-', a))"
        );
    }

    #[test]
    fn test_unary_after_double_underscore_is_left_alone() {
        let untouched = PlainBuffer::new("x__$__(a)")
            .replace(unary_marker(), Replacement::With(&unary_call))
            .render();
        assert_eq!(untouched, "x__$__(a)");
        assert_eq!(rewrite("x__$__(a)"), "x__paper_binary_op(a)");
    }

    #[test]
    fn test_variants_agree() {
        let code = "var p = __$__(__$__(a, '*', 2), '-', $__('-', b));\nview.draw();";
        assert_eq!(
            rewrite_operators(TrackedBuffer::new(code)).render(),
            rewrite(code)
        );
    }

    #[test]
    fn test_runtime_shape() {
        let js = dispatch_runtime();
        assert!(js.contains("    '!=': '__equals'\n};"));
        assert!(js.contains("    '+': '__self'\n};"));
        assert!(js.contains("function __paper_binary_op(left, operator, right) {"));
        assert!(js.contains("return operator === '!=' ? !res : res;"));
        assert!(js.contains("    case '%': return left % right;\n"));
        assert!(js.contains("default: throw new Error(`Unsupported operator: ${operator}`);"));
        assert!(js.contains(
            "return value?.[handler] ? value[handler]() : operator === '-' ? -value : +value;"
        ));
    }
}
