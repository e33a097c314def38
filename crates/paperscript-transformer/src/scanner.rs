//! Usage scanning over compiled scripts.
//!
//! Decides which paper.js scope names and which event handlers the generated
//! scaffold has to wire up. Matching is plain substring containment: a name
//! that only appears in a comment or string costs an unused local binding,
//! never a broken program.

/// Names a `PaperScope` exposes, in the order they are destructured.
pub const SCOPE_SYMBOLS: &[&str] = &[
    "version",
    "settings",
    "project",
    "projects",
    "view",
    "tool",
    "tools",
    "Color",
    "CompoundPath",
    "Curve",
    "CurveLocation",
    "Event",
    "Gradient",
    "GradientStop",
    "Group",
    "HitResult",
    "Item",
    "Key",
    "KeyEvent",
    "Layer",
    "Matrix",
    "MouseEvent",
    "PaperScope",
    "PaperScript",
    "Path",
    "PathItem",
    "Point",
    "PointText",
    "Project",
    "Raster",
    "Rectangle",
    "Segment",
    "Shape",
    "Size",
    "Style",
    "SymbolDefinition",
    "SymbolItem",
    "TextItem",
    "Tool",
    "ToolEvent",
    "Tween",
    "View",
];

/// Handlers that are installed on a `Tool`.
pub const TOOL_CALLBACKS: &[&str] = &[
    "onMouseDown",
    "onMouseUp",
    "onMouseDrag",
    "onMouseMove",
    "onActivate",
    "onDeactivate",
    "onEditOptions",
    "onKeyDown",
    "onKeyUp",
];

/// Handlers that are installed on the scope's `View`.
pub const VIEW_CALLBACKS: &[&str] = &["onResize", "onFrame"];

/// The scope names and handlers a script refers to, in table order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Usage {
    /// Entries of [`SCOPE_SYMBOLS`] found in the script.
    pub symbols: Vec<&'static str>,
    /// Entries of [`TOOL_CALLBACKS`] found in the script.
    pub tool_callbacks: Vec<&'static str>,
    /// Entries of [`VIEW_CALLBACKS`] found in the script.
    pub view_callbacks: Vec<&'static str>,
}

/// Scans compiled script text for scope names and event handlers.
pub fn scan_usage(code: &str) -> Usage {
    let present = |table: &[&'static str]| -> Vec<&'static str> {
        table
            .iter()
            .copied()
            .filter(|name| code.contains(name))
            .collect()
    };

    let usage = Usage {
        symbols: present(SCOPE_SYMBOLS),
        tool_callbacks: present(TOOL_CALLBACKS),
        view_callbacks: present(VIEW_CALLBACKS),
    };
    tracing::trace!(?usage, "scanned script usage");
    usage
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_script() {
        assert_eq!(scan_usage(""), Usage::default());
    }

    #[test]
    fn test_symbols_in_table_order() {
        let usage = scan_usage("let c = new Point(1, 2); let p = new Path.Circle(c, 5);");
        // `Path` first even though `Point` appears first in the text.
        assert_eq!(usage.symbols, vec!["Path", "Point"]);
        assert!(usage.tool_callbacks.is_empty());
    }

    #[test]
    fn test_substring_matches_are_reported() {
        let usage = scan_usage("new PathItem()");
        assert_eq!(usage.symbols, vec!["Item", "Path", "PathItem"]);
    }

    #[test]
    fn test_callbacks() {
        let usage = scan_usage(
            "function onMouseDown(event) {}\nfunction onFrame(event) {}\nfunction onKeyUp() {}",
        );
        assert_eq!(usage.tool_callbacks, vec!["onMouseDown", "onKeyUp"]);
        assert_eq!(usage.view_callbacks, vec!["onFrame"]);
        // Matching is case-sensitive.
        assert!(!usage.symbols.contains(&"Event"));
    }

    #[test]
    fn test_comment_mentions_count() {
        let usage = scan_usage("// draws a Rectangle\nlet x = 1;");
        assert_eq!(usage.symbols, vec!["Rectangle"]);
    }
}
