//! XInclude substitution over the arena tree.
//!
//! Directives in the XInclude namespace are replaced in place by the
//! referenced content. Failures are best-effort: a directive that cannot
//! be resolved is reported through the error bridge and left in the tree
//! untouched (unless it carries a fallback), while the remaining
//! directives are still processed.

use crate::engine::parser;
use crate::engine::{NodeId, NodeKind, Tree};
use crate::errorlog::{ErrorBridge, ErrorCode, ErrorDomain, ErrorLevel, ErrorLogEntry};

/// The XInclude namespace.
pub const XINCLUDE_NS: &str = "http://www.w3.org/2001/XInclude";

/// Knobs for the substitution pass.
#[derive(Debug, Clone)]
pub struct XIncludeOptions {
    /// Maximum nesting depth of included documents.
    pub max_depth: usize,
}

impl Default for XIncludeOptions {
    fn default() -> Self {
        XIncludeOptions { max_depth: 50 }
    }
}

/// Supplies the content behind an `href`.
pub trait ResourceLoader {
    fn load(&self, href: &str) -> std::io::Result<String>;
}

impl<F> ResourceLoader for F
where
    F: Fn(&str) -> std::io::Result<String>,
{
    fn load(&self, href: &str) -> std::io::Result<String> {
        self(href)
    }
}

/// Replaces every XInclude directive in the subtree rooted at `start`,
/// returning the number of substitutions performed.
pub fn process_subtree(
    tree: &mut Tree,
    start: NodeId,
    loader: &dyn ResourceLoader,
    bridge: &mut ErrorBridge,
    options: &XIncludeOptions,
) -> usize {
    let mut active: Vec<String> = Vec::new();
    process_level(tree, start, loader, bridge, options, &mut active, 0)
}

fn process_level(
    tree: &mut Tree,
    start: NodeId,
    loader: &dyn ResourceLoader,
    bridge: &mut ErrorBridge,
    options: &XIncludeOptions,
    active: &mut Vec<String>,
    depth: usize,
) -> usize {
    let mut directives: Vec<NodeId> = Vec::new();
    if is_include(tree, start) {
        directives.push(start);
    }
    directives.extend(tree.descendants(start).filter(|&id| is_include(tree, id)));

    let mut substituted = 0;
    for directive in directives {
        // A directive nested inside an earlier substitution target may be
        // gone already.
        if !tree.is_live(directive) {
            continue;
        }
        substituted += expand_directive(tree, directive, loader, bridge, options, active, depth);
    }
    substituted
}

/// Expands one directive, returning the number of substitutions it
/// produced (nested inclusions included). On failure the directive stays
/// in the tree (or is replaced by its fallback) and an entry is reported.
fn expand_directive(
    tree: &mut Tree,
    directive: NodeId,
    loader: &dyn ResourceLoader,
    bridge: &mut ErrorBridge,
    options: &XIncludeOptions,
    active: &mut Vec<String>,
    depth: usize,
) -> usize {
    let Some(href) = tree.attribute(directive, "href").map(str::to_owned) else {
        report(
            bridge,
            ErrorLevel::Error,
            ErrorCode::XIncludeMissingHref,
            "include directive has no href attribute".to_string(),
        );
        return 0;
    };
    let parse_mode = tree
        .attribute(directive, "parse")
        .unwrap_or("xml")
        .to_owned();
    if parse_mode != "xml" && parse_mode != "text" {
        report(
            bridge,
            ErrorLevel::Error,
            ErrorCode::XIncludeInvalidParse,
            format!("unsupported parse mode '{parse_mode}' for '{href}'"),
        );
        return 0;
    }

    if active.iter().any(|h| *h == href) {
        report(
            bridge,
            ErrorLevel::Error,
            ErrorCode::XIncludeRecursion,
            format!("inclusion cycle detected at '{href}'"),
        );
        return 0;
    }
    if depth >= options.max_depth {
        report(
            bridge,
            ErrorLevel::Error,
            ErrorCode::XIncludeDepthLimit,
            format!("inclusion depth limit of {} reached at '{href}'", options.max_depth),
        );
        return 0;
    }

    let content = match loader.load(&href) {
        Ok(c) => c,
        Err(e) => {
            let substituted =
                substitute_fallback(tree, directive, loader, bridge, options, active, depth);
            // A fallback that substitutes makes the miss recoverable.
            report(
                bridge,
                if substituted > 0 { ErrorLevel::Warning } else { ErrorLevel::Error },
                ErrorCode::XIncludeResourceError,
                format!("could not load '{href}': {e}"),
            );
            return substituted;
        }
    };

    if parse_mode == "text" {
        let text = tree.create_node(NodeKind::Text { content });
        tree.insert_before(directive, text);
        tree.free_subtree(directive);
        return 1;
    }

    bridge.connect();
    let parsed = parser::parse_str(&content, bridge);
    let nested_log = bridge.disconnect();
    let mut included = match parsed {
        Ok(t) => {
            bridge.absorb(nested_log);
            t
        }
        Err(e) => {
            let substituted =
                substitute_fallback(tree, directive, loader, bridge, options, active, depth);
            // The nested fatal diagnostics would override the recovery.
            if substituted == 0 {
                bridge.absorb(nested_log);
            }
            report(
                bridge,
                if substituted > 0 { ErrorLevel::Warning } else { ErrorLevel::Error },
                ErrorCode::XIncludeParseFailure,
                format!("'{href}' is not well-formed: {}", e.message),
            );
            return substituted;
        }
    };

    // Resolve the included document's own directives first, so the copy
    // below transplants fully expanded content.
    active.push(href);
    let root = included.root();
    let nested = process_level(
        &mut included,
        root,
        loader,
        bridge,
        options,
        active,
        depth + 1,
    );
    active.pop();

    let top_level: Vec<NodeId> = included.children(included.root()).collect();
    for src in top_level {
        let copy = tree.copy_subtree_from(&included, src);
        tree.insert_before(directive, copy);
    }
    tree.free_subtree(directive);
    nested + 1
}

/// Replaces a failed directive with the children of its fallback element,
/// when one is present. Without a fallback the directive stays put.
fn substitute_fallback(
    tree: &mut Tree,
    directive: NodeId,
    loader: &dyn ResourceLoader,
    bridge: &mut ErrorBridge,
    options: &XIncludeOptions,
    active: &mut Vec<String>,
    depth: usize,
) -> usize {
    let Some(fallback) = tree
        .children(directive)
        .find(|&id| is_xinclude_element(tree, id, "fallback"))
    else {
        return 0;
    };

    let mut substituted = 1;
    let content: Vec<NodeId> = tree.children(fallback).collect();
    for child in content {
        tree.detach(child);
        tree.insert_before(directive, child);
        // Fallback content may itself contain directives.
        substituted += process_level(tree, child, loader, bridge, options, active, depth + 1);
    }
    tree.free_subtree(directive);
    substituted
}

fn is_include(tree: &Tree, id: NodeId) -> bool {
    is_xinclude_element(tree, id, "include")
}

fn is_xinclude_element(tree: &Tree, id: NodeId, local: &str) -> bool {
    tree.is_live(id)
        && tree.name(id) == Some(local)
        && tree.namespace(id) == Some(XINCLUDE_NS)
}

fn report(bridge: &mut ErrorBridge, level: ErrorLevel, code: ErrorCode, message: String) {
    bridge.report(ErrorLogEntry {
        domain: ErrorDomain::XInclude,
        code,
        level,
        message,
        filename: None,
        line: 0,
        column: 0,
    });
}
