//! Serialization of the arena tree back to XML text.

use crate::engine::{NodeId, NodeKind, Tree};

/// Escapes `&`, `<` and `>` in character data.
pub fn escape_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Escapes attribute values, which additionally need `"` protected.
pub fn escape_attr(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\n' => out.push_str("&#10;"),
            '\t' => out.push_str("&#9;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Serializes the whole document, including an XML declaration when the
/// parsed input carried one.
pub fn serialize(tree: &Tree) -> String {
    let mut out = String::new();
    if let Some(version) = &tree.version {
        out.push_str("<?xml version=\"");
        out.push_str(version);
        out.push('"');
        if let Some(encoding) = &tree.encoding {
            out.push_str(" encoding=\"");
            out.push_str(encoding);
            out.push('"');
        }
        if let Some(standalone) = tree.standalone {
            out.push_str(" standalone=\"");
            out.push_str(if standalone { "yes" } else { "no" });
            out.push('"');
        }
        out.push_str("?>");
    }
    for child in tree.children(tree.root()) {
        serialize_into(tree, child, &mut out);
    }
    out
}

/// Serializes a single node and its subtree.
pub fn serialize_node(tree: &Tree, id: NodeId) -> String {
    let mut out = String::new();
    serialize_into(tree, id, &mut out);
    out
}

fn serialize_into(tree: &Tree, id: NodeId, out: &mut String) {
    match &tree.node(id).kind {
        NodeKind::Document => {
            for child in tree.children(id) {
                serialize_into(tree, child, out);
            }
        }
        NodeKind::Element {
            name,
            prefix,
            attributes,
            ..
        } => {
            out.push('<');
            if let Some(p) = prefix {
                out.push_str(p);
                out.push(':');
            }
            out.push_str(name);
            for attr in attributes {
                out.push(' ');
                if let Some(p) = &attr.prefix {
                    out.push_str(p);
                    out.push(':');
                }
                out.push_str(&attr.name);
                out.push_str("=\"");
                out.push_str(&escape_attr(&attr.value));
                out.push('"');
            }
            if tree.first_child(id).is_none() {
                out.push_str("/>");
                return;
            }
            out.push('>');
            for child in tree.children(id) {
                serialize_into(tree, child, out);
            }
            out.push_str("</");
            if let Some(p) = prefix {
                out.push_str(p);
                out.push(':');
            }
            out.push_str(name);
            out.push('>');
        }
        NodeKind::Text { content } => out.push_str(&escape_text(content)),
        NodeKind::CData { content } => {
            out.push_str("<![CDATA[");
            out.push_str(content);
            out.push_str("]]>");
        }
        NodeKind::Comment { content } => {
            out.push_str("<!--");
            out.push_str(content);
            out.push_str("-->");
        }
        NodeKind::ProcessingInstruction { target, data } => {
            out.push_str("<?");
            out.push_str(target);
            if let Some(d) = data {
                out.push(' ');
                out.push_str(d);
            }
            out.push_str("?>");
        }
    }
}
