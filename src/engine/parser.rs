//! Event-driven tree construction on top of `quick-xml`.
//!
//! The tokenizing and well-formedness machinery is quick-xml's job; this
//! module walks its event stream, resolves namespace prefixes against the
//! in-scope declaration stack, and builds the arena tree. Recoverable
//! issues (duplicate attributes, unbound prefixes) are reported through the
//! error bridge and parsing continues; fatal issues abort with a
//! `ParseError` whose position points into the input.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::engine::node::Attribute;
use crate::engine::{NodeId, NodeKind, Tree};
use crate::error::ParseError;
use crate::errorlog::{ErrorBridge, ErrorCode, ErrorDomain, ErrorLevel, ErrorLogEntry};

/// The fixed namespace bound to the `xml` prefix.
const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// One in-scope namespace declaration: `(prefix, uri)`. A `None` prefix is
/// the default namespace; a `None` uri un-declares it.
type NsDecl = (Option<String>, Option<String>);

/// Parses a UTF-8 XML string into a tree, reporting diagnostics through
/// the bridge.
///
/// On failure the returned `ParseError` carries the position of the fatal
/// error; the caller attaches the bridge's log to it.
pub fn parse_str(input: &str, bridge: &mut ErrorBridge) -> Result<Tree, ParseError> {
    let mut reader = Reader::from_str(input);
    let mut tree = Tree::new();
    let mut stack: Vec<NodeId> = vec![tree.root()];
    let mut ns_frames: Vec<Vec<NsDecl>> = Vec::new();
    let mut seen_root = false;

    loop {
        match reader.read_event() {
            Err(e) => {
                let offset = usize::try_from(reader.error_position()).unwrap_or(0);
                let (line, column) = position_at(input, offset);
                return Err(fatal(
                    bridge,
                    ErrorCode::NotWellFormed,
                    format!("{e}"),
                    line,
                    column,
                ));
            }
            Ok(Event::Decl(d)) => {
                tree.version = d
                    .version()
                    .ok()
                    .map(|v| String::from_utf8_lossy(&v).into_owned());
                tree.encoding = d
                    .encoding()
                    .and_then(Result::ok)
                    .map(|v| String::from_utf8_lossy(&v).into_owned());
                tree.standalone = d
                    .standalone()
                    .and_then(Result::ok)
                    .map(|v| v.as_ref() == b"yes");
            }
            Ok(Event::Start(ref e)) => {
                let id = open_element(
                    input,
                    &reader,
                    &mut tree,
                    &stack,
                    &mut ns_frames,
                    &mut seen_root,
                    e,
                    bridge,
                )?;
                stack.push(id);
            }
            Ok(Event::Empty(ref e)) => {
                open_element(
                    input,
                    &reader,
                    &mut tree,
                    &stack,
                    &mut ns_frames,
                    &mut seen_root,
                    e,
                    bridge,
                )?;
                ns_frames.pop();
            }
            Ok(Event::End(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if stack.len() <= 1 {
                    let (line, column) = current_position(input, &reader);
                    return Err(fatal(
                        bridge,
                        ErrorCode::NotWellFormed,
                        format!("closing tag '</{name}>' has no matching opening tag"),
                        line,
                        column,
                    ));
                }
                let open = stack
                    .last()
                    .and_then(|&id| tree.name(id).map(str::to_owned))
                    .unwrap_or_default();
                let (_, local) = split_qname(&name);
                let (_, open_local) = split_qname(&open);
                if local != open_local && open_local != name {
                    let (line, column) = current_position(input, &reader);
                    return Err(fatal(
                        bridge,
                        ErrorCode::NotWellFormed,
                        format!("expected '</{open}>', found '</{name}>'"),
                        line,
                        column,
                    ));
                }
                stack.pop();
                ns_frames.pop();
            }
            Ok(Event::Text(ref t)) => {
                let content = match t.decode() {
                    Ok(c) => c.into_owned(),
                    Err(e) => {
                        let (line, column) = current_position(input, &reader);
                        return Err(fatal(
                            bridge,
                            ErrorCode::NotWellFormed,
                            format!("{e}"),
                            line,
                            column,
                        ));
                    }
                };
                let parent = top(&stack);
                if parent == tree.root() {
                    if content.chars().all(char::is_whitespace) {
                        continue;
                    }
                    let (line, column) = current_position(input, &reader);
                    return Err(fatal(
                        bridge,
                        ErrorCode::ExtraContent,
                        "text content outside the root element".to_string(),
                        line,
                        column,
                    ));
                }
                append_text(&mut tree, parent, content);
            }
            // The reader tokenizes references out of character data; stitch
            // the resolved replacement back into the surrounding text node.
            Ok(Event::GeneralRef(ref r)) => {
                let (line, column) = current_position(input, &reader);
                let replacement = match r.resolve_char_ref() {
                    Ok(Some(ch)) => Some(ch.to_string()),
                    Ok(None) => {
                        let name = String::from_utf8_lossy(r).into_owned();
                        match predefined_entity(&name) {
                            Some(text) => Some(text.to_string()),
                            None => {
                                bridge.report(ErrorLogEntry {
                                    domain: ErrorDomain::Parser,
                                    code: ErrorCode::UndefinedEntity,
                                    level: ErrorLevel::Error,
                                    message: format!("entity '&{name};' is not defined"),
                                    filename: None,
                                    line,
                                    column,
                                });
                                None
                            }
                        }
                    }
                    Err(e) => {
                        return Err(fatal(
                            bridge,
                            ErrorCode::NotWellFormed,
                            format!("{e}"),
                            line,
                            column,
                        ));
                    }
                };
                if let Some(text) = replacement {
                    let parent = top(&stack);
                    if parent == tree.root() {
                        return Err(fatal(
                            bridge,
                            ErrorCode::ExtraContent,
                            "text content outside the root element".to_string(),
                            line,
                            column,
                        ));
                    }
                    append_text(&mut tree, parent, text);
                }
            }
            Ok(Event::CData(cd)) => {
                let parent = top(&stack);
                if parent == tree.root() {
                    let (line, column) = current_position(input, &reader);
                    return Err(fatal(
                        bridge,
                        ErrorCode::ExtraContent,
                        "CDATA section outside the root element".to_string(),
                        line,
                        column,
                    ));
                }
                let content = String::from_utf8_lossy(&cd.into_inner()).into_owned();
                let node = tree.create_node(NodeKind::CData { content });
                tree.append_child(parent, node);
            }
            Ok(Event::Comment(c)) => {
                let content = String::from_utf8_lossy(&c.into_inner()).into_owned();
                let node = tree.create_node(NodeKind::Comment { content });
                tree.append_child(top(&stack), node);
            }
            Ok(Event::PI(pi)) => {
                let target = String::from_utf8_lossy(pi.target()).into_owned();
                // The raw content keeps the separator after the target name.
                let raw = String::from_utf8_lossy(pi.content()).into_owned();
                let data = raw.strip_prefix(' ').unwrap_or(&raw).to_string();
                let node = tree.create_node(NodeKind::ProcessingInstruction {
                    target,
                    data: if data.is_empty() { None } else { Some(data) },
                });
                tree.append_child(top(&stack), node);
            }
            Ok(Event::Eof) => {
                if stack.len() > 1 {
                    let open = stack
                        .last()
                        .and_then(|&id| tree.name(id).map(str::to_owned))
                        .unwrap_or_default();
                    let (line, column) = current_position(input, &reader);
                    return Err(fatal(
                        bridge,
                        ErrorCode::UnexpectedEof,
                        format!("unexpected end of input: '<{open}>' is not closed"),
                        line,
                        column,
                    ));
                }
                if !seen_root {
                    let (line, column) = current_position(input, &reader);
                    return Err(fatal(
                        bridge,
                        ErrorCode::NotWellFormed,
                        "document has no root element".to_string(),
                        line,
                        column,
                    ));
                }
                return Ok(tree);
            }
            // DTD internal subsets are not modeled in the tree.
            Ok(Event::DocType(_)) => {}
        }
    }
}

/// Builds an element node from a start tag: collects namespace declarations
/// into a fresh scope frame, resolves the element and attribute names, and
/// appends the node to the current parent.
#[allow(clippy::too_many_arguments)]
fn open_element(
    input: &str,
    reader: &Reader<&[u8]>,
    tree: &mut Tree,
    stack: &[NodeId],
    ns_frames: &mut Vec<Vec<NsDecl>>,
    seen_root: &mut bool,
    e: &quick_xml::events::BytesStart<'_>,
    bridge: &mut ErrorBridge,
) -> Result<NodeId, ParseError> {
    let qname = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let (prefix, local) = split_qname(&qname);

    // First pass over the attributes: raw pairs, duplicate detection, and
    // the namespace declarations that form this element's scope frame.
    let mut frame: Vec<NsDecl> = Vec::new();
    let mut raw_attrs: Vec<(String, String)> = Vec::new();
    for attr in e.attributes().with_checks(false) {
        let attr = match attr {
            Ok(a) => a,
            Err(err) => {
                let (line, column) = current_position(input, reader);
                return Err(fatal(
                    bridge,
                    ErrorCode::NotWellFormed,
                    format!("malformed attribute in <{qname}>: {err}"),
                    line,
                    column,
                ));
            }
        };
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = match attr.unescape_value() {
            Ok(v) => v.into_owned(),
            Err(err) => {
                let (line, column) = current_position(input, reader);
                return Err(fatal(
                    bridge,
                    ErrorCode::NotWellFormed,
                    format!("bad value for attribute '{key}': {err}"),
                    line,
                    column,
                ));
            }
        };

        if raw_attrs.iter().any(|(k, _)| *k == key) {
            let (line, column) = current_position(input, reader);
            bridge.report(ErrorLogEntry {
                domain: ErrorDomain::Parser,
                code: ErrorCode::DuplicateAttribute,
                level: ErrorLevel::Warning,
                message: format!("attribute '{key}' appears more than once in <{qname}>"),
                filename: None,
                line,
                column,
            });
            continue;
        }

        if key == "xmlns" {
            frame.push((
                None,
                if value.is_empty() { None } else { Some(value.clone()) },
            ));
        } else if let Some(decl_prefix) = key.strip_prefix("xmlns:") {
            frame.push((Some(decl_prefix.to_string()), Some(value.clone())));
        }
        raw_attrs.push((key, value));
    }
    ns_frames.push(frame);

    let namespace = resolve_prefix(ns_frames, prefix.as_deref());
    if prefix.is_some() && namespace.is_none() {
        let (line, column) = current_position(input, reader);
        bridge.report(ErrorLogEntry {
            domain: ErrorDomain::Parser,
            code: ErrorCode::NotWellFormed,
            level: ErrorLevel::Error,
            message: format!(
                "namespace prefix '{}' is not bound",
                prefix.as_deref().unwrap_or_default()
            ),
            filename: None,
            line,
            column,
        });
    }

    // Second pass: resolved attributes. The default namespace does not
    // apply to attributes, only explicit prefixes do.
    let mut attributes = Vec::with_capacity(raw_attrs.len());
    for (key, value) in raw_attrs {
        let (attr_prefix, attr_local) = split_qname(&key);
        let attr_ns = match attr_prefix.as_deref() {
            Some("xmlns") | None => None,
            Some(p) => resolve_prefix(ns_frames, Some(p)),
        };
        // Namespace declarations keep their full `xmlns:p` key as the name;
        // carrying the `xmlns` prefix too would serialize it twice.
        let is_decl = attr_prefix.as_deref() == Some("xmlns");
        attributes.push(Attribute {
            name: if is_decl { key } else { attr_local },
            value,
            prefix: if is_decl { None } else { attr_prefix },
            namespace: attr_ns,
        });
    }

    let parent = top(stack);
    if parent == tree.root() {
        if *seen_root {
            ns_frames.pop();
            let (line, column) = current_position(input, reader);
            return Err(fatal(
                bridge,
                ErrorCode::ExtraContent,
                format!("extra element '<{qname}>' after the root element"),
                line,
                column,
            ));
        }
        *seen_root = true;
    }

    let id = tree.create_node(NodeKind::Element {
        name: local,
        prefix,
        namespace,
        attributes,
    });
    tree.append_child(parent, id);
    Ok(id)
}

/// Appends character data under `parent`, merging into a trailing text
/// node so that data split around references lands in a single node.
fn append_text(tree: &mut Tree, parent: NodeId, content: String) {
    if let Some(last) = tree.last_child(parent) {
        if let NodeKind::Text { content: existing } = &mut tree.node_mut(last).kind {
            existing.push_str(&content);
            return;
        }
    }
    let node = tree.create_node(NodeKind::Text { content });
    tree.append_child(parent, node);
}

/// The five entities every XML processor predefines.
fn predefined_entity(name: &str) -> Option<&'static str> {
    match name {
        "lt" => Some("<"),
        "gt" => Some(">"),
        "amp" => Some("&"),
        "apos" => Some("'"),
        "quot" => Some("\""),
        _ => None,
    }
}

/// Splits a qualified name into `(prefix, local)`.
fn split_qname(qname: &str) -> (Option<String>, String) {
    match qname.split_once(':') {
        Some((p, l)) if !p.is_empty() && !l.is_empty() => (Some(p.to_string()), l.to_string()),
        _ => (None, qname.to_string()),
    }
}

/// Resolves a namespace prefix against the in-scope declarations,
/// innermost frame first. The `xml` prefix is always bound.
fn resolve_prefix(frames: &[Vec<NsDecl>], prefix: Option<&str>) -> Option<String> {
    if prefix == Some("xml") {
        return Some(XML_NS.to_string());
    }
    for frame in frames.iter().rev() {
        for (decl_prefix, uri) in frame.iter().rev() {
            if decl_prefix.as_deref() == prefix {
                return uri.clone();
            }
        }
    }
    None
}

fn top(stack: &[NodeId]) -> NodeId {
    // The stack always holds at least the document node.
    stack[stack.len() - 1]
}

/// Converts a byte offset into a 1-based `(line, column)` pair.
fn position_at(input: &str, offset: usize) -> (u32, u32) {
    let offset = offset.min(input.len());
    let before = &input.as_bytes()[..offset];
    let line = before.iter().filter(|&&b| b == b'\n').count() + 1;
    let line_start = before
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |p| p + 1);
    let column = input
        .get(line_start..offset)
        .map_or(1, |s| s.chars().count() + 1);
    (
        u32::try_from(line).unwrap_or(u32::MAX),
        u32::try_from(column).unwrap_or(u32::MAX),
    )
}

fn current_position(input: &str, reader: &Reader<&[u8]>) -> (u32, u32) {
    let offset = usize::try_from(reader.buffer_position()).unwrap_or(0);
    position_at(input, offset)
}

/// Reports a fatal entry and builds the matching `ParseError`.
fn fatal(
    bridge: &mut ErrorBridge,
    code: ErrorCode,
    message: String,
    line: u32,
    column: u32,
) -> ParseError {
    bridge.report(ErrorLogEntry {
        domain: ErrorDomain::Parser,
        code,
        level: ErrorLevel::Fatal,
        message: message.clone(),
        filename: None,
        line,
        column,
    });
    ParseError {
        message,
        line,
        column,
        log: crate::errorlog::ErrorLog::new(),
    }
}
