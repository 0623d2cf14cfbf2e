//! Document handles.
//!
//! A [`Document`] is one strong handle onto a parsed tree and its
//! ownership registry. Handles are cheap to clone; the tree itself is
//! freed when the last handle of any kind (document or node proxy) goes
//! away.

use std::path::Path;
use std::sync::Arc;

use crate::engine::node::NodeKind;
use crate::engine::xinclude::{ResourceLoader, XIncludeOptions};
use crate::engine::{encoding, parser, serialize, xinclude, Tree};
use crate::error::{Error, ParseError, Result};
use crate::errorlog::{ErrorBridge, ErrorLog};
use crate::node::{self, Node};
use crate::registry::RegistryEntry;

pub struct Document {
    entry: Arc<RegistryEntry>,
}

impl Document {
    /// Creates an empty document with nothing below the document node.
    #[must_use]
    pub fn new() -> Document {
        Document {
            entry: RegistryEntry::new(Tree::new()),
        }
    }

    /// Parses a UTF-8 XML string.
    ///
    /// On success, recoverable diagnostics gathered during the parse are
    /// kept on the document and available through
    /// [`diagnostics`](Self::diagnostics). On failure the returned error
    /// carries the full log of the aborted parse.
    pub fn parse_str(input: &str) -> std::result::Result<Document, ParseError> {
        let mut bridge = ErrorBridge::new();
        bridge.connect();
        match parser::parse_str(input, &mut bridge) {
            Ok(mut tree) => {
                tree.diagnostics = bridge.disconnect();
                Ok(Document {
                    entry: RegistryEntry::new(tree),
                })
            }
            Err(mut e) => {
                e.log = bridge.disconnect();
                Err(e)
            }
        }
    }

    /// Parses raw bytes, sniffing the encoding from a BOM or the XML
    /// declaration before decoding to UTF-8.
    pub fn parse_bytes(input: &[u8]) -> Result<Document> {
        let text = encoding::decode_to_utf8(input).map_err(|e| Error::Encoding(e.to_string()))?;
        Ok(Document::parse_str(&text)?)
    }

    /// Reads and parses a file from disk.
    pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Document> {
        let bytes = std::fs::read(path)?;
        Document::parse_bytes(&bytes)
    }

    pub(crate) fn from_entry(entry: Arc<RegistryEntry>) -> Document {
        entry.acquire();
        Document { entry }
    }

    /// Returns a proxy for the top-level element, if the document has one.
    #[must_use]
    pub fn root_element(&self) -> Option<Node> {
        let (id, stamp) = {
            let tree = self.entry.tree();
            let id = tree.root_element()?;
            (id, tree.generation(id))
        };
        Some(node::wrap(&self.entry, id, stamp))
    }

    /// Proxies for everything directly below the document node, comments
    /// and processing instructions included.
    #[must_use]
    pub fn top_level(&self) -> Vec<Node> {
        let found: Vec<_> = {
            let tree = self.entry.tree();
            tree.children(tree.root())
                .map(|id| (id, tree.generation(id)))
                .collect()
        };
        found
            .into_iter()
            .map(|(id, stamp)| node::wrap(&self.entry, id, stamp))
            .collect()
    }

    /// Creates a detached element; attach it with the node mutation calls.
    pub fn create_element(&self, name: &str) -> Result<Node> {
        self.create(NodeKind::Element {
            name: name.to_string(),
            prefix: None,
            namespace: None,
            attributes: Vec::new(),
        })
    }

    pub fn create_text(&self, content: &str) -> Result<Node> {
        self.create(NodeKind::Text {
            content: content.to_string(),
        })
    }

    pub fn create_comment(&self, content: &str) -> Result<Node> {
        self.create(NodeKind::Comment {
            content: content.to_string(),
        })
    }

    pub fn create_pi(&self, target: &str, data: Option<&str>) -> Result<Node> {
        self.create(NodeKind::ProcessingInstruction {
            target: target.to_string(),
            data: data.map(str::to_owned),
        })
    }

    fn create(&self, kind: NodeKind) -> Result<Node> {
        let (id, stamp) = {
            let mut tree = self.entry.tree_mut();
            let id = tree.create_node(kind);
            (id, tree.generation(id))
        };
        Ok(node::wrap(&self.entry, id, stamp))
    }

    /// Makes a created or detached node a top-level node of the document.
    pub fn set_root(&self, node: &Node) -> Result<()> {
        let binding = node.binding();
        if !Arc::ptr_eq(&binding.entry, &self.entry) {
            return Err(Error::WrongDocument);
        }
        let mut tree = self.entry.tree_mut();
        if !tree.validate(binding.id, binding.stamp) {
            return Err(Error::StaleReference);
        }
        tree.detach(binding.id);
        let root = tree.root();
        tree.append_child(root, binding.id);
        Ok(())
    }

    /// Serializes the whole document.
    #[must_use]
    pub fn to_xml(&self) -> String {
        serialize::serialize(&self.entry.tree())
    }

    /// Runs XInclude substitution over the whole document, with default
    /// options. Returns the number of substitutions.
    ///
    /// For per-run options and an inspectable log, use
    /// [`XIncludeProcessor`](crate::xinclude::XIncludeProcessor).
    pub fn xinclude(&self, loader: &dyn ResourceLoader) -> Result<usize> {
        let _pass = self.entry.mutation_lock();
        let mut bridge = ErrorBridge::new();
        bridge.connect();
        let count = {
            let mut tree = self.entry.tree_mut();
            let root = tree.root();
            xinclude::process_subtree(
                &mut tree,
                root,
                loader,
                &mut bridge,
                &XIncludeOptions::default(),
            )
        };
        let log = bridge.disconnect();
        if log.has_errors() {
            return Err(crate::error::XIncludeFailure::from_log(log).into());
        }
        Ok(count)
    }

    /// Recoverable diagnostics gathered while this document was parsed.
    #[must_use]
    pub fn diagnostics(&self) -> ErrorLog {
        self.entry.tree().diagnostics.snapshot()
    }

    /// The number of live handles (documents plus node proxies) attached
    /// to this document's tree.
    #[must_use]
    pub fn live_handles(&self) -> usize {
        self.entry.live_handles()
    }

    /// The number of live nodes in the tree, the document node included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.entry.tree().live_count()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Document {
    fn clone(&self) -> Self {
        Document::from_entry(Arc::clone(&self.entry))
    }
}

impl Drop for Document {
    fn drop(&mut self) {
        self.entry.release();
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("live_handles", &self.live_handles())
            .field("nodes", &self.node_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_serialize() {
        let d = Document::parse_str("<a><b>x</b></a>").unwrap();
        assert_eq!(d.to_xml(), "<a><b>x</b></a>");
    }

    #[test]
    fn test_parse_failure_carries_log() {
        let err = Document::parse_str("<a><b></a>").unwrap_err();
        assert!(!err.log.is_empty());
        assert!(err.line >= 1);
    }

    #[test]
    fn test_clone_shares_tree() {
        let d1 = Document::parse_str("<a/>").unwrap();
        let d2 = d1.clone();
        assert_eq!(d1.live_handles(), 2);
        d2.root_element().unwrap().set_attribute("k", "v").unwrap();
        assert!(d1.to_xml().contains("k=\"v\""));
    }

    #[test]
    fn test_handle_count_tracks_drops() {
        let d = Document::parse_str("<a/>").unwrap();
        assert_eq!(d.live_handles(), 1);
        let root = d.root_element().unwrap();
        assert_eq!(d.live_handles(), 2);
        drop(root);
        assert_eq!(d.live_handles(), 1);
    }

    #[test]
    fn test_build_document_from_scratch() {
        let d = Document::new();
        let root = d.create_element("log").unwrap();
        d.set_root(&root).unwrap();
        let entry = d.create_element("entry").unwrap();
        entry.set_attribute("n", "1").unwrap();
        root.append_child(&entry).unwrap();
        entry.append_child(&d.create_text("boot").unwrap()).unwrap();
        assert_eq!(d.to_xml(), r#"<log><entry n="1">boot</entry></log>"#);
    }

    #[test]
    fn test_set_root_rejects_foreign_node() {
        let d1 = Document::new();
        let d2 = Document::new();
        let el = d2.create_element("x").unwrap();
        assert!(matches!(d1.set_root(&el), Err(Error::WrongDocument)));
    }

    #[test]
    fn test_parse_bytes_with_utf16_bom() {
        let text = "<?xml version=\"1.0\"?><r>\u{e9}</r>";
        let mut bytes = vec![0xFF, 0xFE];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let d = Document::parse_bytes(&bytes).unwrap();
        assert_eq!(
            d.root_element().unwrap().text_content().unwrap(),
            "\u{e9}"
        );
    }

    #[test]
    fn test_top_level_includes_comments() {
        let d = Document::parse_str("<!--lead--><r/><?tail x?>").unwrap();
        let top = d.top_level();
        assert_eq!(top.len(), 3);
        assert_eq!(top[0].text().unwrap().as_deref(), Some("lead"));
    }

    #[test]
    fn test_diagnostics_preserved_on_success() {
        let d = Document::parse_str(r#"<r a="1" a="2"/>"#).unwrap();
        assert_eq!(d.diagnostics().len(), 1);
    }
}
