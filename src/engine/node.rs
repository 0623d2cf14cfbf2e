//! Node type definitions for the tree engine.
//!
//! `NodeKind` carries the payload for each node type. Navigation links
//! (parent, children, siblings) live in the arena slot, not here, so a
//! kind can be cloned across arenas without dragging structure along.

/// The kind of an XML node and its associated data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// The document node — exactly one per tree, always at the root.
    Document,

    /// An element node, e.g., `<item lang="en">`.
    Element {
        /// The element's local name.
        name: String,
        /// Namespace prefix (e.g., `"xi"` in `xi:include`), if any.
        prefix: Option<String>,
        /// Namespace URI after resolution, if any.
        namespace: Option<String>,
        /// Attributes on this element.
        attributes: Vec<Attribute>,
    },

    /// A text node containing character data (entity references resolved).
    Text {
        /// The decoded text content.
        content: String,
    },

    /// A CDATA section, e.g., `<![CDATA[...]]>`.
    CData {
        /// The CDATA content, verbatim.
        content: String,
    },

    /// A comment node, without the `<!--` and `-->` delimiters.
    Comment {
        /// The comment text.
        content: String,
    },

    /// A processing instruction, e.g., `<?target data?>`.
    ProcessingInstruction {
        /// The PI target.
        target: String,
        /// The PI data, if any.
        data: Option<String>,
    },
}

impl NodeKind {
    /// Returns `true` for element nodes.
    #[must_use]
    pub fn is_element(&self) -> bool {
        matches!(self, Self::Element { .. })
    }
}

/// An XML attribute on an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// The attribute's local name (e.g., `"href"` for `xlink:href`).
    pub name: String,
    /// The attribute value, with entity references resolved.
    pub value: String,
    /// Namespace prefix, if any.
    pub prefix: Option<String>,
    /// Namespace URI after resolution, if any. Unprefixed attributes have
    /// no namespace (the default namespace does not apply to attributes).
    pub namespace: Option<String>,
}

impl Attribute {
    /// Creates an attribute with no namespace.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            prefix: None,
            namespace: None,
        }
    }
}
