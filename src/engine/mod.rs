//! The tree engine: arena storage, parsing, serialization, and in-place
//! XInclude substitution.
//!
//! Everything in this module operates on raw `NodeId` indices and is
//! deliberately unaware of handles, reference counts, or locking — those
//! concerns belong to the registry and proxy layers, which own a `Tree`
//! and mediate all access to it. Client code never sees this module.
//!
//! # Storage model
//!
//! All nodes live in a contiguous `Vec<Slot>` owned by the `Tree`, and are
//! referenced by `NodeId` — a newtype over `NonZeroU32`. Navigation links
//! (parent, first/last child, next/prev sibling) are arena indices, never
//! pointers, so there are no reference cycles and bulk deallocation is
//! dropping the `Tree`.
//!
//! Each slot carries a **generation counter**. Freeing a node keeps its
//! slot (the index is never reused for a different node) but drops the
//! payload and bumps the generation, so a stored `(NodeId, Generation)`
//! pair can later be checked for validity without any risk of reading a
//! freed or recycled node.

pub mod encoding;
pub mod node;
pub mod parser;
pub mod serialize;
pub mod xinclude;

pub use node::{Attribute, NodeKind};

use crate::errorlog::ErrorLog;
use std::num::NonZeroU32;

/// Validity stamp for a slot. Bumped every time the slot's node is freed.
pub type Generation = u32;

/// A typed index into the tree's node arena.
///
/// `NodeId` is a newtype over `NonZeroU32`: it can never be zero, and
/// `Option<NodeId>` is the same size as `NodeId` (niche optimization).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct NodeId(NonZeroU32);

impl NodeId {
    /// Creates a `NodeId` from a raw arena index.
    ///
    /// # Panics
    ///
    /// Panics if `index` is 0 (slot 0 is the arena placeholder).
    #[allow(clippy::expect_used, clippy::cast_possible_truncation)]
    fn from_index(index: usize) -> Self {
        Self(NonZeroU32::new(index as u32).expect("NodeId index must be non-zero"))
    }

    /// Returns the raw index for arena access.
    fn as_index(self) -> usize {
        self.0.get() as usize
    }
}

/// Storage for a single node: its kind and navigation links.
#[derive(Debug, Clone)]
pub struct NodeData {
    /// What kind of node this is and its payload.
    pub kind: NodeKind,
    /// Parent node, if any. The document node and detached nodes have none.
    pub parent: Option<NodeId>,
    /// First child node.
    pub first_child: Option<NodeId>,
    /// Last child node (for O(1) append).
    pub last_child: Option<NodeId>,
    /// Next sibling.
    pub next_sibling: Option<NodeId>,
    /// Previous sibling.
    pub prev_sibling: Option<NodeId>,
}

impl NodeData {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            first_child: None,
            last_child: None,
            next_sibling: None,
            prev_sibling: None,
        }
    }
}

/// One arena slot: the node payload (if live) and the slot's generation.
#[derive(Debug, Clone)]
struct Slot {
    generation: Generation,
    data: Option<NodeData>,
}

/// An XML document tree.
///
/// The `Tree` owns all nodes in an arena. Navigation takes `&Tree`,
/// structural mutation takes `&mut Tree`; the layers above arrange the
/// locking that makes either safe to reach.
#[derive(Debug)]
pub struct Tree {
    /// The node arena. Index 0 is an unused placeholder for `NonZeroU32`.
    slots: Vec<Slot>,
    /// The document node id.
    root: NodeId,
    /// XML version from the declaration, if any.
    pub version: Option<String>,
    /// Encoding from the declaration, if any.
    pub encoding: Option<String>,
    /// Standalone flag from the declaration, if any.
    pub standalone: Option<bool>,
    /// Diagnostics recorded while this tree was parsed.
    pub diagnostics: ErrorLog,
}

impl Tree {
    /// Creates a new empty tree containing only the document node.
    #[must_use]
    pub fn new() -> Self {
        let placeholder = Slot {
            generation: 0,
            data: None,
        };
        let doc = Slot {
            generation: 0,
            data: Some(NodeData::new(NodeKind::Document)),
        };
        Self {
            slots: vec![placeholder, doc],
            root: NodeId::from_index(1),
            version: None,
            encoding: None,
            standalone: None,
            diagnostics: ErrorLog::new(),
        }
    }

    /// Returns the document node id.
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Returns the single top-level element, if the tree has one.
    #[must_use]
    pub fn root_element(&self) -> Option<NodeId> {
        self.children(self.root)
            .find(|&id| self.node(id).kind.is_element())
    }

    /// Returns `true` if `id` refers to a live (not freed) node.
    #[must_use]
    pub fn is_live(&self, id: NodeId) -> bool {
        self.slots
            .get(id.as_index())
            .is_some_and(|s| s.data.is_some())
    }

    /// Returns the current generation of the slot for `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was never allocated in this arena.
    #[must_use]
    pub fn generation(&self, id: NodeId) -> Generation {
        self.slots[id.as_index()].generation
    }

    /// Checks a stored `(id, stamp)` pair against the arena: the node must
    /// still be live and its slot generation unchanged since the stamp was
    /// taken.
    #[must_use]
    pub fn validate(&self, id: NodeId, stamp: Generation) -> bool {
        self.slots
            .get(id.as_index())
            .is_some_and(|s| s.data.is_some() && s.generation == stamp)
    }

    /// Returns the `NodeData` for a live node.
    ///
    /// # Panics
    ///
    /// Panics if `id` refers to a freed slot. Callers validate before
    /// navigating; inside the engine every held `NodeId` is live.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn node(&self, id: NodeId) -> &NodeData {
        self.slots[id.as_index()]
            .data
            .as_ref()
            .expect("node was freed")
    }

    #[allow(clippy::expect_used)]
    fn node_mut(&mut self, id: NodeId) -> &mut NodeData {
        self.slots[id.as_index()]
            .data
            .as_mut()
            .expect("node was freed")
    }

    /// Returns the name of an element or PI node.
    #[must_use]
    pub fn name(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).kind {
            NodeKind::Element { name, .. } => Some(name),
            NodeKind::ProcessingInstruction { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Returns the namespace URI of an element node, if any.
    #[must_use]
    pub fn namespace(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).kind {
            NodeKind::Element { namespace, .. } => namespace.as_deref(),
            _ => None,
        }
    }

    /// Returns the node-local text of a text, CDATA, comment, or PI node.
    #[must_use]
    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).kind {
            NodeKind::Text { content }
            | NodeKind::CData { content }
            | NodeKind::Comment { content } => Some(content),
            NodeKind::ProcessingInstruction { data, .. } => data.as_deref(),
            _ => None,
        }
    }

    /// Returns the concatenated text of a node and all its descendants.
    #[must_use]
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, buf: &mut String) {
        match &self.node(id).kind {
            NodeKind::Text { content } | NodeKind::CData { content } => buf.push_str(content),
            _ => {
                for child in self.children(id) {
                    self.collect_text(child, buf);
                }
            }
        }
    }

    /// Returns the attributes of an element node (empty for other kinds).
    #[must_use]
    pub fn attributes(&self, id: NodeId) -> &[Attribute] {
        match &self.node(id).kind {
            NodeKind::Element { attributes, .. } => attributes,
            _ => &[],
        }
    }

    /// Returns the value of the named attribute on an element node.
    #[must_use]
    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.attributes(id)
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Sets (or replaces) an attribute on an element node.
    ///
    /// Returns `false` if `id` is not an element.
    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> bool {
        if let NodeKind::Element { attributes, .. } = &mut self.node_mut(id).kind {
            if let Some(existing) = attributes.iter_mut().find(|a| a.name == name) {
                existing.value = value.to_string();
            } else {
                attributes.push(Attribute::new(name, value));
            }
            true
        } else {
            false
        }
    }

    // --- Navigation ---

    /// Returns the parent of a node.
    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// Returns the first child of a node.
    #[must_use]
    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).first_child
    }

    /// Returns the last child of a node.
    #[must_use]
    pub fn last_child(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).last_child
    }

    /// Returns the next sibling of a node.
    #[must_use]
    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).next_sibling
    }

    /// Returns the previous sibling of a node.
    #[must_use]
    pub fn prev_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).prev_sibling
    }

    /// Returns an iterator over the children of a node, in document order.
    pub fn children(&self, id: NodeId) -> Children<'_> {
        Children {
            tree: self,
            next: self.node(id).first_child,
        }
    }

    /// Returns an iterator over the ancestors of a node, nearest first.
    /// Does not include the node itself; ends at the document node.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            next: self.node(id).parent,
        }
    }

    /// Returns a depth-first iterator over the descendants of a node,
    /// in document order, excluding the node itself.
    pub fn descendants(&self, id: NodeId) -> Descendants<'_> {
        Descendants {
            tree: self,
            root: id,
            next: self.first_child(id),
        }
    }

    /// Returns the number of live nodes in the arena.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.data.is_some()).count()
    }

    // --- Mutation ---

    /// Allocates a new detached node and returns its id.
    pub fn create_node(&mut self, kind: NodeKind) -> NodeId {
        let index = self.slots.len();
        self.slots.push(Slot {
            generation: 0,
            data: Some(NodeData::new(kind)),
        });
        NodeId::from_index(index)
    }

    /// Appends `child` as the last child of `parent`.
    ///
    /// `child` must be detached; callers detach first.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        debug_assert!(
            self.node(child).parent.is_none(),
            "child already has a parent; detach it first"
        );

        self.node_mut(child).parent = Some(parent);
        if let Some(last) = self.node(parent).last_child {
            self.node_mut(last).next_sibling = Some(child);
            self.node_mut(child).prev_sibling = Some(last);
            self.node_mut(parent).last_child = Some(child);
        } else {
            self.node_mut(parent).first_child = Some(child);
            self.node_mut(parent).last_child = Some(child);
        }
    }

    /// Inserts `new_child` immediately before `reference` among its siblings.
    ///
    /// # Panics
    ///
    /// Panics if `reference` has no parent.
    #[allow(clippy::expect_used)]
    pub fn insert_before(&mut self, reference: NodeId, new_child: NodeId) {
        debug_assert!(
            self.node(new_child).parent.is_none(),
            "new_child already has a parent; detach it first"
        );

        let parent = self.node(reference).parent.expect("reference has no parent");
        self.node_mut(new_child).parent = Some(parent);

        if let Some(prev) = self.node(reference).prev_sibling {
            self.node_mut(prev).next_sibling = Some(new_child);
            self.node_mut(new_child).prev_sibling = Some(prev);
        } else {
            self.node_mut(parent).first_child = Some(new_child);
        }

        self.node_mut(new_child).next_sibling = Some(reference);
        self.node_mut(reference).prev_sibling = Some(new_child);
    }

    /// Inserts `new_child` immediately after `reference` among its siblings.
    #[allow(clippy::expect_used)]
    pub fn insert_after(&mut self, reference: NodeId, new_child: NodeId) {
        debug_assert!(
            self.node(new_child).parent.is_none(),
            "new_child already has a parent; detach it first"
        );

        let parent = self.node(reference).parent.expect("reference has no parent");
        match self.node(reference).next_sibling {
            Some(next) => self.insert_before(next, new_child),
            None => {
                self.node_mut(new_child).parent = Some(parent);
                self.node_mut(new_child).prev_sibling = Some(reference);
                self.node_mut(reference).next_sibling = Some(new_child);
                self.node_mut(parent).last_child = Some(new_child);
            }
        }
    }

    /// Prepends `child` as the first child of `parent`.
    pub fn prepend_child(&mut self, parent: NodeId, child: NodeId) {
        if let Some(first) = self.first_child(parent) {
            self.insert_before(first, child);
        } else {
            self.append_child(parent, child);
        }
    }

    /// Unlinks a node from its parent. The node and its subtree stay live
    /// and can be re-attached elsewhere.
    pub fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.node(id).parent else {
            return;
        };

        let prev = self.node(id).prev_sibling;
        let next = self.node(id).next_sibling;

        match prev {
            Some(p) => self.node_mut(p).next_sibling = next,
            None => self.node_mut(parent).first_child = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev_sibling = prev,
            None => self.node_mut(parent).last_child = prev,
        }

        let node = self.node_mut(id);
        node.parent = None;
        node.prev_sibling = None;
        node.next_sibling = None;
    }

    /// Unlinks a node and frees it and its whole subtree.
    ///
    /// Every freed slot drops its payload and bumps its generation, so any
    /// stamp taken before the free will fail [`validate`](Self::validate)
    /// afterwards. Freeing the document node is not allowed.
    pub fn free_subtree(&mut self, id: NodeId) {
        debug_assert!(id != self.root, "cannot free the document node");

        let mut doomed: Vec<NodeId> = self.descendants(id).collect();
        doomed.push(id);
        self.detach(id);

        for node in doomed {
            let slot = &mut self.slots[node.as_index()];
            slot.data = None;
            slot.generation = slot.generation.wrapping_add(1);
        }
    }

    /// Copies the subtree rooted at `src_id` from `src` into `dst`, frees the
    /// source subtree, and returns the old-id to new-id mapping in document
    /// order (subtree root first).
    ///
    /// The copied subtree is left detached in `dst`; the caller attaches it.
    /// The mapping lets the registry rebind any live handle into the moved
    /// region to its node's new home.
    pub fn transfer_subtree(
        src: &mut Tree,
        src_id: NodeId,
        dst: &mut Tree,
    ) -> Vec<(NodeId, NodeId)> {
        let mut mapping = Vec::new();
        Self::copy_into(src, src_id, dst, &mut mapping);
        src.free_subtree(src_id);
        mapping
    }

    fn copy_into(
        src: &Tree,
        src_id: NodeId,
        dst: &mut Tree,
        mapping: &mut Vec<(NodeId, NodeId)>,
    ) -> NodeId {
        let new_id = dst.create_node(src.node(src_id).kind.clone());
        mapping.push((src_id, new_id));
        let children: Vec<NodeId> = src.children(src_id).collect();
        for child in children {
            let new_child = Self::copy_into(src, child, dst, mapping);
            dst.append_child(new_id, new_child);
        }
        new_id
    }

    /// Deep-copies a subtree from another tree without freeing the source.
    /// Returns the id of the copy's root, left detached in `self`.
    pub fn copy_subtree_from(&mut self, src: &Tree, src_id: NodeId) -> NodeId {
        let mut mapping = Vec::new();
        Self::copy_into(src, src_id, self, &mut mapping)
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

// --- Iterators ---

/// Iterator over the children of a node.
pub struct Children<'a> {
    tree: &'a Tree,
    next: Option<NodeId>,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = self.tree.node(current).next_sibling;
        Some(current)
    }
}

/// Iterator over the ancestors of a node, nearest first.
pub struct Ancestors<'a> {
    tree: &'a Tree,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = self.tree.node(current).parent;
        Some(current)
    }
}

/// Depth-first iterator over the descendants of a node, excluding the node.
pub struct Descendants<'a> {
    tree: &'a Tree,
    root: NodeId,
    next: Option<NodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;

        if let Some(child) = self.tree.first_child(current) {
            self.next = Some(child);
            return Some(current);
        }

        let mut at = current;
        loop {
            if at == self.root {
                self.next = None;
                return Some(current);
            }
            if let Some(sibling) = self.tree.next_sibling(at) {
                self.next = Some(sibling);
                return Some(current);
            }
            match self.tree.parent(at) {
                Some(parent) => at = parent,
                None => {
                    self.next = None;
                    return Some(current);
                }
            }
        }
    }
}
