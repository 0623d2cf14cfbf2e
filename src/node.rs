//! Node proxies.
//!
//! A [`Node`] is a lightweight handle onto one node of a document's native
//! tree. Proxies are identity-mapped: asking twice for the same underlying
//! node yields handles that compare equal and share one inner allocation.
//! A proxy never dangles. It carries the node id together with the slot
//! generation observed at creation, and every access re-validates the pair
//! against the tree, so a handle whose node has been freed reports
//! [`Error::StaleReference`] instead of touching dead memory.
//!
//! Proxies keep their document alive: each one holds a strong reference to
//! the document's registry entry, so dropping the last `Document` handle
//! does not free a tree that still has outstanding node handles.

use std::sync::{Arc, PoisonError, RwLock};

use crate::engine::node::Attribute;
use crate::engine::{Generation, NodeId, NodeKind, Tree};
use crate::error::{Error, Result};
use crate::registry::RegistryEntry;
use crate::Document;

/// What a node's target currently is. Rebound on cross-document moves.
#[derive(Clone)]
pub(crate) struct Binding {
    pub(crate) entry: Arc<RegistryEntry>,
    pub(crate) id: NodeId,
    pub(crate) stamp: Generation,
}

pub(crate) struct ProxyInner {
    binding: RwLock<Binding>,
}

impl Drop for ProxyInner {
    fn drop(&mut self) {
        let binding = self
            .binding
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        {
            let mut map = binding.entry.proxies();
            // Only evict our own map entry. Another proxy for the same id
            // may have been created between our last strong-count drop and
            // this destructor running.
            if let Some(weak) = map.get(&binding.id) {
                if weak.strong_count() == 0 {
                    map.remove(&binding.id);
                }
            }
        }
        binding.entry.release();
    }
}

/// The kind of node a proxy points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Element,
    Text,
    CData,
    Comment,
    ProcessingInstruction,
}

/// A shared, revalidating handle onto one tree node.
#[derive(Clone)]
pub struct Node {
    inner: Arc<ProxyInner>,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Node {}

/// Returns the proxy for `id`, creating it if none is outstanding.
///
/// `stamp` is the slot generation the caller observed while it held the
/// tree lock. At most one live proxy exists per node id.
pub(crate) fn wrap(entry: &Arc<RegistryEntry>, id: NodeId, stamp: Generation) -> Node {
    let mut map = entry.proxies();
    if let Some(existing) = map.get(&id).and_then(std::sync::Weak::upgrade) {
        return Node { inner: existing };
    }
    let inner = Arc::new(ProxyInner {
        binding: RwLock::new(Binding {
            entry: Arc::clone(entry),
            id,
            stamp,
        }),
    });
    entry.acquire();
    map.insert(id, Arc::downgrade(&inner));
    Node { inner }
}

impl Node {
    /// Snapshots the current binding. Never hold the binding lock while
    /// taking a tree lock; clone it and let go first.
    pub(crate) fn binding(&self) -> Binding {
        self.inner
            .binding
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Runs `f` against the tree after revalidating the handle.
    fn with_tree<T>(&self, f: impl FnOnce(&Tree, NodeId) -> T) -> Result<T> {
        let binding = self.binding();
        let tree = binding.entry.tree();
        if !tree.validate(binding.id, binding.stamp) {
            return Err(Error::StaleReference);
        }
        Ok(f(&tree, binding.id))
    }

    fn with_tree_mut<T>(&self, f: impl FnOnce(&mut Tree, NodeId) -> T) -> Result<T> {
        let binding = self.binding();
        let mut tree = binding.entry.tree_mut();
        if !tree.validate(binding.id, binding.stamp) {
            return Err(Error::StaleReference);
        }
        Ok(f(&mut tree, binding.id))
    }

    /// Returns `true` while the underlying node is still live.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let binding = self.binding();
        let tree = binding.entry.tree();
        tree.validate(binding.id, binding.stamp)
    }

    /// Returns a handle for the owning document.
    #[must_use]
    pub fn document(&self) -> Document {
        Document::from_entry(Arc::clone(&self.binding().entry))
    }

    /// Returns `true` if both handles refer to nodes of the same document.
    #[must_use]
    pub fn same_document(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.binding().entry, &other.binding().entry)
    }

    // --- Read access ---

    pub fn node_type(&self) -> Result<NodeType> {
        self.with_tree(|tree, id| match tree.node(id).kind {
            NodeKind::Element { .. } => NodeType::Element,
            NodeKind::Text { .. } => NodeType::Text,
            NodeKind::CData { .. } => NodeType::CData,
            NodeKind::Comment { .. } => NodeType::Comment,
            NodeKind::ProcessingInstruction { .. } => NodeType::ProcessingInstruction,
            NodeKind::Document => unreachable!("document nodes are not proxied"),
        })
    }

    /// The local name of an element, or the target of a PI.
    pub fn name(&self) -> Result<Option<String>> {
        self.with_tree(|tree, id| tree.name(id).map(str::to_owned))
    }

    pub fn namespace(&self) -> Result<Option<String>> {
        self.with_tree(|tree, id| tree.namespace(id).map(str::to_owned))
    }

    pub fn prefix(&self) -> Result<Option<String>> {
        self.with_tree(|tree, id| match &tree.node(id).kind {
            NodeKind::Element { prefix, .. } => prefix.clone(),
            _ => None,
        })
    }

    /// The node-local text of a text, CDATA, comment, or PI node.
    pub fn text(&self) -> Result<Option<String>> {
        self.with_tree(|tree, id| tree.text(id).map(str::to_owned))
    }

    /// The concatenated character data of the node and its descendants.
    pub fn text_content(&self) -> Result<String> {
        self.with_tree(|tree, id| tree.text_content(id))
    }

    pub fn attribute(&self, name: &str) -> Result<Option<String>> {
        self.with_tree(|tree, id| tree.attribute(id, name).map(str::to_owned))
    }

    pub fn attributes(&self) -> Result<Vec<Attribute>> {
        self.with_tree(|tree, id| tree.attributes(id).to_vec())
    }

    /// Serializes the subtree rooted at this node.
    pub fn to_xml(&self) -> Result<String> {
        self.with_tree(|tree, id| crate::engine::serialize::serialize_node(tree, id))
    }

    // --- Navigation ---
    //
    // Navigation collects `(id, generation)` pairs under the tree lock and
    // wraps them into proxies after the lock is released.

    /// The parent element, or `None` at the top of the tree.
    pub fn parent(&self) -> Result<Option<Node>> {
        let binding = self.binding();
        let found = {
            let tree = binding.entry.tree();
            if !tree.validate(binding.id, binding.stamp) {
                return Err(Error::StaleReference);
            }
            tree.parent(binding.id)
                .filter(|&p| p != tree.root())
                .map(|p| (p, tree.generation(p)))
        };
        Ok(found.map(|(id, stamp)| wrap(&binding.entry, id, stamp)))
    }

    pub fn children(&self) -> Result<Vec<Node>> {
        self.wrap_ids(|tree, id| tree.children(id).map(Some).collect())
    }

    pub fn first_child(&self) -> Result<Option<Node>> {
        Ok(self.wrap_ids(|tree, id| vec![tree.first_child(id)])?.pop())
    }

    pub fn last_child(&self) -> Result<Option<Node>> {
        Ok(self.wrap_ids(|tree, id| vec![tree.last_child(id)])?.pop())
    }

    pub fn next_sibling(&self) -> Result<Option<Node>> {
        Ok(self.wrap_ids(|tree, id| vec![tree.next_sibling(id)])?.pop())
    }

    pub fn prev_sibling(&self) -> Result<Option<Node>> {
        Ok(self.wrap_ids(|tree, id| vec![tree.prev_sibling(id)])?.pop())
    }

    /// Ancestor elements, nearest first. The document node is not included.
    pub fn ancestors(&self) -> Result<Vec<Node>> {
        self.wrap_ids(|tree, id| {
            let root = tree.root();
            tree.ancestors(id)
                .filter(|&a| a != root)
                .map(Some)
                .collect()
        })
    }

    /// All descendants in document order, the node itself excluded.
    pub fn descendants(&self) -> Result<Vec<Node>> {
        self.wrap_ids(|tree, id| tree.descendants(id).map(Some).collect())
    }

    fn wrap_ids(
        &self,
        collect: impl FnOnce(&Tree, NodeId) -> Vec<Option<NodeId>>,
    ) -> Result<Vec<Node>> {
        let binding = self.binding();
        let found: Vec<(NodeId, Generation)> = {
            let tree = binding.entry.tree();
            if !tree.validate(binding.id, binding.stamp) {
                return Err(Error::StaleReference);
            }
            collect(&tree, binding.id)
                .into_iter()
                .flatten()
                .map(|id| (id, tree.generation(id)))
                .collect()
        };
        Ok(found
            .into_iter()
            .map(|(id, stamp)| wrap(&binding.entry, id, stamp))
            .collect())
    }

    // --- Mutation ---

    /// Sets (or replaces) an attribute on an element node.
    pub fn set_attribute(&self, name: &str, value: &str) -> Result<()> {
        self.with_tree_mut(|tree, id| {
            if tree.set_attribute(id, name, value) {
                Ok(())
            } else {
                Err(Error::InvalidStructure(
                    "attributes can only be set on element nodes".to_string(),
                ))
            }
        })?
    }

    /// Appends `child` as this node's last child. A child from another
    /// document is migrated into this one; handles into the moved subtree
    /// follow it.
    pub fn append_child(&self, child: &Node) -> Result<()> {
        self.attach(child, Placement::LastChild)
    }

    /// Inserts `child` as this node's first child.
    pub fn prepend_child(&self, child: &Node) -> Result<()> {
        self.attach(child, Placement::FirstChild)
    }

    /// Moves this node (and its subtree) to be the last child of
    /// `new_parent`, migrating across documents when necessary.
    pub fn move_to(&self, new_parent: &Node) -> Result<()> {
        new_parent.append_child(self)
    }

    /// Inserts `sibling` immediately before this node.
    pub fn insert_before(&self, sibling: &Node) -> Result<()> {
        self.attach(sibling, Placement::Before)
    }

    /// Inserts `sibling` immediately after this node.
    pub fn insert_after(&self, sibling: &Node) -> Result<()> {
        self.attach(sibling, Placement::After)
    }

    /// Unlinks this node from its parent. The subtree stays live and the
    /// handle stays valid; the node can be attached elsewhere.
    pub fn detach(&self) -> Result<()> {
        self.with_tree_mut(Tree::detach)
    }

    /// Unlinks this node and frees its whole subtree. Every outstanding
    /// handle into the subtree, this one included, turns stale.
    pub fn remove(&self) -> Result<()> {
        self.with_tree_mut(Tree::free_subtree)
    }

    fn attach(&self, child: &Node, placement: Placement) -> Result<()> {
        let anchor = self.binding();
        let source = child.binding();

        if Arc::ptr_eq(&anchor.entry, &source.entry) {
            let mut tree = anchor.entry.tree_mut();
            Self::check_pair(&tree, &anchor, &source)?;
            if source.id == anchor.id
                || tree.ancestors(anchor.id).any(|a| a == source.id)
            {
                return Err(Error::InvalidStructure(
                    "a node cannot be inserted into its own subtree".to_string(),
                ));
            }
            check_placement(&tree, anchor.id, placement)?;
            tree.detach(source.id);
            place(&mut tree, anchor.id, source.id, placement);
            return Ok(());
        }

        // Cross-document move. Both trees are locked in address order, the
        // subtree is copied over and freed at the source, and every live
        // proxy into it is rebound to its copy.
        let (first, second) = order_entries(&anchor.entry, &source.entry);
        let first_guard = first.tree_mut();
        let second_guard = second.tree_mut();
        let (mut dst, mut src) = if Arc::ptr_eq(first, &anchor.entry) {
            (first_guard, second_guard)
        } else {
            (second_guard, first_guard)
        };
        Self::check_in(&dst, &anchor)?;
        Self::check_in(&src, &source)?;
        check_placement(&dst, anchor.id, placement)?;

        let mapping = Tree::transfer_subtree(&mut src, source.id, &mut dst);
        let new_root = mapping
            .first()
            .map(|&(_, new)| new)
            .ok_or(Error::StaleReference)?;
        place(&mut dst, anchor.id, new_root, placement);
        migrate_proxies(&source.entry, &anchor.entry, &dst, &mapping);
        Ok(())
    }

    fn check_pair(tree: &Tree, a: &Binding, b: &Binding) -> Result<()> {
        Self::check_in(tree, a)?;
        Self::check_in(tree, b)
    }

    fn check_in(tree: &Tree, binding: &Binding) -> Result<()> {
        if tree.validate(binding.id, binding.stamp) {
            Ok(())
        } else {
            Err(Error::StaleReference)
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let binding = self.binding();
        let tree = binding.entry.tree();
        if tree.validate(binding.id, binding.stamp) {
            f.debug_struct("Node")
                .field("name", &tree.name(binding.id))
                .finish_non_exhaustive()
        } else {
            f.write_str("Node(stale)")
        }
    }
}

#[derive(Clone, Copy)]
enum Placement {
    FirstChild,
    LastChild,
    Before,
    After,
}

/// Sibling placements need the anchor to be attached somewhere.
fn check_placement(tree: &Tree, anchor: NodeId, placement: Placement) -> Result<()> {
    match placement {
        Placement::Before | Placement::After if tree.parent(anchor).is_none() => {
            Err(Error::InvalidStructure(
                "cannot insert a sibling next to a detached node".to_string(),
            ))
        }
        _ => Ok(()),
    }
}

fn place(tree: &mut Tree, anchor: NodeId, node: NodeId, placement: Placement) {
    match placement {
        Placement::FirstChild => tree.prepend_child(anchor, node),
        Placement::LastChild => tree.append_child(anchor, node),
        Placement::Before => tree.insert_before(anchor, node),
        Placement::After => tree.insert_after(anchor, node),
    }
}

fn order_entries<'a>(
    a: &'a Arc<RegistryEntry>,
    b: &'a Arc<RegistryEntry>,
) -> (&'a Arc<RegistryEntry>, &'a Arc<RegistryEntry>) {
    if Arc::as_ptr(a) < Arc::as_ptr(b) {
        (a, b)
    } else {
        (b, a)
    }
}

/// Rebinds every live proxy into a transferred subtree from its old node
/// in `src` to the node's copy in `dst`.
///
/// Callers hold both tree write locks, which keeps new proxy creation for
/// the affected ids out (wrapping requires reading the tree first).
fn migrate_proxies(
    src: &Arc<RegistryEntry>,
    dst: &Arc<RegistryEntry>,
    dst_tree: &Tree,
    mapping: &[(NodeId, NodeId)],
) {
    let mut moved: Vec<(NodeId, Arc<ProxyInner>)> = Vec::new();
    {
        let mut src_map = src.proxies();
        for &(old_id, new_id) in mapping {
            if let Some(weak) = src_map.remove(&old_id) {
                if let Some(inner) = weak.upgrade() {
                    moved.push((new_id, inner));
                }
            }
        }
    }

    if moved.is_empty() {
        return;
    }

    {
        let mut dst_map = dst.proxies();
        for (new_id, inner) in &moved {
            {
                let mut binding = inner
                    .binding
                    .write()
                    .unwrap_or_else(PoisonError::into_inner);
                *binding = Binding {
                    entry: Arc::clone(dst),
                    id: *new_id,
                    stamp: dst_tree.generation(*new_id),
                };
            }
            dst.acquire();
            src.release();
            dst_map.insert(*new_id, Arc::downgrade(inner));
        }
    }
    // `moved` holds strong references; letting them go while the proxies
    // mutex is held would deadlock if one of them is the last and its
    // destructor re-enters the map.
    drop(moved);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Document;

    fn doc(input: &str) -> Document {
        Document::parse_str(input).unwrap()
    }

    #[test]
    fn test_identity_map_returns_same_proxy() {
        let d = doc("<a><b/></a>");
        let root = d.root_element().unwrap();
        let b1 = root.first_child().unwrap().unwrap();
        let b2 = root.children().unwrap().remove(0);
        assert_eq!(b1, b2);
    }

    #[test]
    fn test_navigation() {
        let d = doc("<a><b/><c/><d/></a>");
        let root = d.root_element().unwrap();
        let kids = root.children().unwrap();
        assert_eq!(kids.len(), 3);
        assert_eq!(kids[1].name().unwrap().as_deref(), Some("c"));
        assert_eq!(
            kids[1].next_sibling().unwrap().unwrap().name().unwrap().as_deref(),
            Some("d")
        );
        assert_eq!(
            kids[1].prev_sibling().unwrap().unwrap().name().unwrap().as_deref(),
            Some("b")
        );
        assert_eq!(kids[0].parent().unwrap().unwrap(), root);
        assert!(root.parent().unwrap().is_none());
    }

    #[test]
    fn test_ancestors_nearest_first() {
        let d = doc("<a><b><c/></b></a>");
        let c = d
            .root_element()
            .unwrap()
            .first_child()
            .unwrap()
            .unwrap()
            .first_child()
            .unwrap()
            .unwrap();
        let names: Vec<_> = c
            .ancestors()
            .unwrap()
            .iter()
            .map(|n| n.name().unwrap().unwrap())
            .collect();
        assert_eq!(names, ["b", "a"]);
    }

    #[test]
    fn test_remove_makes_handles_stale() {
        let d = doc("<a><b><c/></b></a>");
        let b = d.root_element().unwrap().first_child().unwrap().unwrap();
        let c = b.first_child().unwrap().unwrap();
        b.remove().unwrap();
        assert!(!b.is_valid());
        assert!(matches!(c.name(), Err(Error::StaleReference)));
    }

    #[test]
    fn test_detach_keeps_handle_valid() {
        let d = doc("<a><b/><c/></a>");
        let root = d.root_element().unwrap();
        let b = root.first_child().unwrap().unwrap();
        b.detach().unwrap();
        assert!(b.is_valid());
        assert!(b.parent().unwrap().is_none());
        assert_eq!(root.children().unwrap().len(), 1);

        // A detached node can come back.
        root.append_child(&b).unwrap();
        assert_eq!(root.children().unwrap().len(), 2);
    }

    #[test]
    fn test_reorder_within_document() {
        let d = doc("<a><b/><c/></a>");
        let root = d.root_element().unwrap();
        let b = root.first_child().unwrap().unwrap();
        root.append_child(&b).unwrap();
        let names: Vec<_> = root
            .children()
            .unwrap()
            .iter()
            .map(|n| n.name().unwrap().unwrap())
            .collect();
        assert_eq!(names, ["c", "b"]);
    }

    #[test]
    fn test_cycle_rejected() {
        let d = doc("<a><b><c/></b></a>");
        let b = d.root_element().unwrap().first_child().unwrap().unwrap();
        let c = b.first_child().unwrap().unwrap();
        assert!(matches!(
            c.append_child(&b),
            Err(Error::InvalidStructure(_))
        ));
        assert!(matches!(
            b.append_child(&b),
            Err(Error::InvalidStructure(_))
        ));
    }

    #[test]
    fn test_cross_document_move_rebinds_handles() {
        let d1 = doc("<src><part><leaf>x</leaf></part></src>");
        let d2 = doc("<dst/>");
        let part = d1.root_element().unwrap().first_child().unwrap().unwrap();
        let leaf = part.first_child().unwrap().unwrap();

        d2.root_element().unwrap().append_child(&part).unwrap();

        // Both handles now live in the destination document.
        assert!(part.is_valid());
        assert!(leaf.is_valid());
        assert!(part.same_document(&d2.root_element().unwrap()));
        assert_eq!(leaf.text_content().unwrap(), "x");
        assert_eq!(d1.to_xml(), "<src/>");
        assert!(d2.to_xml().contains("<part><leaf>x</leaf></part>"));
    }

    #[test]
    fn test_cross_document_insert_before() {
        let d1 = doc("<src><m/></src>");
        let d2 = doc("<dst><anchor/></dst>");
        let m = d1.root_element().unwrap().first_child().unwrap().unwrap();
        let anchor = d2.root_element().unwrap().first_child().unwrap().unwrap();
        anchor.insert_before(&m).unwrap();
        assert_eq!(d2.to_xml(), "<dst><m/><anchor/></dst>");
    }

    #[test]
    fn test_sibling_insert_needs_parent() {
        let d = doc("<a><b/></a>");
        let b = d.root_element().unwrap().first_child().unwrap().unwrap();
        b.detach().unwrap();
        let c = d.create_element("c").unwrap();
        assert!(matches!(
            b.insert_before(&c),
            Err(Error::InvalidStructure(_))
        ));
    }

    #[test]
    fn test_set_attribute() {
        let d = doc("<a/>");
        let root = d.root_element().unwrap();
        root.set_attribute("k", "v").unwrap();
        assert_eq!(root.attribute("k").unwrap().as_deref(), Some("v"));
        root.set_attribute("k", "w").unwrap();
        assert_eq!(root.attribute("k").unwrap().as_deref(), Some("w"));
    }

    #[test]
    fn test_set_attribute_on_text_fails() {
        let d = doc("<a>t</a>");
        let text = d.root_element().unwrap().first_child().unwrap().unwrap();
        assert!(matches!(
            text.set_attribute("k", "v"),
            Err(Error::InvalidStructure(_))
        ));
    }

    #[test]
    fn test_node_type() {
        let d = doc("<a>t<!--c--><?p d?></a>");
        let kids = d.root_element().unwrap().children().unwrap();
        assert_eq!(kids[0].node_type().unwrap(), NodeType::Text);
        assert_eq!(kids[1].node_type().unwrap(), NodeType::Comment);
        assert_eq!(
            kids[2].node_type().unwrap(),
            NodeType::ProcessingInstruction
        );
    }

    #[test]
    fn test_handles_keep_document_alive() {
        let leaf = {
            let d = doc("<a><b>kept</b></a>");
            d.root_element().unwrap().first_child().unwrap().unwrap()
        };
        // The document handle is gone but the tree is not.
        assert_eq!(leaf.text_content().unwrap(), "kept");
        assert_eq!(leaf.document().live_handles(), 2);
    }
}
