//! Typed overlay node tree.
//!
//! The engine never touches the host page's own markup directly. Instead it
//! maintains a parallel tree of typed nodes, and every element created through
//! this module carries a capability marker (the injected flag, surfaced as a
//! `data-entrylive` attribute) so reconciliation can always tell overlay-owned
//! nodes apart from host-owned ones. Host-owned nodes can be read and used as
//! mount points but never mutated or removed.
//!
//! Construction goes through [`NodeSpec`], a small virtual-node builder:
//! specs are assembled off-tree and materialized in a single append, which
//! keeps partial subtrees from ever being observable.

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Attribute surfaced on every overlay-owned element.
pub const MARKER_ATTR: &str = "data-entrylive";

/// Errors produced by tree operations and queued mutations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomError {
    /// The target node has been removed from the tree.
    #[error("node is no longer attached to the tree")]
    Detached,
    /// The target node belongs to the host page and must not be mutated.
    #[error("refusing to mutate host-owned node")]
    HostOwned,
    /// The node id does not exist (stale handle).
    #[error("unknown node id {0}")]
    Missing(usize),
    /// An element operation was applied to a text node.
    #[error("node is not an element")]
    NotAnElement,
    /// The mutation queue worker has shut down.
    #[error("mutation queue is closed")]
    QueueClosed,
}

/// Opaque handle to a node in the overlay tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
enum NodeKind {
    Element {
        tag: String,
        attrs: BTreeMap<String, String>,
    },
    Text(String),
}

#[derive(Debug)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    injected: bool,
    alive: bool,
}

/// Declarative description of a subtree to materialize.
///
/// Built elements are always overlay-owned; the marker attribute is added
/// automatically when the spec is materialized.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    kind: NodeKind,
    children: Vec<NodeSpec>,
}

impl NodeSpec {
    pub fn element(tag: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Element {
                tag: tag.into(),
                attrs: BTreeMap::new(),
            },
            children: Vec::new(),
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Text(content.into()),
            children: Vec::new(),
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if let NodeKind::Element { attrs, .. } = &mut self.kind {
            attrs.insert(name.into(), value.into());
        }
        self
    }

    pub fn child(mut self, child: NodeSpec) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, specs: impl IntoIterator<Item = NodeSpec>) -> Self {
        self.children.extend(specs);
        self
    }
}

/// The overlay tree itself.
///
/// Mutating methods count writes (see [`DomTree::write_count`]) so tests can
/// assert that a reconciliation pass touched the tree exactly as often as
/// expected. The scroll offset models the viewport and is deliberately not a
/// counted write.
pub struct DomTree {
    nodes: Vec<NodeData>,
    root: NodeId,
    scroll_top: f64,
    writes: u64,
}

impl DomTree {
    /// Creates a tree with a single host-owned root node.
    pub fn new() -> Self {
        let root_data = NodeData {
            kind: NodeKind::Element {
                tag: "document".to_string(),
                attrs: BTreeMap::new(),
            },
            parent: None,
            children: Vec::new(),
            injected: false,
            alive: true,
        };
        Self {
            nodes: vec![root_data],
            root: NodeId(0),
            scroll_top: 0.0,
            writes: 0,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Total number of structural writes applied so far.
    pub fn write_count(&self) -> u64 {
        self.writes
    }

    pub fn scroll_top(&self) -> f64 {
        self.scroll_top
    }

    pub fn set_scroll_top(&mut self, offset: f64) {
        self.scroll_top = offset;
    }

    fn data(&self, id: NodeId) -> Result<&NodeData, DomError> {
        self.nodes.get(id.0).ok_or(DomError::Missing(id.0))
    }

    fn data_mut(&mut self, id: NodeId) -> Result<&mut NodeData, DomError> {
        self.nodes.get_mut(id.0).ok_or(DomError::Missing(id.0))
    }

    /// Whether the node is still reachable from the root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = id;
        loop {
            match self.nodes.get(current.0) {
                Some(data) if data.alive => match data.parent {
                    Some(parent) => current = parent,
                    None => return current == self.root,
                },
                _ => return false,
            }
        }
    }

    pub fn is_injected(&self, id: NodeId) -> Result<bool, DomError> {
        Ok(self.data(id)?.injected)
    }

    fn attached_element(&self, id: NodeId) -> Result<(), DomError> {
        if !self.is_attached(id) {
            return Err(DomError::Detached);
        }
        match self.data(id)?.kind {
            NodeKind::Element { .. } => Ok(()),
            NodeKind::Text(_) => Err(DomError::NotAnElement),
        }
    }

    fn alloc(&mut self, kind: NodeKind, parent: Option<NodeId>, injected: bool) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeData {
            kind,
            parent,
            children: Vec::new(),
            injected,
            alive: true,
        });
        id
    }

    fn materialize(&mut self, spec: NodeSpec, parent: NodeId) -> NodeId {
        let kind = match spec.kind {
            NodeKind::Element { tag, mut attrs } => {
                attrs.insert(MARKER_ATTR.to_string(), "true".to_string());
                NodeKind::Element { tag, attrs }
            }
            text => text,
        };
        let id = self.alloc(kind, Some(parent), true);
        for child_spec in spec.children {
            let child = self.materialize(child_spec, id);
            // Fresh allocation, so the slot is guaranteed to exist.
            if let Some(data) = self.nodes.get_mut(id.0) {
                data.children.push(child);
            }
        }
        id
    }

    /// Materializes `spec` as the last child of `parent`.
    pub fn append(&mut self, parent: NodeId, spec: NodeSpec) -> Result<NodeId, DomError> {
        self.attached_element(parent)?;
        let id = self.materialize(spec, parent);
        self.data_mut(parent)?.children.push(id);
        self.writes += 1;
        Ok(id)
    }

    /// Materializes `spec` immediately before `reference` under `parent`.
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        spec: NodeSpec,
        reference: NodeId,
    ) -> Result<NodeId, DomError> {
        self.attached_element(parent)?;
        let position = self
            .data(parent)?
            .children
            .iter()
            .position(|&c| c == reference)
            .ok_or(DomError::Detached)?;
        let id = self.materialize(spec, parent);
        self.data_mut(parent)?.children.insert(position, id);
        self.writes += 1;
        Ok(id)
    }

    /// Creates a host-owned element (no marker). Used for mount points the
    /// host page would normally provide, and by tests simulating the host.
    pub fn append_host_element(
        &mut self,
        parent: NodeId,
        tag: impl Into<String>,
    ) -> Result<NodeId, DomError> {
        self.attached_element(parent)?;
        let id = self.alloc(
            NodeKind::Element {
                tag: tag.into(),
                attrs: BTreeMap::new(),
            },
            Some(parent),
            false,
        );
        self.data_mut(parent)?.children.push(id);
        Ok(id)
    }

    /// Detaches an overlay-owned node and its subtree.
    pub fn remove(&mut self, id: NodeId) -> Result<(), DomError> {
        if !self.data(id)?.injected {
            return Err(DomError::HostOwned);
        }
        if !self.is_attached(id) {
            return Err(DomError::Detached);
        }
        let parent = self.data(id)?.parent.ok_or(DomError::HostOwned)?;
        self.data_mut(parent)?.children.retain(|&c| c != id);
        self.kill_subtree(id);
        self.writes += 1;
        Ok(())
    }

    fn kill_subtree(&mut self, id: NodeId) {
        let children = match self.nodes.get_mut(id.0) {
            Some(data) => {
                data.alive = false;
                data.parent = None;
                std::mem::take(&mut data.children)
            }
            None => return,
        };
        for child in children {
            self.kill_subtree(child);
        }
    }

    /// Replaces the text content of an overlay-owned element.
    pub fn set_text(&mut self, id: NodeId, text: &str) -> Result<(), DomError> {
        self.attached_element(id)?;
        if !self.data(id)?.injected {
            return Err(DomError::HostOwned);
        }
        let existing = self.data(id)?.children.clone();
        for child in existing {
            self.kill_subtree(child);
        }
        let text_node = self.alloc(NodeKind::Text(text.to_string()), Some(id), true);
        let data = self.data_mut(id)?;
        data.children = vec![text_node];
        self.writes += 1;
        Ok(())
    }

    /// Replaces the children of an overlay-owned element with freshly
    /// materialized specs. One structural write regardless of spec count.
    pub fn set_content(
        &mut self,
        id: NodeId,
        specs: impl IntoIterator<Item = NodeSpec>,
    ) -> Result<(), DomError> {
        self.attached_element(id)?;
        if !self.data(id)?.injected {
            return Err(DomError::HostOwned);
        }
        let existing = self.data(id)?.children.clone();
        for child in existing {
            self.kill_subtree(child);
        }
        let mut new_children = Vec::new();
        for spec in specs {
            new_children.push(self.materialize(spec, id));
        }
        self.data_mut(id)?.children = new_children;
        self.writes += 1;
        Ok(())
    }

    /// Sets an attribute on an overlay-owned element.
    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        self.attached_element(id)?;
        let data = self.data_mut(id)?;
        if !data.injected {
            return Err(DomError::HostOwned);
        }
        if let NodeKind::Element { attrs, .. } = &mut data.kind {
            attrs.insert(name.to_string(), value.to_string());
        }
        self.writes += 1;
        Ok(())
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> Result<(), DomError> {
        self.attached_element(id)?;
        let data = self.data_mut(id)?;
        if !data.injected {
            return Err(DomError::HostOwned);
        }
        if let NodeKind::Element { attrs, .. } = &mut data.kind {
            attrs.remove(name);
        }
        self.writes += 1;
        Ok(())
    }

    /// Reorders `parent`'s children to exactly `order`.
    ///
    /// Every id in `order` must be an existing child of `parent`; children
    /// not listed are removed from the tree. This mirrors the rebuild step of
    /// a reconciliation pass: one structural write regardless of list length.
    pub fn set_children(&mut self, parent: NodeId, order: &[NodeId]) -> Result<(), DomError> {
        self.attached_element(parent)?;
        if !self.data(parent)?.injected {
            return Err(DomError::HostOwned);
        }
        let current = self.data(parent)?.children.clone();
        for &id in order {
            if !current.contains(&id) {
                return Err(DomError::Detached);
            }
        }
        for &child in &current {
            if !order.contains(&child) {
                self.kill_subtree(child);
            }
        }
        self.data_mut(parent)?.children = order.to_vec();
        self.writes += 1;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read-side accessors (not counted as writes)
    // ------------------------------------------------------------------

    pub fn tag(&self, id: NodeId) -> Result<&str, DomError> {
        match &self.data(id)?.kind {
            NodeKind::Element { tag, .. } => Ok(tag),
            NodeKind::Text(_) => Err(DomError::NotAnElement),
        }
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        match &self.data(id).ok()?.kind {
            NodeKind::Element { attrs, .. } => attrs.get(name).map(String::as_str),
            NodeKind::Text(_) => None,
        }
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.data(id).map(|d| d.children.clone()).unwrap_or_default()
    }

    /// Concatenated text content of the node's subtree.
    pub fn text_of(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        if let Ok(data) = self.data(id) {
            match &data.kind {
                NodeKind::Text(text) => out.push_str(text),
                NodeKind::Element { .. } => {
                    for &child in &data.children {
                        self.collect_text(child, out);
                    }
                }
            }
        }
    }

    /// First descendant element with the given attribute value.
    pub fn find_by_attr(&self, from: NodeId, name: &str, value: &str) -> Option<NodeId> {
        if self.attr(from, name) == Some(value) {
            return Some(from);
        }
        for child in self.children(from) {
            if let Some(found) = self.find_by_attr(child, name, value) {
                return Some(found);
            }
        }
        None
    }
}

impl Default for DomTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appended_elements_carry_the_marker() {
        let mut tree = DomTree::new();
        let root = tree.root();
        let li = tree
            .append(root, NodeSpec::element("li").attr("data-post-id", "1"))
            .unwrap();
        assert_eq!(tree.attr(li, MARKER_ATTR), Some("true"));
        assert_eq!(tree.attr(li, "data-post-id"), Some("1"));
        assert!(tree.is_injected(li).unwrap());
    }

    #[test]
    fn host_owned_nodes_refuse_mutation() {
        let mut tree = DomTree::new();
        let root = tree.root();
        let host = tree.append_host_element(root, "div").unwrap();
        assert_eq!(tree.remove(host), Err(DomError::HostOwned));
        assert_eq!(tree.set_text(host, "nope"), Err(DomError::HostOwned));
        assert_eq!(tree.set_attr(host, "class", "x"), Err(DomError::HostOwned));
    }

    #[test]
    fn remove_detaches_whole_subtree() {
        let mut tree = DomTree::new();
        let root = tree.root();
        let li = tree
            .append(
                root,
                NodeSpec::element("li").child(NodeSpec::element("p").child(NodeSpec::text("body"))),
            )
            .unwrap();
        let p = tree.children(li)[0];
        tree.remove(li).unwrap();
        assert!(!tree.is_attached(li));
        assert!(!tree.is_attached(p));
        assert_eq!(tree.set_text(p, "late"), Err(DomError::Detached));
    }

    #[test]
    fn set_text_replaces_content() {
        let mut tree = DomTree::new();
        let root = tree.root();
        let li = tree
            .append(root, NodeSpec::element("li").child(NodeSpec::text("old")))
            .unwrap();
        tree.set_text(li, "new").unwrap();
        assert_eq!(tree.text_of(li), "new");
        assert_eq!(tree.children(li).len(), 1);
    }

    #[test]
    fn set_children_reorders_and_drops() {
        let mut tree = DomTree::new();
        let root = tree.root();
        let ul = tree.append(root, NodeSpec::element("ul")).unwrap();
        let a = tree.append(ul, NodeSpec::element("li")).unwrap();
        let b = tree.append(ul, NodeSpec::element("li")).unwrap();
        let c = tree.append(ul, NodeSpec::element("li")).unwrap();
        tree.set_children(ul, &[c, a]).unwrap();
        assert_eq!(tree.children(ul), vec![c, a]);
        assert!(!tree.is_attached(b));
    }

    #[test]
    fn insert_before_places_node() {
        let mut tree = DomTree::new();
        let root = tree.root();
        let ul = tree.append(root, NodeSpec::element("ul")).unwrap();
        let a = tree.append(ul, NodeSpec::element("li")).unwrap();
        let b = tree
            .insert_before(ul, NodeSpec::element("li"), a)
            .unwrap();
        assert_eq!(tree.children(ul), vec![b, a]);
    }

    #[test]
    fn write_count_tracks_structural_changes_only() {
        let mut tree = DomTree::new();
        let root = tree.root();
        let before = tree.write_count();
        let li = tree.append(root, NodeSpec::element("li")).unwrap();
        tree.set_text(li, "x").unwrap();
        tree.set_scroll_top(120.0);
        let _ = tree.text_of(li);
        assert_eq!(tree.write_count(), before + 2);
    }
}
