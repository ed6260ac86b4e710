//! Rendered-entry ledger.
//!
//! Maps entity ids to the live node handles that currently represent them,
//! together with the transient UI state that must survive refresh cycles
//! (open comment threads, in-progress edits, an applied style variant). The
//! index is the authoritative record of "what is on screen"; reconciliation
//! verifies containment against the tree before mutating through it.

use super::tree::NodeId;
use std::collections::HashMap;

/// Node handles captured when an entry's subtree is materialized.
#[derive(Debug, Clone, Copy)]
pub struct EntryNodes {
    /// The entry's root element (the list item).
    pub root: NodeId,
    /// The body-text element.
    pub body: NodeId,
    /// The like toggle (text carries the count).
    pub like_button: NodeId,
    /// The comment-count toggle; absent for comment entries.
    pub comment_toggle: Option<NodeId>,
    /// Slot holding an attached sticker, if any.
    pub sticker_slot: NodeId,
}

/// Per-entry UI state preserved across reconciliation passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UiState {
    pub comments_open: bool,
    pub editing: bool,
    pub variant: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RenderedEntry {
    pub nodes: EntryNodes,
    pub ui: UiState,
    /// Entries loaded through manual pagination live in the "older" section
    /// and are exempt from removal on authoritative refreshes.
    pub in_more_section: bool,
}

/// Id → rendered entry. Each id appears at most once.
#[derive(Debug, Default)]
pub struct RenderedIndex {
    entries: HashMap<String, RenderedEntry>,
}

impl RenderedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entry. Replacing an existing id is a bug in the caller, so
    /// the previous entry is returned for the caller to assert on.
    pub fn insert(&mut self, id: impl Into<String>, entry: RenderedEntry) -> Option<RenderedEntry> {
        self.entries.insert(id.into(), entry)
    }

    pub fn get(&self, id: &str) -> Option<&RenderedEntry> {
        self.entries.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut RenderedEntry> {
        self.entries.get_mut(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<RenderedEntry> {
        self.entries.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RenderedEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Snapshot of transient UI state, keyed by id. Taken at the start of a
    /// reconciliation pass so state can be restored onto surviving entries.
    pub fn snapshot_ui(&self) -> HashMap<String, UiState> {
        self.entries
            .iter()
            .map(|(id, entry)| (id.clone(), entry.ui.clone()))
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
