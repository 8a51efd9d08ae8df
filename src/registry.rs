//! Dedup registry: which elements have already been decided on.
//!
//! Entries are [`NodeId`] handles, which neither own nor pin the element; a
//! removed element's handle simply never matches a live node again. Entries
//! for freed elements are dropped by [`DedupRegistry::prune`], so membership
//! never outlives the element.

use std::collections::HashSet;

use crate::dom::{Dom, NodeId};

#[derive(Debug, Default)]
pub struct DedupRegistry {
    seen: HashSet<NodeId>,
}

impl DedupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self, element: NodeId) -> bool {
        self.seen.contains(&element)
    }

    /// Records `element`. Returns `true` if it was not known before.
    pub fn mark_seen(&mut self, element: NodeId) -> bool {
        self.seen.insert(element)
    }

    /// Drops entries whose element no longer exists. Returns how many went.
    pub fn prune(&mut self, dom: &dyn Dom) -> usize {
        let before = self.seen.len();
        self.seen.retain(|element| dom.is_alive(*element));
        before - self.seen.len()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
