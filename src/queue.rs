//! Pending set of candidates awaiting classification.
//!
//! Set semantics: discovering the same element from several overlapping
//! scans collapses into one entry. Passes take a snapshot and clear the set
//! before iterating, so enqueueing from inside a pass (or a mutation callback
//! that runs while a pass is suspended) never disturbs the snapshot.

use std::collections::BTreeSet;

use crate::dom::NodeId;

#[derive(Debug, Default)]
pub struct WorkQueue {
    pending: BTreeSet<NodeId>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one candidate. Returns `true` if it was not already pending.
    pub fn push(&mut self, element: NodeId) -> bool {
        self.pending.insert(element)
    }

    /// Adds several candidates; returns how many were new.
    pub fn extend(&mut self, elements: impl IntoIterator<Item = NodeId>) -> usize {
        elements.into_iter().filter(|e| self.pending.insert(*e)).count()
    }

    /// Moves every pending entry out. The order is stable but carries no
    /// meaning (it is not insertion order).
    pub fn take_snapshot(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.pending).into_iter().collect()
    }

    pub fn contains(&self, element: NodeId) -> bool {
        self.pending.contains(&element)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
