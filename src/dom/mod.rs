//! Document model seam.
//!
//! The pipeline never touches a concrete tree: it reads tag names and a few
//! attributes, toggles classes on the root visible element, clears media
//! sources and inserts one stylesheet, all through the [`Dom`] trait.
//! [`Document`] is the in-memory implementation used by the replay binary
//! and the tests.
//!
//! Node handles ([`NodeId`]) are plain `Copy` values. They do not keep a node
//! alive, and once a node is freed its slot's generation moves on, so an old
//! handle can never resolve to whatever node reuses the slot.

mod arena;

use std::fmt;

use url::Url;

pub use arena::Document;

use crate::error::DomResult;

/// Non-owning handle to a node of a [`Dom`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl NodeId {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// The small selector vocabulary the scanner needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    /// Matches elements by lower-case tag name (`img`, `video`, ...).
    Tag(&'static str),
    /// `[name*="needle"]`: attribute present and containing `needle`.
    AttributeContains {
        name: &'static str,
        needle: &'static str,
    },
}

impl Selector {
    /// Evaluates the selector against an element's tag and attribute lookup.
    pub fn matches<'a>(&self, tag: &str, attribute: impl Fn(&str) -> Option<&'a str>) -> bool {
        match *self {
            Selector::Tag(name) => tag.eq_ignore_ascii_case(name),
            Selector::AttributeContains { name, needle } => {
                attribute(name).is_some_and(|value| value.contains(needle))
            }
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Tag(name) => f.write_str(name),
            Selector::AttributeContains { name, needle } => write!(f, "[{name}*=\"{needle}\"]"),
        }
    }
}

/// One child-list change observed on the document subtree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationRecord {
    pub target: Option<NodeId>,
    pub added_nodes: Vec<NodeId>,
    pub removed_nodes: Vec<NodeId>,
}

/// Operations the pipeline needs from a live document.
///
/// Tag names are reported in lower case. Queries return descendants of
/// `root` only (never `root` itself), in document order.
pub trait Dom {
    /// The document node (parent of the `<html>` element).
    fn document(&self) -> NodeId;

    fn document_element(&self) -> Option<NodeId>;

    fn body(&self) -> Option<NodeId>;

    fn is_alive(&self, node: NodeId) -> bool;

    fn is_element(&self, node: NodeId) -> bool;

    fn tag_name(&self, node: NodeId) -> DomResult<&str>;

    fn attribute(&self, node: NodeId, name: &str) -> DomResult<Option<&str>>;

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> DomResult<()>;

    fn remove_attribute(&mut self, node: NodeId, name: &str) -> DomResult<()>;

    fn query_all(&self, root: NodeId, selectors: &[Selector]) -> DomResult<Vec<NodeId>>;

    fn element_by_id(&self, id: &str) -> Option<NodeId>;

    fn create_element(&mut self, tag: &str) -> NodeId;

    fn set_text_content(&mut self, node: NodeId, text: &str) -> DomResult<()>;

    fn append_child(&mut self, parent: NodeId, child: NodeId) -> DomResult<()>;

    /// Pauses playback of a media element.
    fn pause(&mut self, node: NodeId) -> DomResult<()>;

    /// Starts recording child-list mutations for the whole document.
    fn observe(&mut self);

    /// Drains the mutation records gathered since the last call.
    fn take_records(&mut self) -> Vec<MutationRecord>;

    /// Address of the page, used to resolve relative `src` values.
    fn base_url(&self) -> Option<&Url> {
        None
    }

    /// The element that carries the marker classes: `<body>`, or the
    /// document element while the body does not exist yet.
    fn root_visible_element(&self) -> Option<NodeId> {
        self.body().or_else(|| self.document_element())
    }

    fn matches(&self, node: NodeId, selectors: &[Selector]) -> DomResult<bool> {
        let tag = self.tag_name(node)?;
        Ok(selectors.iter().any(|selector| {
            selector.matches(tag, |name| self.attribute(node, name).ok().flatten())
        }))
    }

    fn has_class(&self, node: NodeId, class: &str) -> bool {
        matches!(
            self.attribute(node, "class"),
            Ok(Some(list)) if list.split_ascii_whitespace().any(|c| c == class)
        )
    }

    /// `classList.toggle(class, force)`.
    fn toggle_class(&mut self, node: NodeId, class: &str, force: bool) -> DomResult<()> {
        let current = self.attribute(node, "class")?.unwrap_or_default();
        let mut classes: Vec<&str> = current
            .split_ascii_whitespace()
            .filter(|c| *c != class)
            .collect();
        if force {
            classes.push(class);
        }
        let updated = classes.join(" ");
        self.set_attribute(node, "class", &updated)
    }
}
