//! Arena-backed in-memory document.
//!
//! Nodes live in a slot vector; freeing a node bumps its slot generation so
//! outstanding [`NodeId`]s go stale instead of aliasing the next occupant.
//! While an observer is attached, every child-list change under the document
//! is recorded as a [`MutationRecord`].

use tracing::trace;
use url::Url;

use super::{Dom, MutationRecord, NodeId, Selector};
use crate::error::{DomError, DomResult};

/// Tags that get a playback state (and therefore a `pause` capability).
const MEDIA_ELEMENTS: &[&str] = &["video", "audio"];

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug)]
enum NodeKind {
    Document,
    Element(Element),
    Text(String),
}

#[derive(Debug)]
struct Element {
    tag: String,
    attributes: Vec<(String, String)>,
    sealed: Vec<String>,
    media: Option<MediaState>,
    poisoned: bool,
}

#[derive(Debug, Clone, Copy)]
struct MediaState {
    paused: bool,
    pausable: bool,
}

/// In-memory implementation of [`Dom`].
#[derive(Debug)]
pub struct Document {
    slots: Vec<Slot>,
    free: Vec<u32>,
    document: NodeId,
    html: NodeId,
    url: Option<Url>,
    observing: bool,
    records: Vec<MutationRecord>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// `<html><head></head><body></body></html>`.
    pub fn new() -> Self {
        let mut doc = Self::bare();
        let head = doc.create_element("head");
        let body = doc.create_element("body");
        doc.link(doc.html, head);
        doc.link(doc.html, body);
        doc
    }

    /// A document with only the `<html>` element (no body yet).
    pub fn bare() -> Self {
        let mut doc = Self {
            slots: Vec::new(),
            free: Vec::new(),
            document: NodeId::new(0, 0),
            html: NodeId::new(0, 0),
            url: None,
            observing: false,
            records: Vec::new(),
        };
        doc.document = doc.allocate(NodeKind::Document);
        doc.html = doc.create_element("html");
        doc.link(doc.document, doc.html);
        doc
    }

    /// Sets the page address reported by [`Dom::base_url`].
    pub fn set_url(&mut self, url: Url) {
        self.url = Some(url);
    }

    /// Number of live nodes, document node included.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.node.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.allocate(NodeKind::Text(text.to_string()))
    }

    /// Contents of a text node.
    pub fn text(&self, node: NodeId) -> Option<&str> {
        match &self.node(node).ok()?.kind {
            NodeKind::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Creates a detached element with the given attributes.
    pub fn create_element_with(&mut self, tag: &str, attributes: &[(&str, &str)]) -> NodeId {
        let id = self.create_element(tag);
        if let Some(element) = self.element_mut(id) {
            element.attributes = attributes
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
                .collect();
        }
        id
    }

    /// Creates an element and appends it to `parent` in one step.
    pub fn append_new(
        &mut self,
        parent: NodeId,
        tag: &str,
        attributes: &[(&str, &str)],
    ) -> DomResult<NodeId> {
        let id = self.create_element_with(tag, attributes);
        self.append_child(parent, id)?;
        Ok(id)
    }

    /// Appends several children, reported as a single mutation record.
    ///
    /// Fails without touching the tree if a child is the document node,
    /// `parent` itself or one of its ancestors.
    pub fn append_children(&mut self, parent: NodeId, children: &[NodeId]) -> DomResult<()> {
        self.node(parent)?;
        for &child in children {
            self.node(child)?;
            if child == self.document || self.is_inclusive_ancestor(child, parent) {
                return Err(DomError::Hierarchy { parent, child });
            }
        }
        for &child in children {
            self.detach(child);
            self.link(parent, child);
        }
        if !children.is_empty() && self.observing && self.is_connected(parent) {
            self.records.push(MutationRecord {
                target: Some(parent),
                added_nodes: children.to_vec(),
                removed_nodes: Vec::new(),
            });
        }
        Ok(())
    }

    /// Removes `node` from the tree and frees it with its whole subtree.
    pub fn remove(&mut self, node: NodeId) -> DomResult<()> {
        self.node(node)?;
        if node == self.document {
            return Err(DomError::NotAnElement(node));
        }
        self.detach(node);
        self.free_subtree(node);
        Ok(())
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).ok().and_then(|n| n.parent)
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.node(node).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// Marks an attribute as read-only: writes and removals fail.
    pub fn seal_attribute(&mut self, node: NodeId, name: &str) -> DomResult<()> {
        let element = self.element_checked_mut(node)?;
        element.sealed.push(name.to_ascii_lowercase());
        Ok(())
    }

    /// Makes every selector query touching this element fail.
    pub fn poison(&mut self, node: NodeId) -> DomResult<()> {
        self.element_checked_mut(node)?.poisoned = true;
        Ok(())
    }

    /// Removes the `pause` capability from a media element.
    pub fn disable_pause(&mut self, node: NodeId) -> DomResult<()> {
        if let Some(media) = self.element_checked_mut(node)?.media.as_mut() {
            media.pausable = false;
        }
        Ok(())
    }

    /// Starts playback of a media element.
    pub fn play(&mut self, node: NodeId) -> DomResult<()> {
        match self.element_checked_mut(node)?.media.as_mut() {
            Some(media) => {
                media.paused = false;
                Ok(())
            }
            None => Err(DomError::Unsupported {
                node,
                capability: "play",
            }),
        }
    }

    /// `None` for non-media elements.
    pub fn is_paused(&self, node: NodeId) -> Option<bool> {
        self.element(node).ok()?.media.map(|m| m.paused)
    }

    fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    pub fn is_connected(&self, node: NodeId) -> bool {
        self.is_inclusive_ancestor(self.document, node)
    }

    fn allocate(&mut self, kind: NodeKind) -> NodeId {
        let node = Node {
            kind,
            parent: None,
            children: Vec::new(),
        };
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                NodeId::new(index, slot.generation)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                NodeId::new(index, 0)
            }
        }
    }

    fn node(&self, id: NodeId) -> DomResult<&Node> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
            .ok_or(DomError::Detached(id))
    }

    fn node_mut(&mut self, id: NodeId) -> DomResult<&mut Node> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
            .ok_or(DomError::Detached(id))
    }

    fn element(&self, id: NodeId) -> DomResult<&Element> {
        match &self.node(id)?.kind {
            NodeKind::Element(element) => Ok(element),
            _ => Err(DomError::NotAnElement(id)),
        }
    }

    fn element_checked_mut(&mut self, id: NodeId) -> DomResult<&mut Element> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Element(element) => Ok(element),
            _ => Err(DomError::NotAnElement(id)),
        }
    }

    fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        self.element_checked_mut(id).ok()
    }

    /// Links without recording (used while building the skeleton).
    fn link(&mut self, parent: NodeId, child: NodeId) {
        if let Ok(node) = self.node_mut(child) {
            node.parent = Some(parent);
        }
        if let Ok(node) = self.node_mut(parent) {
            node.children.push(child);
        }
    }

    fn detach(&mut self, child: NodeId) {
        let Some(parent) = self.parent(child) else {
            return;
        };
        if let Ok(node) = self.node_mut(parent) {
            node.children.retain(|c| *c != child);
        }
        if let Ok(node) = self.node_mut(child) {
            node.parent = None;
        }
        if self.observing && self.is_connected(parent) {
            self.records.push(MutationRecord {
                target: Some(parent),
                added_nodes: Vec::new(),
                removed_nodes: vec![child],
            });
        }
    }

    fn free_subtree(&mut self, root: NodeId) {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let index = id.index as usize;
            let Some(slot) = self.slots.get_mut(index) else {
                continue;
            };
            if slot.generation != id.generation {
                continue;
            }
            if let Some(node) = slot.node.take() {
                stack.extend(node.children);
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(id.index);
            }
        }
    }

    /// Pre-order walk of `root`'s descendants. With `selector_walk` set the
    /// walk fails on a poisoned element, like a selector query would.
    fn descendants(&self, root: NodeId, selector_walk: bool) -> DomResult<Vec<NodeId>> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.node(root)?.children.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let node = self.node(id)?;
            if selector_walk
                && let NodeKind::Element(element) = &node.kind
                && element.poisoned
            {
                return Err(DomError::Query(root));
            }
            out.push(id);
            stack.extend(node.children.iter().rev().copied());
        }
        Ok(out)
    }
}

impl Dom for Document {
    fn document(&self) -> NodeId {
        self.document
    }

    fn document_element(&self) -> Option<NodeId> {
        self.is_alive(self.html).then_some(self.html)
    }

    /// First `<body>` child of the document element, looked up on each call
    /// so a body inserted after load is found.
    fn body(&self) -> Option<NodeId> {
        let html = self.document_element()?;
        self.children(html)
            .iter()
            .copied()
            .find(|child| matches!(self.tag_name(*child), Ok("body")))
    }

    fn base_url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    fn is_alive(&self, node: NodeId) -> bool {
        self.node(node).is_ok()
    }

    fn is_element(&self, node: NodeId) -> bool {
        self.element(node).is_ok()
    }

    fn tag_name(&self, node: NodeId) -> DomResult<&str> {
        Ok(&self.element(node)?.tag)
    }

    fn attribute(&self, node: NodeId, name: &str) -> DomResult<Option<&str>> {
        let element = self.element(node)?;
        Ok(element
            .attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str()))
    }

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> DomResult<()> {
        let element = self.element_checked_mut(node)?;
        let name = name.to_ascii_lowercase();
        if element.sealed.contains(&name) {
            return Err(DomError::Sealed { node, name });
        }
        match element.attributes.iter_mut().find(|(k, _)| *k == name) {
            Some((_, v)) => *v = value.to_string(),
            None => element.attributes.push((name, value.to_string())),
        }
        Ok(())
    }

    fn remove_attribute(&mut self, node: NodeId, name: &str) -> DomResult<()> {
        let element = self.element_checked_mut(node)?;
        let name = name.to_ascii_lowercase();
        if element.sealed.contains(&name) {
            return Err(DomError::Sealed { node, name });
        }
        element.attributes.retain(|(k, _)| *k != name);
        Ok(())
    }

    fn query_all(&self, root: NodeId, selectors: &[Selector]) -> DomResult<Vec<NodeId>> {
        if let Ok(element) = self.element(root)
            && element.poisoned
        {
            return Err(DomError::Query(root));
        }
        let mut found = Vec::new();
        for id in self.descendants(root, true)? {
            if self.is_element(id) && self.matches(id, selectors)? {
                found.push(id);
            }
        }
        trace!(%root, found = found.len(), "query_all");
        Ok(found)
    }

    fn element_by_id(&self, id: &str) -> Option<NodeId> {
        // getElementById is not a selector query: poisoned subtrees are walked
        self.descendants(self.document, false)
            .ok()?
            .into_iter()
            .find(|node| matches!(self.attribute(*node, "id"), Ok(Some(v)) if v == id))
    }

    fn create_element(&mut self, tag: &str) -> NodeId {
        let tag = tag.to_ascii_lowercase();
        let media = MEDIA_ELEMENTS.contains(&tag.as_str()).then_some(MediaState {
            paused: true,
            pausable: true,
        });
        self.allocate(NodeKind::Element(Element {
            tag,
            attributes: Vec::new(),
            sealed: Vec::new(),
            media,
            poisoned: false,
        }))
    }

    fn set_text_content(&mut self, node: NodeId, text: &str) -> DomResult<()> {
        self.element(node)?;
        let children = self.children(node).to_vec();
        for child in children {
            self.remove(child)?;
        }
        let text = self.create_text(text);
        self.append_children(node, &[text])
    }

    fn append_child(&mut self, parent: NodeId, child: NodeId) -> DomResult<()> {
        self.append_children(parent, &[child])
    }

    fn pause(&mut self, node: NodeId) -> DomResult<()> {
        match self.element_checked_mut(node)?.media.as_mut() {
            Some(media) if media.pausable => {
                media.paused = true;
                Ok(())
            }
            _ => Err(DomError::Unsupported {
                node,
                capability: "pause",
            }),
        }
    }

    fn observe(&mut self) {
        self.observing = true;
    }

    fn take_records(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEDIA: &[Selector] = &[Selector::Tag("img"), Selector::Tag("video")];

    #[test]
    fn test_new_document_has_body() {
        let doc = Document::new();
        let body = doc.body().unwrap();
        assert_eq!(doc.tag_name(body).unwrap(), "body");
        assert_eq!(doc.root_visible_element(), Some(body));
    }

    #[test]
    fn test_bare_document_falls_back_to_html() {
        let doc = Document::bare();
        assert!(doc.body().is_none());
        assert_eq!(doc.root_visible_element(), doc.document_element());
    }

    #[test]
    fn test_query_all_returns_descendants_in_order() {
        let mut doc = Document::new();
        let body = doc.body().unwrap();
        let div = doc.append_new(body, "div", &[]).unwrap();
        let img = doc.append_new(div, "IMG", &[("src", "a.png")]).unwrap();
        let video = doc.append_new(body, "video", &[]).unwrap();

        assert_eq!(doc.query_all(body, MEDIA).unwrap(), vec![img, video]);
        assert_eq!(doc.query_all(div, MEDIA).unwrap(), vec![img]);
        // root itself is never part of the result
        assert!(doc.query_all(img, MEDIA).unwrap().is_empty());
    }

    #[test]
    fn test_poisoned_subtree_fails_query() {
        let mut doc = Document::new();
        let body = doc.body().unwrap();
        let div = doc.append_new(body, "div", &[]).unwrap();
        doc.append_new(div, "img", &[]).unwrap();
        doc.poison(div).unwrap();
        assert_eq!(doc.query_all(body, MEDIA), Err(DomError::Query(body)));
        assert_eq!(doc.query_all(div, MEDIA), Err(DomError::Query(div)));
    }

    #[test]
    fn test_removed_node_handle_goes_stale() {
        let mut doc = Document::new();
        let body = doc.body().unwrap();
        let img = doc.append_new(body, "img", &[]).unwrap();
        doc.remove(img).unwrap();
        assert!(!doc.is_alive(img));

        // the slot is reused, the old handle must not resolve to the new node
        let video = doc.create_element("video");
        assert_eq!(video.index, img.index);
        assert_ne!(video, img);
        assert_eq!(doc.tag_name(img), Err(DomError::Detached(img)));
    }

    #[test]
    fn test_observer_records_additions_and_removals() {
        let mut doc = Document::new();
        let body = doc.body().unwrap();
        let before = doc.append_new(body, "p", &[]).unwrap();
        assert!(doc.take_records().is_empty(), "not observing yet");

        doc.observe();
        let img = doc.append_new(body, "img", &[]).unwrap();
        doc.remove(before).unwrap();
        let records = doc.take_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].added_nodes, vec![img]);
        assert_eq!(records[1].removed_nodes, vec![before]);
        assert!(doc.take_records().is_empty());
    }

    #[test]
    fn test_detached_insertions_are_not_recorded() {
        let mut doc = Document::new();
        doc.observe();
        let div = doc.create_element("div");
        doc.append_new(div, "img", &[]).unwrap();
        assert!(doc.take_records().is_empty());
    }

    #[test]
    fn test_sealed_attribute_rejects_writes() {
        let mut doc = Document::new();
        let body = doc.body().unwrap();
        let video = doc.append_new(body, "video", &[("src", "v.mp4")]).unwrap();
        doc.seal_attribute(video, "src").unwrap();
        assert!(matches!(
            doc.set_attribute(video, "src", ""),
            Err(DomError::Sealed { .. })
        ));
        assert!(doc.remove_attribute(video, "src").is_err());
        assert_eq!(doc.attribute(video, "src").unwrap(), Some("v.mp4"));
    }

    #[test]
    fn test_pause_capability() {
        let mut doc = Document::new();
        let body = doc.body().unwrap();
        let video = doc.append_new(body, "video", &[]).unwrap();
        let img = doc.append_new(body, "img", &[]).unwrap();
        doc.play(video).unwrap();
        assert_eq!(doc.is_paused(video), Some(false));
        doc.pause(video).unwrap();
        assert_eq!(doc.is_paused(video), Some(true));
        assert!(doc.pause(img).is_err());

        doc.disable_pause(video).unwrap();
        assert!(doc.pause(video).is_err());
    }

    #[test]
    fn test_toggle_class() {
        let mut doc = Document::new();
        let body = doc.body().unwrap();
        doc.toggle_class(body, "a", true).unwrap();
        doc.toggle_class(body, "b", true).unwrap();
        doc.toggle_class(body, "a", true).unwrap();
        assert_eq!(doc.attribute(body, "class").unwrap(), Some("b a"));
        doc.toggle_class(body, "b", false).unwrap();
        assert!(!doc.has_class(body, "b"));
        assert!(doc.has_class(body, "a"));
    }

    #[test]
    fn test_element_by_id() {
        let mut doc = Document::new();
        let html = doc.document_element().unwrap();
        let style = doc.append_new(html, "style", &[("id", "sheet")]).unwrap();
        assert_eq!(doc.element_by_id("sheet"), Some(style));
        assert_eq!(doc.element_by_id("missing"), None);
    }

    #[test]
    fn test_set_text_content_replaces_children() {
        let mut doc = Document::new();
        let body = doc.body().unwrap();
        let p = doc.append_new(body, "p", &[]).unwrap();
        doc.set_text_content(p, "one").unwrap();
        doc.set_text_content(p, "two").unwrap();
        assert_eq!(doc.children(p).len(), 1);
        let text = doc.children(p)[0];
        assert!(!doc.is_element(text));
        assert_eq!(doc.text(text), Some("two"));
        assert_eq!(doc.text(p), None);
    }

    #[test]
    fn test_late_body_is_found() {
        let mut doc = Document::bare();
        let html = doc.document_element().unwrap();
        assert_eq!(doc.root_visible_element(), Some(html));
        doc.append_new(html, "head", &[]).unwrap();
        let body = doc.append_new(html, "body", &[]).unwrap();
        assert_eq!(doc.body(), Some(body));
        assert_eq!(doc.root_visible_element(), Some(body));

        doc.remove(body).unwrap();
        assert_eq!(doc.body(), None);
    }

    #[test]
    fn test_element_by_id_ignores_poisoned_subtrees() {
        let mut doc = Document::new();
        let body = doc.body().unwrap();
        let broken = doc.append_new(body, "div", &[]).unwrap();
        doc.append_new(broken, "span", &[("id", "inside")]).unwrap();
        doc.poison(broken).unwrap();
        let html = doc.document_element().unwrap();
        let sheet = doc.append_new(html, "style", &[("id", "sheet")]).unwrap();

        assert!(doc.query_all(doc.document(), MEDIA).is_err());
        assert_eq!(doc.element_by_id("sheet"), Some(sheet));
        assert!(doc.element_by_id("inside").is_some());
    }

    #[test]
    fn test_append_rejects_cycles() {
        let mut doc = Document::new();
        let body = doc.body().unwrap();
        let outer = doc.append_new(body, "div", &[]).unwrap();
        let inner = doc.append_new(outer, "div", &[]).unwrap();
        doc.observe();

        assert_eq!(
            doc.append_child(inner, outer),
            Err(DomError::Hierarchy {
                parent: inner,
                child: outer
            })
        );
        assert!(matches!(
            doc.append_child(outer, outer),
            Err(DomError::Hierarchy { .. })
        ));
        let document = doc.document();
        assert!(doc.append_child(body, document).is_err());

        // tree and records untouched
        assert_eq!(doc.parent(outer), Some(body));
        assert_eq!(doc.parent(inner), Some(outer));
        assert!(doc.take_records().is_empty());
        assert!(doc.is_connected(inner));
    }
}
