//! Subtree scanner: finds candidates under freshly inserted nodes.
//!
//! Work is proportional to the inserted subtree, never the whole document;
//! only the one-time startup scan looks at everything.

use tracing::{trace, warn};

use crate::dom::{Dom, NodeId, Selector};
use crate::queue::WorkQueue;

/// Media tags plus `[style*="background-image"]`.
pub const CANDIDATE_SELECTORS: &[Selector] = &[
    Selector::Tag("img"),
    Selector::Tag("picture"),
    Selector::Tag("figure"),
    Selector::Tag("video"),
    Selector::Tag("iframe"),
    Selector::AttributeContains {
        name: "style",
        needle: "background-image",
    },
];

/// Counters for one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Candidates found (node itself included).
    pub found: usize,
    /// Of those, how many were not already pending.
    pub enqueued: usize,
    /// The descendant query failed and was skipped.
    pub failed: bool,
}

/// Queues `node` itself if it is a candidate, then every candidate below it.
/// Non-element nodes are ignored.
pub fn scan(dom: &dyn Dom, node: NodeId, queue: &mut WorkQueue) -> ScanReport {
    let mut report = ScanReport::default();
    if !dom.is_element(node) {
        return report;
    }

    if dom.matches(node, CANDIDATE_SELECTORS).unwrap_or(false) {
        report.found += 1;
        report.enqueued += usize::from(queue.push(node));
    }

    match dom.query_all(node, CANDIDATE_SELECTORS) {
        Ok(found) => {
            report.found += found.len();
            report.enqueued += queue.extend(found);
        }
        Err(e) => {
            warn!(%node, error = %e, "Subtree query failed, skipping");
            report.failed = true;
        }
    }
    trace!(%node, found = report.found, enqueued = report.enqueued, "scanned");
    report
}

/// One selection over the whole document.
pub fn scan_document(dom: &dyn Dom, queue: &mut WorkQueue) -> ScanReport {
    let mut report = ScanReport::default();
    match dom.query_all(dom.document(), CANDIDATE_SELECTORS) {
        Ok(found) => {
            report.found = found.len();
            report.enqueued = queue.extend(found);
        }
        Err(e) => {
            warn!(error = %e, "Initial document scan failed");
            report.failed = true;
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;

    #[test]
    fn test_scan_includes_root_and_descendants() {
        let mut doc = Document::new();
        let body = doc.body().unwrap();
        let figure = doc.append_new(body, "figure", &[]).unwrap();
        let img = doc.append_new(figure, "img", &[]).unwrap();
        let caption = doc.append_new(figure, "figcaption", &[]).unwrap();

        let mut queue = WorkQueue::new();
        let report = scan(&doc, figure, &mut queue);
        assert_eq!(report.found, 2);
        assert!(queue.contains(figure));
        assert!(queue.contains(img));
        assert!(!queue.contains(caption));
    }

    #[test]
    fn test_scan_picks_up_inline_backgrounds() {
        let mut doc = Document::new();
        let body = doc.body().unwrap();
        let card = doc
            .append_new(body, "a", &[("style", "background-image: url(x.jpg)")])
            .unwrap();
        let inner = doc
            .append_new(card, "span", &[("style", "color: red; background-image: url(y)")])
            .unwrap();
        let plain = doc.append_new(card, "span", &[("style", "color: red")]).unwrap();

        let mut queue = WorkQueue::new();
        scan(&doc, card, &mut queue);
        assert!(queue.contains(card));
        assert!(queue.contains(inner));
        assert!(!queue.contains(plain));
    }

    #[test]
    fn test_overlapping_scans_collapse() {
        let mut doc = Document::new();
        let body = doc.body().unwrap();
        let outer = doc.append_new(body, "div", &[]).unwrap();
        let inner = doc.append_new(outer, "div", &[]).unwrap();
        doc.append_new(inner, "video", &[]).unwrap();

        let mut queue = WorkQueue::new();
        assert_eq!(scan(&doc, outer, &mut queue).enqueued, 1);
        let again = scan(&doc, inner, &mut queue);
        assert_eq!(again.found, 1);
        assert_eq!(again.enqueued, 0);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_non_elements_are_ignored() {
        let mut doc = Document::new();
        let text = doc.create_text("just words");
        let mut queue = WorkQueue::new();
        assert_eq!(scan(&doc, text, &mut queue), ScanReport::default());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_failed_query_keeps_root_match() {
        let mut doc = Document::new();
        let body = doc.body().unwrap();
        let video = doc.append_new(body, "video", &[]).unwrap();
        let broken = doc.append_new(video, "div", &[]).unwrap();
        doc.poison(broken).unwrap();

        let mut queue = WorkQueue::new();
        let report = scan(&doc, video, &mut queue);
        assert!(report.failed);
        assert!(queue.contains(video));
    }

    #[test]
    fn test_scan_document_finds_everything() {
        let mut doc = Document::new();
        let body = doc.body().unwrap();
        let section = doc.append_new(body, "section", &[]).unwrap();
        doc.append_new(section, "img", &[]).unwrap();
        doc.append_new(section, "iframe", &[]).unwrap();
        doc.append_new(body, "p", &[]).unwrap();

        let mut queue = WorkQueue::new();
        let report = scan_document(&doc, &mut queue);
        assert_eq!(report.found, 2);
        assert_eq!(queue.len(), 2);
    }
}
