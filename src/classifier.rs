//! Media classification and neutralization.
//!
//! | kind              | action (when its flag is on)                          |
//! |-------------------|-------------------------------------------------------|
//! | image-like        | none: the stylesheet hides it                         |
//! | background image  | none: the stylesheet drops the background             |
//! | video             | pause, empty every `<source>`, empty `src`, drop poster |
//! | frame             | record original `src`, point it at `about:blank`      |
//!
//! Every step is guarded on its own: a failing read or write is logged and
//! the next step still runs. Video and frame neutralization is one-way; the
//! cleared sources are not put back if the flag is later switched off.

use tracing::{debug, warn};
use url::Url;

use crate::dom::{Dom, NodeId, Selector};
use crate::error::{DomError, DomResult};
use crate::settings::Settings;

/// Navigation target that loads nothing.
pub const INERT_FRAME_TARGET: &str = "about:blank";

/// Attribute holding a frame's source from before neutralization.
pub const FRAME_ORIGINAL_SRC_ATTR: &str = "data-ms-orig-src";

const IMAGE_TAGS: &[&str] = &["img", "picture", "figure"];
const SOURCE_SELECTOR: &[Selector] = &[Selector::Tag("source")];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    ImageLike,
    Video,
    Frame,
    BackgroundImage,
    None,
}

/// What `neutralize` did to one element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The relevant flag is off, or the kind needs no action.
    Skipped,
    /// Handled by the stylesheet; the element was not touched.
    StyleOnly,
    /// Side effects applied; `failures` steps could not be completed.
    Neutralized { failures: u32 },
}

pub fn classify(dom: &dyn Dom, element: NodeId) -> MediaKind {
    let Ok(tag) = dom.tag_name(element) else {
        return MediaKind::None;
    };
    if IMAGE_TAGS.contains(&tag) {
        return MediaKind::ImageLike;
    }
    match tag {
        "video" => MediaKind::Video,
        "iframe" => MediaKind::Frame,
        _ if has_inline_background(dom, element) => MediaKind::BackgroundImage,
        _ => MediaKind::None,
    }
}

fn has_inline_background(dom: &dyn Dom, element: NodeId) -> bool {
    matches!(dom.attribute(element, "style"), Ok(Some(style)) if style.contains("background-image"))
}

/// Applies the minimal action for `kind`. Never fails.
pub fn neutralize(dom: &mut dyn Dom, element: NodeId, kind: MediaKind, settings: Settings) -> Outcome {
    match kind {
        MediaKind::ImageLike | MediaKind::BackgroundImage if settings.block_images => {
            Outcome::StyleOnly
        }
        MediaKind::Video if settings.block_videos => neutralize_video(dom, element),
        MediaKind::Frame if settings.block_videos => neutralize_frame(dom, element),
        _ => Outcome::Skipped,
    }
}

fn neutralize_video(dom: &mut dyn Dom, video: NodeId) -> Outcome {
    let mut failures = 0;

    match dom.pause(video) {
        Ok(()) | Err(DomError::Unsupported { .. }) => {}
        Err(e) => failures += report(video, "pause", e),
    }

    match dom.query_all(video, SOURCE_SELECTOR) {
        Ok(sources) => {
            for source in sources {
                if let Err(e) = dom.set_attribute(source, "src", "") {
                    failures += report(source, "clear source src", e);
                }
            }
        }
        Err(e) => failures += report(video, "list sources", e),
    }

    if let Err(e) = clear_src(dom, video) {
        failures += report(video, "clear src", e);
    }

    if let Err(e) = dom.remove_attribute(video, "poster") {
        failures += report(video, "remove poster", e);
    }

    debug!(%video, failures, "Video neutralized");
    Outcome::Neutralized { failures }
}

fn clear_src(dom: &mut dyn Dom, element: NodeId) -> DomResult<()> {
    let has_src = dom.attribute(element, "src")?.is_some_and(|s| !s.is_empty());
    if has_src {
        dom.set_attribute(element, "src", "")?;
    }
    Ok(())
}

fn neutralize_frame(dom: &mut dyn Dom, frame: NodeId) -> Outcome {
    let mut failures = 0;

    if let Err(e) = record_frame_source(dom, frame) {
        failures += report(frame, "record frame src", e);
    }
    if let Err(e) = dom.set_attribute(frame, "src", INERT_FRAME_TARGET) {
        failures += report(frame, "blank frame", e);
    }

    debug!(%frame, failures, "Frame neutralized");
    Outcome::Neutralized { failures }
}

/// Stores the frame's current source, resolved against the page address
/// when it is relative and the page has one.
fn record_frame_source(dom: &mut dyn Dom, frame: NodeId) -> DomResult<()> {
    let Some(src) = dom.attribute(frame, "src")?.filter(|s| !s.is_empty()) else {
        return Ok(());
    };
    let resolved = match dom.base_url() {
        Some(base) => base
            .join(src)
            .map(String::from)
            .unwrap_or_else(|_| src.to_string()),
        None => src.to_string(),
    };
    dom.set_attribute(frame, FRAME_ORIGINAL_SRC_ATTR, &resolved)
}

/// The source a frame had before it was blanked, if it was an absolute URL.
pub fn recorded_frame_source(dom: &dyn Dom, frame: NodeId) -> Option<Url> {
    let raw = dom.attribute(frame, FRAME_ORIGINAL_SRC_ATTR).ok()??;
    Url::parse(raw).ok()
}

fn report(node: NodeId, action: &'static str, error: DomError) -> u32 {
    warn!(%node, action, error = %error, "Element mutation failed, continuing");
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;

    const ALL_ON: Settings = Settings {
        block_images: true,
        block_videos: true,
    };
    const VIDEOS_OFF: Settings = Settings {
        block_images: true,
        block_videos: false,
    };

    fn video_with_sources(doc: &mut Document, count: usize) -> NodeId {
        let body = doc.body().unwrap();
        let video = doc
            .append_new(body, "video", &[("src", "clip.mp4"), ("poster", "poster.jpg")])
            .unwrap();
        for i in 0..count {
            let src = format!("clip-{i}.webm");
            doc.append_new(video, "source", &[("src", src.as_str())])
                .unwrap();
        }
        video
    }

    #[test]
    fn test_classify_by_tag() {
        let mut doc = Document::new();
        let body = doc.body().unwrap();
        let cases = [
            ("img", MediaKind::ImageLike),
            ("picture", MediaKind::ImageLike),
            ("figure", MediaKind::ImageLike),
            ("video", MediaKind::Video),
            ("iframe", MediaKind::Frame),
            ("div", MediaKind::None),
        ];
        for (tag, kind) in cases {
            let node = doc.append_new(body, tag, &[]).unwrap();
            assert_eq!(classify(&doc, node), kind, "tag {tag}");
        }
        let card = doc
            .append_new(body, "div", &[("style", "background-image: url(x.png)")])
            .unwrap();
        assert_eq!(classify(&doc, card), MediaKind::BackgroundImage);

        let text = doc.create_text("hello");
        assert_eq!(classify(&doc, text), MediaKind::None);
    }

    #[test]
    fn test_video_with_three_sources_is_emptied() {
        let mut doc = Document::new();
        let video = video_with_sources(&mut doc, 3);
        doc.play(video).unwrap();

        let outcome = neutralize(&mut doc, video, MediaKind::Video, ALL_ON);
        assert_eq!(outcome, Outcome::Neutralized { failures: 0 });

        let sources = doc.query_all(video, SOURCE_SELECTOR).unwrap();
        assert_eq!(sources.len(), 3);
        for source in sources {
            assert_eq!(doc.attribute(source, "src").unwrap(), Some(""));
        }
        assert_eq!(doc.attribute(video, "src").unwrap(), Some(""));
        assert_eq!(doc.attribute(video, "poster").unwrap(), None);
        assert_eq!(doc.is_paused(video), Some(true));
    }

    #[test]
    fn test_video_failures_do_not_abort_remaining_steps() {
        let mut doc = Document::new();
        let video = video_with_sources(&mut doc, 2);
        let first_source = doc.children(video)[0];
        doc.disable_pause(video).unwrap();
        doc.seal_attribute(first_source, "src").unwrap();
        doc.seal_attribute(video, "src").unwrap();

        let outcome = neutralize(&mut doc, video, MediaKind::Video, ALL_ON);
        assert_eq!(outcome, Outcome::Neutralized { failures: 2 });

        let second_source = doc.children(video)[1];
        assert_eq!(doc.attribute(second_source, "src").unwrap(), Some(""));
        assert_eq!(doc.attribute(video, "poster").unwrap(), None);
    }

    #[test]
    fn test_video_untouched_when_flag_off() {
        let mut doc = Document::new();
        let video = video_with_sources(&mut doc, 1);
        assert_eq!(
            neutralize(&mut doc, video, MediaKind::Video, VIDEOS_OFF),
            Outcome::Skipped
        );
        assert_eq!(doc.attribute(video, "src").unwrap(), Some("clip.mp4"));
        assert_eq!(doc.attribute(video, "poster").unwrap(), Some("poster.jpg"));
    }

    #[test]
    fn test_frame_is_blanked_and_source_recorded() {
        let mut doc = Document::new();
        let body = doc.body().unwrap();
        let frame = doc
            .append_new(body, "iframe", &[("src", "https://example.test/x")])
            .unwrap();

        let outcome = neutralize(&mut doc, frame, MediaKind::Frame, ALL_ON);
        assert_eq!(outcome, Outcome::Neutralized { failures: 0 });
        assert_eq!(doc.attribute(frame, "src").unwrap(), Some(INERT_FRAME_TARGET));
        assert_eq!(
            recorded_frame_source(&doc, frame),
            Some(Url::parse("https://example.test/x").unwrap())
        );
    }

    #[test]
    fn test_relative_frame_source_resolves_against_page() {
        let mut doc = Document::new();
        doc.set_url(Url::parse("https://social.test/home").unwrap());
        let body = doc.body().unwrap();
        let frame = doc
            .append_new(body, "iframe", &[("src", "/embed/42")])
            .unwrap();
        neutralize(&mut doc, frame, MediaKind::Frame, ALL_ON);
        assert_eq!(
            recorded_frame_source(&doc, frame).map(String::from),
            Some("https://social.test/embed/42".to_string())
        );
    }

    #[test]
    fn test_frame_without_source_is_still_blanked() {
        let mut doc = Document::new();
        let body = doc.body().unwrap();
        let frame = doc.append_new(body, "iframe", &[]).unwrap();
        neutralize(&mut doc, frame, MediaKind::Frame, ALL_ON);
        assert_eq!(doc.attribute(frame, "src").unwrap(), Some(INERT_FRAME_TARGET));
        assert_eq!(doc.attribute(frame, FRAME_ORIGINAL_SRC_ATTR).unwrap(), None);
    }

    #[test]
    fn test_images_are_style_only() {
        let mut doc = Document::new();
        let body = doc.body().unwrap();
        let img = doc.append_new(body, "img", &[("src", "a.png")]).unwrap();
        assert_eq!(
            neutralize(&mut doc, img, MediaKind::ImageLike, ALL_ON),
            Outcome::StyleOnly
        );
        assert_eq!(doc.attribute(img, "src").unwrap(), Some("a.png"));

        let images_off = Settings {
            block_images: false,
            block_videos: true,
        };
        assert_eq!(
            neutralize(&mut doc, img, MediaKind::ImageLike, images_off),
            Outcome::Skipped
        );
    }

    #[test]
    fn test_detached_element_is_harmless() {
        let mut doc = Document::new();
        let video = video_with_sources(&mut doc, 1);
        doc.remove(video).unwrap();
        assert_eq!(classify(&doc, video), MediaKind::None);
        // neutralizing a dead handle reports failures but never panics
        assert!(matches!(
            neutralize(&mut doc, video, MediaKind::Video, ALL_ON),
            Outcome::Neutralized { .. }
        ));
    }
}
