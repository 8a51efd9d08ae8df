//! Stylesheet injection and marker classes.
//!
//! All hiding happens in CSS scoped by two classes on the root visible
//! element, so flipping a toggle is O(1) regardless of how many media
//! elements the page holds. Hidden media never receives pointer events;
//! inline background images are dropped while their containers stay
//! clickable.

use tracing::{debug, info};

use crate::config::StyleConfig;
use crate::dom::{Dom, NodeId};
use crate::error::{DomError, DomResult};
use crate::settings::Settings;

/// Owns the class names and stylesheet id.
#[derive(Debug, Clone)]
pub struct StyleController {
    config: StyleConfig,
}

impl StyleController {
    pub fn new(config: StyleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StyleConfig {
        &self.config
    }

    /// The stylesheet text for the configured class names.
    pub fn stylesheet(&self) -> String {
        let StyleConfig {
            hide_images_class: images,
            hide_videos_class: videos,
            placeholder_class: placeholder,
            ..
        } = &self.config;
        format!(
            r#"
/* Fast toggles via root class */
.{images} img,
.{images} picture,
.{images} figure {{
  visibility: hidden !important;
  opacity: 0 !important;
  pointer-events: none !important;
}}

.{videos} video,
.{videos} iframe {{
  visibility: hidden !important;
  opacity: 0 !important;
  pointer-events: none !important;
}}

/* inline background images: drop the image, keep the container clickable */
.{images} [style*="background-image"] {{
  background-image: none !important;
  pointer-events: auto !important;
}}

.{placeholder} {{
  pointer-events: none !important;
  user-select: none !important;
  min-height: 48px;
  display: block !important;
  font-size: 12px;
  color: #666;
  opacity: 0.95;
  background: transparent !important;
}}
"#
        )
    }

    /// Inserts the stylesheet unless an element with the reserved id already
    /// exists. Returns the stylesheet element and whether it was created now.
    pub fn inject_once(&self, dom: &mut dyn Dom) -> DomResult<(NodeId, bool)> {
        if let Some(existing) = dom.element_by_id(&self.config.stylesheet_id) {
            debug!(id = %self.config.stylesheet_id, "Stylesheet already present");
            return Ok((existing, false));
        }
        let root = dom
            .document_element()
            .ok_or_else(|| DomError::Detached(dom.document()))?;
        let style = dom.create_element("style");
        dom.set_attribute(style, "id", &self.config.stylesheet_id)?;
        dom.set_text_content(style, &self.stylesheet())?;
        dom.append_child(root, style)?;
        info!(id = %self.config.stylesheet_id, "Stylesheet injected");
        Ok((style, true))
    }

    /// Mirrors both flags onto the root visible element's classes.
    pub fn sync_classes(&self, dom: &mut dyn Dom, settings: Settings) -> DomResult<()> {
        let root = dom
            .root_visible_element()
            .ok_or_else(|| DomError::Detached(dom.document()))?;
        dom.toggle_class(root, &self.config.hide_images_class, settings.block_images)?;
        dom.toggle_class(root, &self.config.hide_videos_class, settings.block_videos)?;

        // classes set on <html> before the body existed would keep hiding
        if let Some(html) = dom.document_element().filter(|html| *html != root) {
            for class in [&self.config.hide_images_class, &self.config.hide_videos_class] {
                if dom.has_class(html, class) {
                    dom.toggle_class(html, class, false)?;
                }
            }
        }
        debug!(
            block_images = settings.block_images,
            block_videos = settings.block_videos,
            "Marker classes synced"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;

    fn controller() -> StyleController {
        StyleController::new(StyleConfig::default())
    }

    #[test]
    fn test_inject_once_is_idempotent() {
        let mut doc = Document::new();
        let style = controller();
        let (first, created) = style.inject_once(&mut doc).unwrap();
        assert!(created);
        let (second, created_again) = style.inject_once(&mut doc).unwrap();
        assert!(!created_again);
        assert_eq!(first, second);

        let sheets = doc
            .query_all(doc.document(), &[crate::dom::Selector::Tag("style")])
            .unwrap();
        assert_eq!(sheets.len(), 1);
    }

    #[test]
    fn test_separate_controllers_share_the_reserved_id() {
        let mut doc = Document::new();
        controller().inject_once(&mut doc).unwrap();
        let (_, created) = controller().inject_once(&mut doc).unwrap();
        assert!(!created);
    }

    #[test]
    fn test_stylesheet_keeps_pointer_events_off_media() {
        let css = controller().stylesheet();
        assert!(css.contains(".ms-hide-images img"));
        assert!(css.contains(".ms-hide-videos iframe"));
        assert!(css.contains("pointer-events: none !important"));
        assert!(css.contains("background-image: none !important"));
        assert!(css.contains("pointer-events: auto !important"));
        assert!(css.contains("user-select: none !important"));
    }

    #[test]
    fn test_sync_classes_mirrors_settings() {
        let mut doc = Document::new();
        let style = controller();
        let body = doc.body().unwrap();

        style
            .sync_classes(
                &mut doc,
                Settings {
                    block_images: true,
                    block_videos: false,
                },
            )
            .unwrap();
        assert!(doc.has_class(body, "ms-hide-images"));
        assert!(!doc.has_class(body, "ms-hide-videos"));

        style
            .sync_classes(
                &mut doc,
                Settings {
                    block_images: false,
                    block_videos: true,
                },
            )
            .unwrap();
        assert!(!doc.has_class(body, "ms-hide-images"));
        assert!(doc.has_class(body, "ms-hide-videos"));
    }

    #[test]
    fn test_sync_classes_without_body_uses_html() {
        let mut doc = Document::bare();
        let html = doc.document_element().unwrap();
        controller()
            .sync_classes(&mut doc, Settings::default())
            .unwrap();
        assert!(doc.has_class(html, "ms-hide-images"));
        assert!(doc.has_class(html, "ms-hide-videos"));
    }

    #[test]
    fn test_sync_classes_moves_off_html_once_body_exists() {
        let mut doc = Document::bare();
        let style = controller();
        let html = doc.document_element().unwrap();
        style.sync_classes(&mut doc, Settings::default()).unwrap();

        let body = doc.append_new(html, "body", &[]).unwrap();
        let images_off = Settings {
            block_images: false,
            block_videos: true,
        };
        style.sync_classes(&mut doc, images_off).unwrap();

        assert!(!doc.has_class(html, "ms-hide-images"));
        assert!(!doc.has_class(html, "ms-hide-videos"));
        assert!(!doc.has_class(body, "ms-hide-images"));
        assert!(doc.has_class(body, "ms-hide-videos"));
    }
}
