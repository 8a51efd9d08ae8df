//! Options popup: HTML form generation and the apply URL intercept.
//!
//! The form is rendered from a string and its Apply button navigates to
//! `http://mediashade.options/apply?...`. The embedder intercepts that URL,
//! decodes it with [`parse_apply_url`] and calls [`apply`], which writes both
//! flags to the `sync` area and reloads the active tab so the content script
//! starts over with the new values.

use tracing::{debug, info};
use url::Url;

use crate::error::ShieldResult;
use crate::settings::{BLOCK_IMAGES, BLOCK_VIDEOS, Settings};
use crate::store::{SettingsStore, StorageArea};

/// Host used by the apply action.
const APPLY_DOMAIN: &str = "mediashade.options";

/// Identifier of a browser tab.
pub type TabId = u64;

/// The slice of tab management the popup needs.
pub trait TabController {
    /// The active tab of the current window, if any.
    fn active_tab(&self) -> Option<TabId>;

    fn reload(&mut self, tab: TabId) -> ShieldResult<()>;
}

/// Returns `true` if the URL is an apply request from the popup.
pub fn is_apply_url(url: &str) -> bool {
    Url::parse(url).is_ok_and(|u| {
        matches!(u.scheme(), "http" | "https")
            && u.host_str() == Some(APPLY_DOMAIN)
            && u.path() == "/apply"
    })
}

/// Decodes the toggles from an apply URL. Missing keys read as `true`.
pub fn parse_apply_url(url: &str) -> Option<Settings> {
    if !is_apply_url(url) {
        return None;
    }
    let parsed = Url::parse(url).ok()?;
    let mut settings = Settings::default();
    for (key, value) in parsed.query_pairs() {
        let on = matches!(value.as_ref(), "true" | "1" | "on");
        match key.as_ref() {
            BLOCK_IMAGES => settings.block_images = on,
            BLOCK_VIDEOS => settings.block_videos = on,
            other => debug!(key = other, "Ignoring unknown apply parameter"),
        }
    }
    Some(settings)
}

/// The apply URL for `settings`.
pub fn apply_url(settings: Settings) -> String {
    let mut url = format!("http://{APPLY_DOMAIN}/apply");
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair(BLOCK_IMAGES, bool_str(settings.block_images))
        .append_pair(BLOCK_VIDEOS, bool_str(settings.block_videos))
        .finish();
    url.push('?');
    url.push_str(&query);
    url
}

fn bool_str(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

/// Current toggles as the popup shows them. Never fails.
pub fn read_settings(store: &dyn SettingsStore) -> Settings {
    store
        .get(StorageArea::Sync, &Settings::defaults_map())
        .map(|values| Settings::from_values(&values))
        .unwrap_or_default()
}

/// Writes both flags in one store call, then reloads the active tab.
///
/// Returns the reloaded tab, or `None` when no tab was active.
pub fn apply(
    store: &mut dyn SettingsStore,
    tabs: &mut dyn TabController,
    settings: Settings,
) -> ShieldResult<Option<TabId>> {
    store.set(StorageArea::Sync, &settings.to_values())?;
    info!(
        block_images = settings.block_images,
        block_videos = settings.block_videos,
        "Settings applied"
    );

    let Some(tab) = tabs.active_tab() else {
        return Ok(None);
    };
    tabs.reload(tab)?;
    Ok(Some(tab))
}

/// The popup page with the current values pre-filled.
pub fn generate_popup_html(settings: Settings) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>MediaShade</title>
<style>
* {{ margin: 0; padding: 0; box-sizing: border-box; }}
body {{
    font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
    background: #1a1a1a; color: #e0e0e0;
    width: 260px; padding: 16px;
}}
h1 {{ font-size: 16px; margin-bottom: 14px; color: #fff; }}
.toggle {{
    display: flex; justify-content: space-between; align-items: center;
    margin-bottom: 10px; font-size: 14px;
}}
.toggle input[type="checkbox"] {{
    width: 18px; height: 18px; accent-color: #6a9eff;
}}
button {{
    width: 100%; margin-top: 8px; padding: 8px 0; border: none;
    border-radius: 4px; font-size: 14px; cursor: pointer;
    background: #6a9eff; color: #000; font-weight: 600;
}}
button:hover {{ background: #85b0ff; }}
.note {{ font-size: 12px; color: #666; margin-top: 8px; }}
</style>
</head>
<body>
<h1>MediaShade</h1>
<label class="toggle"><span>Block images</span>
<input type="checkbox" id="{images_key}" {images_checked}></label>
<label class="toggle"><span>Block videos</span>
<input type="checkbox" id="{videos_key}" {videos_checked}></label>
<button id="apply" onclick="apply()">Apply</button>
<p class="note">The page reloads with the new settings.</p>

<script>
function chk(id) {{ return document.getElementById(id).checked; }}
function apply() {{
    var q = "{images_key}=" + chk("{images_key}")
        + "&{videos_key}=" + chk("{videos_key}");
    window.location.href = "http://{domain}/apply?" + q;
}}
</script>
</body>
</html>"#,
        images_key = BLOCK_IMAGES,
        videos_key = BLOCK_VIDEOS,
        images_checked = checked(settings.block_images),
        videos_checked = checked(settings.block_videos),
        domain = APPLY_DOMAIN,
    )
}

fn checked(on: bool) -> &'static str {
    if on { "checked" } else { "" }
}
