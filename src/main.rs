//! Point d'entrée du replay MediaShade.
//!
//! Usage :
//!   mediashade-replay [POSTS]
//!
//! Construit un fil social synthétique, y démarre le content script, puis
//! ajoute des posts par lots comme une page à défilement infini, et journalise
//! ce que le bloqueur a fait.
//!
//! Exemples :
//!   cargo run                 → 40 posts, 4 lots
//!   cargo run -- 500          → 500 posts
//!   RUST_LOG=debug cargo run  → détail par passe et par élément

use std::env;
use std::error::Error;

use tracing::info;
use url::Url;

use mediashade::blocker::ContentScript;
use mediashade::config::Config;
use mediashade::dom::{Document, Dom, NodeId};
use mediashade::host::{Host, HostCapabilities};
use mediashade::store::{FileStore, MemoryStore, SettingsStore};

/// Nombre de posts si aucun argument n'est fourni.
const DEFAULT_POSTS: usize = 40;
const STREAMED_BATCHES: usize = 4;
const FEED_URL: &str = "https://social.example/home";

fn main() -> Result<(), Box<dyn Error>> {
    // ── 1. Configuration + logging ────────────────────────────────────
    let config = Config::load();
    mediashade::init_tracing(&config.logging.filter);

    let posts = env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(DEFAULT_POSTS);

    // ── 2. Stockage des réglages ──────────────────────────────────────
    match config.store.path.clone() {
        Some(path) => {
            let store = FileStore::open(path)?;
            replay(config, store, posts)
        }
        None => replay(config, MemoryStore::new(), posts),
    }
}

fn replay<S: SettingsStore>(config: Config, store: S, posts: usize) -> Result<(), Box<dyn Error>> {
    // ── 3. Page initiale, avant le script ─────────────────────────────
    let mut doc = Document::new();
    doc.set_url(Url::parse(FEED_URL)?);
    let body = doc.body().ok_or("document has no body")?;
    let feed = doc.append_new(body, "main", &[("id", "feed")])?;

    let initial = posts / 2;
    for i in 0..initial {
        let post = build_post(&mut doc, i)?;
        doc.append_child(feed, post)?;
    }

    let mut host = Host::new(doc, store, HostCapabilities::default());

    // ── 4. Content script ─────────────────────────────────────────────
    let mut script = ContentScript::new(config);
    script.boot(&mut host);
    let events = host.run(&mut script);
    info!(events, posts = initial, "Initial page processed");

    // ── 5. Défilement infini ──────────────────────────────────────────
    let streamed = posts - initial;
    let per_batch = streamed.div_ceil(STREAMED_BATCHES).max(1);
    let mut next = initial;
    while next < posts {
        let end = (next + per_batch).min(posts);
        let batch = (next..end)
            .map(|i| build_post(&mut host.dom, i))
            .collect::<Result<Vec<_>, _>>()?;
        host.dom.append_children(feed, &batch)?;
        let events = host.run(&mut script);
        info!(events, from = next, to = end, "Streamed batch processed");
        next = end;
    }

    // ── 6. Bilan ──────────────────────────────────────────────────────
    match script.blocker() {
        Some(blocker) => {
            let stats = serde_json::to_string(&blocker.stats())?;
            info!(%stats, settings = ?blocker.settings(), "Replay finished");
        }
        None => info!("Content script did not start, page left untouched"),
    }
    Ok(())
}

/// Un post détaché. Le contenu alterne entre toutes les formes de médias.
fn build_post(doc: &mut Document, i: usize) -> Result<NodeId, Box<dyn Error>> {
    let post_id = format!("post-{i}");
    let post = doc.create_element_with("article", &[("id", post_id.as_str())]);
    let text = doc.create_element("p");
    doc.set_text_content(text, &format!("Post number {i}"))?;

    let media = match i % 5 {
        0 => {
            let figure = doc.create_element("figure");
            let img = format!("/media/{i}.jpg");
            doc.append_new(figure, "img", &[("src", img.as_str()), ("alt", "photo")])?;
            figure
        }
        1 => {
            let poster = format!("/media/{i}-poster.jpg");
            let video = doc.create_element_with(
                "video",
                &[("src", "/media/clip.mp4"), ("poster", poster.as_str()), ("autoplay", "")],
            );
            doc.play(video)?;
            doc.append_new(video, "source", &[("src", "/media/clip.webm"), ("type", "video/webm")])?;
            doc.append_new(video, "source", &[("src", "/media/clip.mp4"), ("type", "video/mp4")])?;
            video
        }
        2 => {
            let embed = format!("/embed/{i}");
            doc.create_element_with("iframe", &[("src", embed.as_str())])
        }
        3 => {
            let style = format!("background-image: url(/media/card-{i}.png)");
            doc.create_element_with("a", &[("href", "/link"), ("style", style.as_str())])
        }
        _ => doc.create_element_with("blockquote", &[("class", "quote")]),
    };

    doc.append_children(post, &[text, media])?;
    Ok(post)
}
