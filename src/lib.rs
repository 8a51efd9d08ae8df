//! # MediaShade : suppression des médias pour les fils sociaux
//!
//! Content script qui masque les images et arrête les vidéos et les frames
//! embarquées sur une page à défilement infini, sans casser la mise en page
//! ni bloquer les clics.
//!
//! ## Architecture des modules
//!
//! - [`dom`] : Interface du document ([`dom::Dom`]) et [`dom::Document`] en
//!   mémoire, avec des handles de nœuds générationnels.
//!
//! - [`host`] : Boucle d'événements coopérative qui simule la page : timers
//!   sur horloge virtuelle, livraison des mutations et des changements de
//!   stockage, callbacks idle.
//!
//! - [`store`] / [`settings`] : Stockage clé/valeur externe (mémoire ou
//!   fichier TOML) et le cache [`settings::SettingsCache`].
//!
//! - [`style`] : Injection de la feuille de style et des deux classes marqueurs.
//!
//! - [`scanner`], [`queue`], [`registry`], [`scheduler`], [`classifier`] :
//!   Le pipeline incrémental, du sous-arbre inséré à l'élément neutralisé.
//!
//! - [`blocker`] : Branche le pipeline sur les événements de l'hôte.
//!
//! - [`popup`] : Formulaire d'options et son action « Appliquer ».
//!
//! - [`config`] : Configuration TOML (budgets du scheduler, noms de classes,
//!   chemin du stockage, filtre de logs).

pub mod blocker;
pub mod classifier;
pub mod config;
pub mod dom;
pub mod error;
pub mod host;
pub mod popup;
pub mod queue;
pub mod registry;
pub mod scanner;
pub mod scheduler;
pub mod settings;
pub mod store;
pub mod style;

use tracing_subscriber::EnvFilter;

/// Installs the `fmt` subscriber. `RUST_LOG` wins over `filter`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing(filter: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}
