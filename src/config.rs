//! Tuning knobs read from `config.toml`.
//!
//! Every section is `#[serde(default)]`, so an empty or partial file means
//! stock behavior. [`Config::load`] walks [`search_paths`] and never fails;
//! [`Config::from_file`] is the strict variant that reports parse errors.
//!
//! Candidates: `$MEDIASHADE_CONFIG`, `<exe_dir>/config.toml`, the platform
//! config directory, then `./config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ShieldError, ShieldResult};

// ─────────────────────────────────────────────────────────────────────────────
// Config structs
// ─────────────────────────────────────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub style: StyleConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

/// Idle-time processing budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound before an idle callback is forced to run.
    pub idle_timeout_ms: u64,
    /// Delay used when the host has no idle-callback primitive.
    pub fallback_delay_ms: u64,
    /// A pass yields once less than this much idle time remains.
    pub min_time_remaining_ms: u64,
    /// Use the idle-callback primitive when the host offers one.
    pub prefer_idle_callback: bool,
}

/// Reserved identifiers written into the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleConfig {
    pub stylesheet_id: String,
    pub hide_images_class: String,
    pub hide_videos_class: String,
    pub placeholder_class: String,
}

/// Where the file-backed settings store lives. Empty = in-memory store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: Option<PathBuf>,
}

/// Fallback log filter, used when `RUST_LOG` is unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Default impls
// ─────────────────────────────────────────────────────────────────────────────

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 200,
            fallback_delay_ms: 60,
            min_time_remaining_ms: 5,
            prefer_idle_callback: true,
        }
    }
}

impl SchedulerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn fallback_delay(&self) -> Duration {
        Duration::from_millis(self.fallback_delay_ms)
    }

    pub fn min_time_remaining(&self) -> Duration {
        Duration::from_millis(self.min_time_remaining_ms)
    }
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            stylesheet_id: "ms-blocker-safe-css".to_string(),
            hide_images_class: "ms-hide-images".to_string(),
            hide_videos_class: "ms-hide-videos".to_string(),
            placeholder_class: "ms-media-blocked-placeholder".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────────────

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "MEDIASHADE_CONFIG";

const CONFIG_FILE: &str = "config.toml";

impl Config {
    /// Loads from the first config file found on the search path.
    /// Never fails: a missing, unreadable or invalid file yields defaults.
    pub fn load() -> Self {
        let override_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        Self::load_from(&search_paths(override_path))
    }

    /// Like [`Config::load`] over an explicit candidate list.
    pub fn load_from(candidates: &[PathBuf]) -> Self {
        let Some(path) = candidates.iter().find(|p| p.is_file()) else {
            info!("No config file found, using defaults");
            return Self::default();
        };
        match Self::from_file(path) {
            Ok(config) => {
                info!(path = %path.display(), "Configuration loaded");
                config
            }
            Err(e) => {
                warn!(error = %e, "Config unusable, using defaults");
                Self::default()
            }
        }
    }

    /// Reads and parses one file. Missing sections take their defaults.
    pub fn from_file(path: &Path) -> ShieldResult<Self> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|source| ShieldError::Config {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Candidate files, most specific first: the explicit override, next to
/// the executable, the platform config directory, the working directory.
pub fn search_paths(override_path: Option<PathBuf>) -> Vec<PathBuf> {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    override_path
        .into_iter()
        .chain(exe_dir.map(|dir| dir.join(CONFIG_FILE)))
        .chain(platform_config_dir().map(|dir| dir.join(CONFIG_FILE)))
        .chain(std::iter::once(PathBuf::from(CONFIG_FILE)))
        .collect()
}

/// `%APPDATA%\MediaShade` or `$XDG_CONFIG_HOME/mediashade` (`~/.config`).
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(windows)]
    {
        std::env::var("APPDATA")
            .ok()
            .map(|appdata| PathBuf::from(appdata).join("MediaShade"))
    }
    #[cfg(not(windows))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .or_else(|| std::env::var("HOME").ok().map(|h| format!("{h}/.config")))
            .map(|dir| PathBuf::from(dir).join("mediashade"))
    }
}
