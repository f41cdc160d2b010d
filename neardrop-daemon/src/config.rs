//! Load config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;

/// Daemon configuration. File: ~/.config/neardrop/config.toml or
/// /etc/neardrop/config.toml. Env override: NEARDROP_CACHE_DIR.
///
/// The transfer port, timeouts and buffer sizes are protocol constants, not
/// configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Private cache area. Staged outgoing files live directly here;
    /// received files land in its FileTransfer subdirectory.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

fn default_cache_dir() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CACHE_HOME") {
        return PathBuf::from(xdg).join("neardrop");
    }
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".cache/neardrop"),
        None => PathBuf::from("/tmp/neardrop"),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut config = load_file().unwrap_or_default();
    if let Some(dir) = std::env::var_os("NEARDROP_CACHE_DIR") {
        config.cache_dir = PathBuf::from(dir);
    }
    config
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(home) = home {
        out.push(home.join(".config/neardrop/config.toml"));
    }
    out.push(PathBuf::from("/etc/neardrop/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for path in config_paths() {
        if path.exists() {
            if let Ok(contents) = std::fs::read_to_string(&path) {
                if let Ok(config) = toml::from_str::<Config>(&contents) {
                    return Some(config);
                }
            }
            break;
        }
    }
    None
}
