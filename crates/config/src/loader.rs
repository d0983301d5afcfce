use std::{
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use {
    anyhow::Context,
    tracing::{debug, warn},
};

use crate::{env_subst::substitute_env, schema::ServiceConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "pipedeck.toml",
    "pipedeck.yaml",
    "pipedeck.yml",
    "pipedeck.json",
];

/// Name of the data directory under the user's home.
const DATA_DIR_NAME: &str = ".pipedeck";

/// Override for the config directory, set via `set_config_dir()`.
static CONFIG_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Process-wide data directory, set via `set_data_dir()` before startup.
static DATA_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

fn lock(slot: &'static Mutex<Option<PathBuf>>) -> MutexGuard<'static, Option<PathBuf>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Set a custom config directory. When set, discovery only looks there.
pub fn set_config_dir(path: PathBuf) {
    *lock(&CONFIG_DIR_OVERRIDE) = Some(path);
}

/// Clear the config directory override, restoring default discovery.
pub fn clear_config_dir() {
    *lock(&CONFIG_DIR_OVERRIDE) = None;
}

/// Set the process-wide data directory. A leading `~` expands to the home dir.
pub fn set_data_dir(path: impl AsRef<Path>) {
    *lock(&DATA_DIR_OVERRIDE) = Some(expand_home(path.as_ref()));
}

/// Clear the data directory override.
pub fn clear_data_dir() {
    *lock(&DATA_DIR_OVERRIDE) = None;
}

/// Returns the data directory: override, or `~/.pipedeck/`.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = lock(&DATA_DIR_OVERRIDE).clone() {
        return dir;
    }
    home_dir()
        .map(|h| h.join(DATA_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(DATA_DIR_NAME))
}

/// Default dashboard install directory: `<data_dir>/dashboard`.
pub fn default_install_dir() -> PathBuf {
    data_dir().join("dashboard")
}

/// Returns the config directory: override, or `~/.config/pipedeck/`.
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = lock(&CONFIG_DIR_OVERRIDE).clone() {
        return Some(dir);
    }
    home_dir().map(|h| h.join(".config").join("pipedeck"))
}

/// Expand a leading `~` or `~/` to the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<ServiceConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path).with_context(|| format!("failed to parse {}", path.display()))
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./pipedeck.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/pipedeck/pipedeck.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to `ServiceConfig::default()` when nothing is found or the
/// file cannot be parsed.
pub fn discover_and_load() -> ServiceConfig {
    let Some(path) = find_config_file() else {
        debug!("no config file found, using defaults");
        return ServiceConfig::default();
    };

    debug!(path = %path.display(), "loading config");
    match load_config(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(path = %path.display(), error = %format!("{e:#}"), "failed to load config, using defaults");
            ServiceConfig::default()
        },
    }
}

/// Find the first config file in standard locations.
///
/// With a config dir override only that directory is searched.
pub fn find_config_file() -> Option<PathBuf> {
    if let Some(dir) = lock(&CONFIG_DIR_OVERRIDE).clone() {
        return first_existing(&dir);
    }

    first_existing(Path::new("."))
        .or_else(|| config_dir().and_then(|dir| first_existing(&dir)))
}

fn first_existing(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<ServiceConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
