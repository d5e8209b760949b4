use std::{
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use {
    secrecy::SecretString,
    tracing::{debug, warn},
};

use crate::{env_subst::substitute_env, schema::CourierConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "courier.toml",
    "courier.yaml",
    "courier.yml",
    "courier.json",
];

/// Override for the config directory, set via `set_config_dir()`.
static CONFIG_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Set a custom config directory. When set, config discovery only looks in
/// this directory (working-directory and user-global paths are skipped).
pub fn set_config_dir(path: PathBuf) {
    *CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = Some(path);
}

/// Clear the config directory override, restoring default discovery.
pub fn clear_config_dir() {
    *CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = None;
}

fn config_dir_override() -> Option<PathBuf> {
    CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Load config from the given path (any supported format), then apply
/// environment overrides.
pub fn load_config(path: &Path) -> anyhow::Result<CourierConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    let mut config = parse_config(&raw, path)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./courier.{toml,yaml,yml,json}`
/// 2. `~/.config/courier/courier.{toml,yaml,yml,json}`
///
/// Falls back to `CourierConfig::default()` (plus env overrides) when no file
/// is found or the file fails to parse.
pub fn discover_and_load() -> CourierConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    let mut config = CourierConfig::default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return first_existing(&dir);
    }

    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    config_dir().and_then(|dir| first_existing(&dir))
}

fn first_existing(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the config directory: override, or `~/.config/courier/`.
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return Some(dir);
    }
    directories::BaseDirs::new().map(|d| d.home_dir().join(".config").join("courier"))
}

/// `PORT` and the `WHATSAPP_*` variables take precedence over file values.
fn apply_env_overrides(config: &mut CourierConfig, lookup: impl Fn(&str) -> Option<String>) {
    let present = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(port) = present("PORT") {
        match port.trim().parse() {
            Ok(p) => config.server.port = p,
            Err(_) => warn!(value = %port, "ignoring invalid PORT"),
        }
    }
    if let Some(token) = present("WHATSAPP_TOKEN") {
        config.whatsapp.access_token = Some(SecretString::new(token));
    }
    if let Some(phone_id) = present("WHATSAPP_PHONE_ID") {
        config.whatsapp.phone_id = Some(phone_id);
    }
    if let Some(url) = present("WHATSAPP_API_URL") {
        config.whatsapp.api_url = url;
    }
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<CourierConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
