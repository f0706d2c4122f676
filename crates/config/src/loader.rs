use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{env_subst::substitute_env, schema::ToolhubConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "toolhub.toml",
    "toolhub.yaml",
    "toolhub.yml",
    "toolhub.json",
];

/// Env var names applied on top of the file config.
pub const ENV_CLIENT_ID: &str = "MCP_OAUTH_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "MCP_OAUTH_CLIENT_SECRET";
pub const ENV_REDIRECT_URL: &str = "TOOLHUB_REDIRECT_URL";

static CONFIG_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Override the user-global config directory (e.g. from `--config-dir`).
pub fn set_config_dir(path: PathBuf) {
    if let Ok(mut guard) = CONFIG_DIR_OVERRIDE.lock() {
        *guard = Some(path);
    }
}

/// Drop a previous [`set_config_dir`] override.
pub fn clear_config_dir() {
    if let Ok(mut guard) = CONFIG_DIR_OVERRIDE.lock() {
        *guard = None;
    }
}

/// Returns the config directory: the override if set, else `~/.config/toolhub/`.
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = CONFIG_DIR_OVERRIDE.lock().ok().and_then(|g| g.clone()) {
        return Some(dir);
    }
    directories::ProjectDirs::from("", "", "toolhub").map(|d| d.config_dir().to_path_buf())
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<ToolhubConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations, then apply env overrides.
///
/// Search order:
/// 1. `./toolhub.{toml,yaml,yml,json}` (project-local)
/// 2. `<config_dir>/toolhub.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to `ToolhubConfig::default()` if no config file is found.
pub fn discover_and_load() -> ToolhubConfig {
    let mut config = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            match load_config(&path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                    ToolhubConfig::default()
                },
            }
        },
        None => {
            debug!("no config file found, using defaults");
            ToolhubConfig::default()
        },
    };
    apply_env_overrides(&mut config);
    config
}

/// Apply `MCP_OAUTH_CLIENT_ID`, `MCP_OAUTH_CLIENT_SECRET` and
/// `TOOLHUB_REDIRECT_URL` from the process environment.
pub fn apply_env_overrides(config: &mut ToolhubConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

fn apply_env_overrides_with(config: &mut ToolhubConfig, lookup: impl Fn(&str) -> Option<String>) {
    let present = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(id) = present(ENV_CLIENT_ID) {
        config.mcp_oauth.client_id = Some(id);
    }
    if let Some(secret) = present(ENV_CLIENT_SECRET) {
        config.mcp_oauth.client_secret = Some(Secret::new(secret));
    }
    if let Some(url) = present(ENV_REDIRECT_URL) {
        config.auth.redirect_url = url;
    }
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<ToolhubConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
