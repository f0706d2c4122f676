//! Configuration loading and env substitution.
//!
//! Config files: `toolhub.toml`, `toolhub.yaml`, `toolhub.yml`, or `toolhub.json`
//! Searched in `./` then `~/.config/toolhub/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        apply_env_overrides, clear_config_dir, config_dir, discover_and_load, load_config,
        set_config_dir,
    },
    schema::{AuthConfig, McpOAuthConfig, ServerConfig, StorageConfig, ToolhubConfig},
};
