use {
    anyhow::Result,
    clap::Subcommand,
    secrecy::Secret,
    toolhub_config::ToolhubConfig,
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration (file + environment) as TOML.
    Show,
    /// Print the directory searched for the user-global config file.
    Path,
}

pub fn handle_config(action: ConfigAction, config: &ToolhubConfig) -> Result<()> {
    match action {
        ConfigAction::Show => {
            print!("{}", render(config)?);
            Ok(())
        },
        ConfigAction::Path => {
            match toolhub_config::config_dir() {
                Some(dir) => println!("{}", dir.display()),
                None => eprintln!("no home directory; only ./toolhub.* is searched"),
            }
            Ok(())
        },
    }
}

/// TOML rendering with the client secret masked.
fn render(config: &ToolhubConfig) -> Result<String> {
    let mut shown = config.clone();
    if shown.mcp_oauth.client_secret.is_some() {
        shown.mcp_oauth.client_secret = Some(Secret::new("[REDACTED]".into()));
    }
    Ok(toml::to_string_pretty(&shown)?)
}
