use std::time::Duration;

use {
    anyhow::Result,
    clap::Subcommand,
    toolhub_config::ToolhubConfig,
    toolhub_gateway::register_stored_servers,
    toolhub_mcp::{McpServerRecord, server_status},
};

use crate::runtime::{build_state, open_store};

#[derive(Subcommand)]
pub enum ServersAction {
    /// List stored servers with their credential status.
    List {
        /// Only show servers owned by this user id.
        #[arg(long)]
        owner: Option<i64>,
    },
    /// Refresh expiring tokens for every stored server and report the result.
    Refresh,
}

pub async fn handle_servers(action: ServersAction, config: &ToolhubConfig) -> Result<()> {
    match action {
        ServersAction::List { owner } => {
            let store = open_store(config)?;
            let records = match owner {
                Some(owner) => store.list(owner).await?,
                None => store.list_all().await?,
            };
            if records.is_empty() {
                println!("No MCP servers stored.");
            }
            for record in &records {
                println!("{}", describe(record));
            }
            Ok(())
        },
        ServersAction::Refresh => {
            let state = build_state(config)?;
            let report = register_stored_servers(
                state.store.as_ref(),
                &state.lifecycle,
                Duration::from_secs(config.mcp_oauth.startup_refresh_timeout_secs),
            )
            .await;
            println!(
                "{} checked, {} need re-authorization, {} failed, {} timed out, {} disabled",
                report.registered,
                report.needs_reauth,
                report.failed,
                report.timed_out,
                report.skipped
            );
            Ok(())
        },
    }
}

fn describe(record: &McpServerRecord) -> String {
    let target = record
        .remote_url()
        .map(str::to_string)
        .unwrap_or_else(|| format!("stdio: {}", record.command));
    format!(
        "{:>4}  {:<24} owner={:<4} {:<12} {target}",
        record.id,
        record.name,
        record.owner_id,
        server_status(record).as_str()
    )
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_shows_status_and_target() {
        let record = McpServerRecord {
            id: 3,
            owner_id: 1,
            name: "docs".into(),
            url: Some("https://docs.example.com/mcp".into()),
            disabled: true,
            ..Default::default()
        };
        let line = describe(&record);
        assert!(line.contains("docs"));
        assert!(line.contains("disabled"));
        assert!(line.contains("https://docs.example.com/mcp"));

        let local = McpServerRecord {
            name: "fs".into(),
            command: "mcp-fs".into(),
            ..Default::default()
        };
        assert!(describe(&local).contains("stdio: mcp-fs"));
    }
}
