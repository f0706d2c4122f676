//! Boot-time registration of stored servers.

use std::time::Duration;

use {
    toolhub_mcp::{Error, ServerLifecycle, ServerRecordStore},
    tracing::{info, warn},
};

/// Counts from [`register_stored_servers`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StartupReport {
    pub registered: usize,
    pub needs_reauth: usize,
    pub skipped: usize,
    pub failed: usize,
    pub timed_out: usize,
}

/// Register every enabled stored server, refreshing tokens first.
///
/// Token refresh network calls for each server are bounded by `per_server`.
/// The deadline never interrupts persisting a refresh result. Timeouts and
/// failures are logged and skipped; one slow authorization server never
/// delays the rest.
pub async fn register_stored_servers(
    store: &dyn ServerRecordStore,
    lifecycle: &ServerLifecycle,
    per_server: Duration,
) -> StartupReport {
    let mut report = StartupReport::default();
    let records = match store.list_all().await {
        Ok(records) => records,
        Err(e) => {
            warn!(error = %e, "could not list stored MCP servers");
            return report;
        },
    };

    for record in records {
        if record.disabled {
            report.skipped += 1;
            continue;
        }
        let name = record.name.clone();
        match lifecycle.register_within(record, per_server).await {
            Ok(needs_reauth) => {
                report.registered += 1;
                if needs_reauth {
                    report.needs_reauth += 1;
                }
            },
            Err(Error::RefreshTimedOut { .. }) => {
                warn!(server = %name, timeout = ?per_server, "startup token refresh timed out");
                report.timed_out += 1;
            },
            Err(e) => {
                warn!(server = %name, error = %e, "failed to register MCP server at startup");
                report.failed += 1;
            },
        }
    }

    info!(
        registered = report.registered,
        needs_reauth = report.needs_reauth,
        skipped = report.skipped,
        failed = report.failed,
        timed_out = report.timed_out,
        "startup MCP registration complete"
    );
    report
}
