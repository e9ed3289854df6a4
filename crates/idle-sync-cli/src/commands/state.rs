use std::process::ExitCode;

use colored::Colorize;

use idle_sync::{SyncClient, SyncConfig, SyncResult};

use crate::app::print_state_summary;

/// Connect, request a full snapshot, print a summary.
pub async fn cmd_state(mut config: SyncConfig) -> SyncResult<ExitCode> {
    config.polling.enabled = false;
    config.save.enabled = false;

    println!("Connecting to {}...", config.server_url.cyan());
    let client = SyncClient::connect(config).await?;
    let state = client.request_full_state().await;
    client.disconnect().await;

    print_state_summary(&state?);
    Ok(ExitCode::SUCCESS)
}
