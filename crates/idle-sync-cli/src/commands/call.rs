use std::process::ExitCode;

use colored::Colorize;
use tracing::debug;

use idle_sync::{SyncClient, SyncConfig, SyncError, SyncResult};

use crate::app::print_pretty_json;

/// Connect, issue one correlated call, print the reply.
pub async fn cmd_call(mut config: SyncConfig, kind: &str, params: &str) -> SyncResult<ExitCode> {
    let params: serde_json::Value = serde_json::from_str(params)?;
    if !params.is_object() {
        return Err(SyncError::ConfigError {
            reason: "--params must be a JSON object".into(),
        });
    }

    // One-shot: nothing periodic should reach the server.
    config.polling.enabled = false;
    config.save.enabled = false;

    let client = SyncClient::connect(config).await?;
    debug!(kind, %params, "issuing call");
    let reply = client.call(kind, params).await;
    client.disconnect().await;

    let reply = reply?;
    println!("{} {}", "Reply to".green(), kind.cyan());
    print_pretty_json(&reply);
    Ok(ExitCode::SUCCESS)
}
