use std::process::ExitCode;

use colored::Colorize;
use futures_util::StreamExt;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use idle_sync::protocol::state::Resources;
use idle_sync::{ConnectionEvent, StateChange, SyncClient, SyncConfig, SyncResult, notices};

use crate::app::{format_event, format_status, print_state_summary};

/// Stay connected and print what happens until Ctrl+C.
///
/// Exits non-zero once the session becomes unrecoverable.
pub async fn cmd_watch(mut config: SyncConfig, save: bool) -> SyncResult<ExitCode> {
    config.save.enabled = save;

    println!("Connecting to {}...", config.server_url.cyan());
    let client = SyncClient::connect(config).await?;
    println!("Status: {}", format_status(&client.current_status()));

    let mut events = client.event_receiver();
    let mut changes = notices::changes(client.store());

    // Cold start. Pushes and polls fill in anything this misses.
    match client.request_full_state().await {
        Ok(state) => print_state_summary(&state),
        Err(e) => eprintln!("{} {}", "Initial state unavailable:".yellow(), e),
    }

    println!("\n{}", "Watching... (Ctrl+C to stop)".green());

    let code = loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{}", format_event(&event));
                    if matches!(event, ConnectionEvent::Unrecoverable { .. }) {
                        break ExitCode::FAILURE;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    eprintln!("{} {missed} connection events", "Missed".yellow());
                }
                Err(RecvError::Closed) => break ExitCode::FAILURE,
            },
            change = changes.next() => {
                let Some(change) = change else { break ExitCode::FAILURE };
                print_change(&change, &client);
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\n{}", "Stopped.".yellow());
                break ExitCode::SUCCESS;
            }
        }
    };

    client.disconnect().await;
    Ok(code)
}

fn print_change(change: &StateChange, client: &SyncClient) {
    debug!(?change, "state change");
    match change {
        StateChange::ResourcesChanged => print_resources(&client.store().resources()),
        StateChange::CollectionsReplaced => println!(
            "{} {} units, {} mobile units",
            "Collections".bright_blue(),
            client.store().units().len(),
            client.store().mobile_units().len()
        ),
        StateChange::AchievementUnlocked { key } => {
            println!("{} {}", "Achievement unlocked:".green(), key.cyan());
        }
        StateChange::EventPresented { key } => {
            println!("{} {}", "Event:".magenta(), key.cyan());
        }
        StateChange::EventCleared { key } => {
            println!("{} {}", "Event cleared:".dimmed(), key);
        }
        StateChange::EffectsReplaced { active } => {
            println!("{} {active} active", "Effects".bright_blue());
        }
        StateChange::EffectsExpired { removed } => {
            println!("{} {removed} expired", "Effects".dimmed());
        }
        StateChange::FullStateApplied => println!("{}", "Full state applied".bright_blue()),
    }
}

fn print_resources(resources: &Resources) {
    let totals: Vec<String> = resources
        .iter()
        .map(|(key, amount)| format!("{key}={amount:.1}"))
        .collect();
    println!("{} {}", "Resources".bright_blue(), totals.join(" | "));
}
