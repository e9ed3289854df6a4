use colored::Colorize;

use idle_sync::protocol::state::GameState;
use idle_sync::{ConnectionEvent, ConnectionStatus};

pub fn format_status(status: &ConnectionStatus) -> String {
    match status {
        ConnectionStatus::Connected => "connected".green().to_string(),
        ConnectionStatus::Connecting => "connecting".yellow().to_string(),
        ConnectionStatus::Disconnected => "disconnected".yellow().to_string(),
        ConnectionStatus::Unrecoverable { reason } => {
            format!("{} ({reason})", "unrecoverable".red())
        }
    }
}

pub fn format_event(event: &ConnectionEvent) -> String {
    match event {
        ConnectionEvent::Connected => "Connected".green().to_string(),
        ConnectionEvent::Disconnected { reason, code } => match code {
            Some(code) => format!("{} [{code}] {reason}", "Disconnected".yellow()),
            None => format!("{} {reason}", "Disconnected".yellow()),
        },
        ConnectionEvent::Reconnecting { attempt, delay_ms } => format!(
            "{} attempt {attempt} in {delay_ms}ms",
            "Reconnecting".yellow()
        ),
        ConnectionEvent::Reconnected => "Reconnected".green().to_string(),
        ConnectionEvent::Unrecoverable {
            reason,
            consecutive_failures,
        } => format!(
            "{} after {consecutive_failures} failures: {reason}",
            "Unrecoverable".red()
        ),
    }
}

pub fn print_pretty_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(err) => {
            eprintln!("{} {}", "Failed to format JSON output:".yellow(), err);
            println!("{value}");
        }
    }
}

pub fn print_state_summary(state: &GameState) {
    println!("\n{}", "Resources:".bright_blue());
    if state.resources.is_empty() {
        println!("  {}", "none".dimmed());
    }
    for (key, amount) in &state.resources {
        println!("  {:<20} {amount:.2}", key.cyan());
    }

    println!("\n{}", "Units:".bright_blue());
    if state.units.is_empty() {
        println!("  {}", "none".dimmed());
    }
    for unit in &state.units {
        println!("  {:<20} x{}", unit.key.cyan(), unit.count);
    }

    let purchased = state.purchasables.iter().filter(|p| p.purchased).count();
    println!(
        "\nPurchased: {purchased}/{} | Mobile units: {} | Active effects: {} | Achievements: {}",
        state.purchasables.len(),
        state.mobile_units.len(),
        state.effects.len(),
        state.achievements.len()
    );
    println!(
        "Play time: {}s | Clicks: {}",
        state.play_time_secs, state.click_count
    );
}
