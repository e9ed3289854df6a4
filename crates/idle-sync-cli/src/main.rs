//! # idle-sync-cli
//!
//! Headless client for the idle-sync protocol. Connects to a game server,
//! keeps the session alive, and prints what the server pushes.

use std::path::Path;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

mod app;
mod commands;

use commands::{cmd_call, cmd_state, cmd_watch};

use idle_sync::SyncConfig;

/// Headless command-line client for the idle-sync protocol.
#[derive(Parser)]
#[command(name = "idle-sync-cli", version, about)]
struct Cli {
    /// Path to idle-sync.toml config file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Server WebSocket URL override
    #[arg(long, global = true)]
    url: Option<String>,

    /// Session token override
    #[arg(long, global = true)]
    token: Option<String>,

    /// Enable verbose logging (set RUST_LOG for fine-grained control)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stay connected and print connection events and state changes
    Watch {
        /// Also fire periodic save frames from the local store
        #[arg(long)]
        save: bool,
    },

    /// Issue one correlated call and print the reply
    Call {
        /// Request type, e.g. `getState`
        kind: String,

        /// Request parameters as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,
    },

    /// Request a full state snapshot and print a summary
    State,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "idle_sync=debug,idle_sync_cli=debug"
    } else {
        "idle_sync=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let mut config = match SyncConfig::discover(cli.config.as_deref().map(Path::new)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{} {}", "Config error:".red(), e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(url) = cli.url {
        config.server_url = url;
    }
    if let Some(token) = cli.token {
        config.token = Some(token);
    }

    let result = match cli.command {
        Command::Watch { save } => cmd_watch(config, save).await,
        Command::Call { kind, params } => cmd_call(config, &kind, &params).await,
        Command::State => cmd_state(config).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", "Error:".red(), e);
            if e.is_fatal() {
                eprintln!("Obtain a fresh token and try again.");
            }
            ExitCode::FAILURE
        }
    }
}
