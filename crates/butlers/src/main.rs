// SPDX-FileCopyrightText: 2026 Butlers Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Butlers - operator CLI for the outbound delivery core.
//!
//! Derives idempotency keys and inspects the delivery ledger: requests,
//! attempts, receipts, and the dead-letter queue.

mod dead_letters;
mod inspect;
mod key;

use std::io::IsTerminal;

use butlers_config::model::ButlersConfig;
use butlers_core::{ButlersError, StorageAdapter};
use butlers_storage::SqliteStorage;
use clap::{Parser, Subcommand};

/// Butlers - exactly-once outbound delivery, operator tools.
#[derive(Parser, Debug)]
#[command(name = "butlers", version, about, long_about = None)]
struct Cli {
    /// Disable colored output.
    #[arg(long, global = true)]
    plain: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Derive the idempotency key for a submission.
    Key(key::KeyArgs),
    /// Show a delivery request with its attempts and receipts.
    Inspect {
        delivery_id: String,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// List dead-lettered deliveries (replayable only, unless --all).
    DeadLetters {
        /// Include discarded and already-replayed entries.
        #[arg(long)]
        all: bool,
        #[arg(long)]
        json: bool,
    },
    /// Permanently exclude a dead letter from replay.
    Discard {
        delivery_id: String,
        #[arg(long)]
        reason: String,
    },
    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match butlers_config::load_and_validate() {
        Ok(config) => config,
        Err(errors) => {
            butlers_config::render_errors(&errors);
            std::process::exit(1);
        }
    };
    init_tracing(&config.log.level);

    let use_color = !cli.plain && std::io::stdout().is_terminal();
    if let Err(e) = run(cli.command, &config, use_color).await {
        eprintln!("butlers: {e}");
        std::process::exit(1);
    }
}

async fn run(command: Commands, config: &ButlersConfig, use_color: bool) -> Result<(), ButlersError> {
    match command {
        Commands::Key(args) => key::run_key(&args),
        Commands::Config => {
            let rendered = toml::to_string_pretty(config)
                .map_err(|e| ButlersError::Internal(format!("failed to render config: {e}")))?;
            print!("{rendered}");
            Ok(())
        }
        Commands::Inspect { delivery_id, json } => {
            let storage = open_storage(config).await?;
            inspect::run_inspect(&storage, &delivery_id, json, use_color).await
        }
        Commands::DeadLetters { all, json } => {
            let storage = open_storage(config).await?;
            dead_letters::run_list(&storage, all, json, use_color).await
        }
        Commands::Discard {
            delivery_id,
            reason,
        } => {
            let storage = open_storage(config).await?;
            dead_letters::run_discard(&storage, &delivery_id, &reason).await
        }
    }
}

async fn open_storage(config: &ButlersConfig) -> Result<SqliteStorage, ButlersError> {
    let storage = SqliteStorage::new(config.storage.clone());
    storage.initialize().await?;
    Ok(storage)
}

/// Initializes the tracing subscriber with the given log level.
///
/// Logs go to stderr so JSON output on stdout stays parseable.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("butlers={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}
