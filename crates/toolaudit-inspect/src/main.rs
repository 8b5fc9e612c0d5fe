//! Operator CLI for the tool-execution journal.
//!
//! Opens the journal database named in the config, runs one inspection or
//! maintenance command, and prints the result to stdout as JSON lines.

mod config;

use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use toolaudit_db::{MigrationError, PoolError, SqliteAdapter};
use toolaudit_journal::{EventStore, ExecutionEvent, JournalError};
use tracing_subscriber::EnvFilter;

use crate::config::ConfigError;

#[derive(Debug, Parser)]
#[command(
    name = "toolaudit-inspect",
    about = "Inspect and maintain the tool-execution journal"
)]
struct Args {
    /// Path to the TOML config file. Falls back to `TOOLAUDIT_CONFIG_PATH`,
    /// then `toolaudit.toml`.
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the newest events across all requests, oldest first.
    Recent {
        /// Number of events to print.
        #[arg(default_value_t = 20)]
        limit: i64,
    },
    /// Print every event recorded for one request.
    Request { request_id: String },
    /// Print every event sharing a correlation id.
    Correlation { correlation_id: String },
    /// Replay the table and check the hash chain.
    Verify,
    /// Delete events older than `journal.retention_ms`.
    Prune,
    /// Print the number of stored events.
    Count,
}

#[derive(Debug, Error)]
enum InspectError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),

    #[error("failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),
}

fn resolve_config_path(cli: Option<String>) -> (Option<String>, &'static str) {
    if let Some(path) = cli.filter(|value| !value.trim().is_empty()) {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("TOOLAUDIT_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "inspection failed");
            eprintln!("toolaudit-inspect: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), InspectError> {
    let (resolved_config_path, config_source) = resolve_config_path(args.config);
    let selected_config_path = resolved_config_path.as_deref().or(Some("toolaudit.toml"));

    let config = config::load_config(selected_config_path)?;

    // Logs go to stderr so stdout carries only command output.
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("warn"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    }

    tracing::debug!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved configuration path"
    );

    let pool = toolaudit_db::create_pool(
        &config.database.path,
        toolaudit_db::DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
            synchronous: config.database.synchronous,
        },
    )?;

    {
        let conn = pool.get().map_err(PoolError::from)?;
        let applied = toolaudit_db::run_migrations(&conn)?;
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
    }

    let store = EventStore::open(Arc::new(SqliteAdapter::new(pool)), config.journal).await?;

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match args.command {
        Command::Recent { limit } => print_events(&mut out, &store.get_recent(limit).await)?,
        Command::Request { request_id } => {
            print_events(&mut out, &store.get_by_request_id(&request_id).await)?;
        }
        Command::Correlation { correlation_id } => {
            print_events(&mut out, &store.get_by_correlation_id(&correlation_id).await)?;
        }
        Command::Verify => {
            let report = store.verify_chain().await?;
            print_line(&mut out, &report)?;
        }
        Command::Prune => {
            if store.config().retention_ms.is_none() {
                tracing::warn!("journal.retention_ms is not set, nothing to prune");
            }
            let removed = store.sweep_now().await?;
            print_line(&mut out, &json!({ "removed": removed }))?;
        }
        Command::Count => print_line(&mut out, &json!({ "count": store.size() }))?,
    }

    out.flush()?;
    Ok(())
}

fn print_events(out: &mut impl Write, events: &[ExecutionEvent]) -> Result<(), InspectError> {
    for event in events {
        print_line(out, event)?;
    }
    Ok(())
}

fn print_line(out: &mut impl Write, value: &impl Serialize) -> Result<(), InspectError> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
