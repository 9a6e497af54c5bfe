//! Rollcall - command-line attendance tool.
//!
//! Works against a local JSON data file holding a school's classes,
//! students and attendance history. Reads go through the same live roster
//! and aggregation pipeline a dashboard uses; writes are saved back to the
//! data file.

mod commands;

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use rollcall_core::{Config, MemoryStore};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::Command;

/// Log file name prefix inside the configured log directory
const LOG_FILE_NAME: &str = "rollcall.log";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr; when a log directory is configured they are also
/// written to a daily rolling file. The returned guard must be kept alive
/// for the file writer to flush.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let (config, config_error) = match Config::load() {
        Ok(c) => (c, None),
        Err(e) => (Config::default(), Some(e)),
    };
    let _log_guard = init_tracing(config.log_dir.as_deref());
    if let Some(e) = config_error {
        warn!(error = %e, "Failed to load config, using defaults");
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = Command::parse(&args)?;
    if matches!(command, Command::Help) {
        println!("{}", commands::USAGE);
        return Ok(());
    }

    let school_id = config.school_id.clone().ok_or_else(|| {
        anyhow!("No school configured. Set ROLLCALL_SCHOOL_ID or school_id in config.json")
    })?;
    let data_file = config.data_file()?;
    let store = Arc::new(MemoryStore::load_json(&data_file)?);
    info!(school_id = %school_id, data_file = %data_file.display(), "Rollcall starting");

    let wrote = commands::run(command, Arc::clone(&store), &school_id, &config).await?;
    if wrote {
        store.save_json(&data_file)?;
        info!(data_file = %data_file.display(), "Data file saved");
    }
    Ok(())
}
