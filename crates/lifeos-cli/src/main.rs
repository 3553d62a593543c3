//! LifeOS command line client.
//!
//! Signs in against the LifeOS backend and keeps exactly one remote capture
//! session alive while signed in.

mod app;
mod cli;

use std::io;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use app::App;
use cli::{Cli, Commands};
use lifeos_core::Config;

/// Log file prefix inside `<data dir>/logs`
const LOG_FILE_PREFIX: &str = "lifeos.log";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr and to a daily rolling file. The returned guard flushes
/// the file writer and must live until exit.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match Config::default().data_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir.join("logs"), LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let log_guard = init_tracing();
    info!("LifeOS client starting");

    let mut app = App::new(cli.api_url)?;

    let result = match cli.command {
        Commands::Login { username } => app.login(username).await,
        Commands::Register { username } => app.register(&username).await,
        Commands::Logout => app.logout().await,
        Commands::Whoami => app.whoami().await,
        Commands::Status { json } => app.status(json).await,
        Commands::Run => app.run().await,
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        drop(log_guard);
        std::process::exit(1);
    }

    Ok(())
}
