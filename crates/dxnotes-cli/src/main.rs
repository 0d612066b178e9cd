//! dxnotes - a command shell for diagnosis code lookup and consultation notes.
//!
//! Drives the session core the way the browser front end does: restore the
//! session on start, log in when needed, and let the navigation guard decide
//! which view is shown.

mod shell;

use std::io;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dxnotes_core::{Config, SessionContext};
use shell::Shell;

#[derive(Parser, Debug)]
#[command(name = "dxnotes", about = "Diagnosis code and consultation notes shell")]
struct Cli {
    /// API base URL (overrides the config file)
    #[arg(long)]
    base_url: Option<String>,

    /// Log in as this user if no session can be restored
    #[arg(long, env = "DXNOTES_USERNAME")]
    username: Option<String>,
}

/// Initialize the tracing subscriber for logging.
/// The returned guard must stay alive for the file writer to flush.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match config.log_dir {
        Some(ref dir) => {
            let appender = tracing_appender::rolling::daily(dir, "dxnotes.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
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
    let mut config = Config::load()?;
    if let Some(url) = cli.base_url {
        config.base_url = url;
    }

    let _log_guard = init_tracing(&config);
    info!(base_url = %config.base_url, "dxnotes starting");

    let ctx = SessionContext::new(&config)?;
    let mut shell = Shell::new(ctx, config);
    shell.start(cli.username.as_deref()).await;
    let result = shell.run().await;

    shell.shutdown();
    info!("dxnotes shutting down");
    result
}
