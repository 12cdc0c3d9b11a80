//! pipe-worker: reads requests from stdin, writes responses to stdout
//!
//! Protocol:
//! - Readiness: `0|ready|` once at startup
//! - Request: `<id>|<command>|<args>...`
//! - Response: `<id>|response|<fields>...` or `<id>|error|<message>`
//!
//! Logs go to stderr; stdout carries only protocol lines.

use pipe_worker::commands::{BuiltinExecutor, CommandConfig};
use pipe_worker::config::Config;
use pipe_worker::runtime::{Worker, WorkerOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// How long runtime shutdown waits for blocking work such as a pending
/// stdin read.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(100);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(
        max_concurrency = ?config.max_concurrency,
        startup_delay_ms = config.startup_delay_ms,
        shutdown = ?config.shutdown,
        ping_delay_ms = config.ping_delay_ms,
        "Starting pipe-worker"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run(config));

    // In-flight work is not awaited past this point.
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    result
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let executor = Arc::new(BuiltinExecutor::new(CommandConfig::from(&config)));
    let worker = Worker::new(WorkerOptions::from(&config), executor);

    let shutdown = CancellationToken::new();
    let interrupt = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received");
                interrupt.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to listen for interrupt"),
        }
    });

    let summary = worker
        .run(tokio::io::stdin(), tokio::io::stdout(), shutdown)
        .await?;

    info!(
        accepted = summary.accepted,
        rejected = summary.rejected,
        "Shutting down"
    );
    Ok(())
}
