//! Worker runtime.
//!
//! Ties the pieces together over one input and one output stream:
//!
//! ```text
//! input ─▶ LineAssembler ─▶ Request::decode ─▶ Dispatcher ─┬▶ task ─┐
//!                                                          ├▶ task ─┼▶ ResponseWriter ─▶ output
//!                                                          └▶ task ─┘
//! ```
//!
//! - `dispatcher`: one tokio task per request, optional concurrency limit
//! - `writer`: single owner of the output stream
//!
//! Shutdown: end of input drains in-flight tasks so every accepted request is
//! answered. Cancellation, before or during that drain, stops ingestion and
//! then applies the configured [`ShutdownPolicy`].

mod dispatcher;
mod writer;

pub use dispatcher::Dispatcher;
pub use writer::{spawn_writer, ResponseWriter};

use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::commands::TaskExecutor;
use crate::config::{Config, ShutdownPolicy};
use crate::error::{Result, WorkerError};
use crate::protocol::{Frame, LineAssembler, Request};

/// Runtime options for [`Worker`].
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Running-task limit; `None` means unbounded.
    pub max_concurrency: Option<usize>,
    /// Delay before the readiness frame.
    pub startup_delay: Duration,
    /// Longest accepted request line.
    pub max_line_bytes: usize,
    /// In-flight task policy on cancellation.
    pub shutdown: ShutdownPolicy,
    /// Upper bound on a draining shutdown.
    pub drain_timeout: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        WorkerOptions::from(&Config::default())
    }
}

impl From<&Config> for WorkerOptions {
    fn from(config: &Config) -> Self {
        WorkerOptions {
            max_concurrency: config.max_concurrency,
            startup_delay: Duration::from_millis(config.startup_delay_ms),
            max_line_bytes: config.max_line_bytes,
            shutdown: config.shutdown,
            drain_timeout: Duration::from_millis(config.drain_timeout_ms),
        }
    }
}

/// Counters reported when a run ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Requests decoded and dispatched.
    pub accepted: u64,
    /// Lines discarded as malformed or over-long.
    pub rejected: u64,
    /// Whether the run ended through cancellation rather than end of input.
    pub interrupted: bool,
}

/// Reads requests, runs them concurrently and writes correlated responses.
pub struct Worker {
    options: WorkerOptions,
    executor: Arc<dyn TaskExecutor>,
}

impl Worker {
    pub fn new(options: WorkerOptions, executor: Arc<dyn TaskExecutor>) -> Self {
        Worker { options, executor }
    }

    /// Run until `input` ends, `input` fails or `shutdown` is cancelled.
    ///
    /// Writes the readiness frame once before reading any input.
    ///
    /// # Errors
    ///
    /// [`WorkerError::Stream`] if reading the input or writing the output
    /// failed. Tasks already accepted are still drained before returning.
    pub async fn run<R, W>(
        &self,
        input: R,
        output: W,
        shutdown: CancellationToken,
    ) -> Result<RunSummary>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (responses, writer) = spawn_writer(output);
        let mut summary = RunSummary::default();

        if !self.options.startup_delay.is_zero() {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("Interrupted during startup");
                    summary.interrupted = true;
                    drop(responses);
                    return finish_writer(writer, None).await.map(|()| summary);
                }
                () = tokio::time::sleep(self.options.startup_delay) => {}
            }
        }

        responses.send(Frame::ready());
        info!(
            max_concurrency = ?self.options.max_concurrency,
            max_line_bytes = self.options.max_line_bytes,
            "Worker ready"
        );

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.executor),
            responses,
            self.options.max_concurrency,
        );
        let mut lines = FramedRead::new(
            input,
            LineAssembler::with_max_line_bytes(self.options.max_line_bytes),
        );
        let mut input_error = None;

        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    info!(in_flight = dispatcher.in_flight(), "Shutdown requested, no longer accepting requests");
                    summary.interrupted = true;
                    break;
                }

                item = lines.next() => match item {
                    None => {
                        debug!("End of input");
                        break;
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "Input stream failed");
                        input_error = Some(e);
                        break;
                    }
                    Some(Ok(Err(e))) => {
                        warn!(error = %e, "Discarding input line");
                        summary.rejected += 1;
                    }
                    Some(Ok(Ok(line))) => match Request::decode(&line) {
                        Ok(request) => {
                            debug!(id = %request.id, command = ?request.command(), "Dispatching request");
                            dispatcher.dispatch(request);
                            summary.accepted += 1;
                        }
                        Err(e) => {
                            warn!(error = %e, "Discarding input line");
                            summary.rejected += 1;
                        }
                    },
                },
            }
        }

        if !summary.interrupted {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    info!(in_flight = dispatcher.in_flight(), "Shutdown requested while draining");
                    summary.interrupted = true;
                }

                () = dispatcher.drain() => {}
            }
        }

        if summary.interrupted {
            match self.options.shutdown {
                ShutdownPolicy::Abandon => {
                    if dispatcher.in_flight() > 0 {
                        info!(in_flight = dispatcher.in_flight(), "Abandoning in-flight tasks");
                    }
                    dispatcher.abandon().await;
                }
                ShutdownPolicy::Drain => {
                    info!(in_flight = dispatcher.in_flight(), "Draining in-flight tasks");
                    dispatcher.drain_for(self.options.drain_timeout).await;
                }
            }
        }

        // Dropping the dispatcher releases the last ResponseWriter.
        drop(dispatcher);
        finish_writer(writer, input_error).await?;

        info!(
            accepted = summary.accepted,
            rejected = summary.rejected,
            interrupted = summary.interrupted,
            "Worker stopped"
        );
        Ok(summary)
    }
}

/// Wait for the writer to flush everything, then report the first stream
/// failure seen on either side.
async fn finish_writer(
    writer: tokio::task::JoinHandle<std::io::Result<()>>,
    input_error: Option<WorkerError>,
) -> Result<()> {
    let output_result = match writer.await {
        Ok(result) => result,
        Err(e) => Err(std::io::Error::other(format!("writer task failed: {e}"))),
    };

    if let Some(e) = input_error {
        return Err(e);
    }
    output_result.map_err(WorkerError::Stream)
}
