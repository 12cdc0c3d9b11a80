//! pipe-worker: a line-protocol task worker
//!
//! Requests arrive as `|`-delimited lines on one input stream. Each request
//! runs as its own concurrent task and its response is written back, tagged
//! with the request id, as soon as it completes, in whatever order tasks
//! finish.
//!
//! Features:
//! - Byte-granular line framing with a maximum line length
//! - One task per request, optional concurrency limit
//! - Single-writer output, one flushed line per response
//! - Pluggable task bodies via [`commands::TaskExecutor`]
//! - A matching [`client::WorkerClient`] for driving a worker

pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod protocol;
pub mod runtime;

pub use client::{ClientError, WorkerClient};
pub use commands::{BuiltinExecutor, TaskError, TaskExecutor};
pub use config::{Config, ShutdownPolicy};
pub use error::{Result, WorkerError};
pub use runtime::{RunSummary, Worker, WorkerOptions};
