//! Task bodies.
//!
//! The runtime only knows the [`TaskExecutor`] trait: given a request, produce
//! payload fields or a [`TaskError`]. [`BuiltinExecutor`] is the executor the
//! binary ships with:
//!
//! ```text
//! test|<value>|<delay_secs>   wait, then answer <value>
//! random|<length>             answer <length> chars from [A-Z0-9]
//! ping|<args>...              wait the ping delay, then answer pong|<args>...
//! {"command":...,"args":[...]}  JSON form of any of the above
//! ```

pub mod handler;
pub mod parser;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::Config;
use crate::protocol::Request;

pub use parser::Command;

/// Future returned by [`TaskExecutor::execute`].
pub type TaskFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<String>, TaskError>> + Send + 'a>>;

/// Runs the command logic for one request.
///
/// Implementations may wait as long as they like; each request runs in its
/// own task. They must not block the thread.
pub trait TaskExecutor: Send + Sync + 'static {
    fn execute<'a>(&'a self, request: &'a Request) -> TaskFuture<'a>;
}

/// Failure of a single task, reported to the peer as an error frame.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("missing command")]
    MissingCommand,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("invalid argument {name}: {value}")]
    InvalidArgument { name: &'static str, value: String },

    #[error("invalid json payload: {0}")]
    InvalidJson(String),

    /// The executor panicked. Only the owning task is affected.
    #[error("task panicked")]
    Panicked,
}

/// Limits and timings for the built-in commands.
#[derive(Debug, Clone)]
pub struct CommandConfig {
    /// How long `ping` waits before answering.
    pub ping_delay: Duration,
    /// Longest string `random` will generate.
    pub max_random_length: usize,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            ping_delay: Duration::from_secs(2),
            max_random_length: 4096,
        }
    }
}

impl From<&Config> for CommandConfig {
    fn from(config: &Config) -> Self {
        Self {
            ping_delay: Duration::from_millis(config.ping_delay_ms),
            max_random_length: config.max_random_length,
        }
    }
}

/// Executor for the built-in command set.
#[derive(Debug, Clone, Default)]
pub struct BuiltinExecutor {
    config: CommandConfig,
}

impl BuiltinExecutor {
    pub fn new(config: CommandConfig) -> Self {
        Self { config }
    }
}

impl TaskExecutor for BuiltinExecutor {
    fn execute<'a>(&'a self, request: &'a Request) -> TaskFuture<'a> {
        Box::pin(async move {
            let command = parser::parse(&request.fields, self.config.max_random_length)?;
            debug!(id = %request.id, ?command, "Executing command");
            Ok(handler::execute(command, self.config.ping_delay).await)
        })
    }
}
