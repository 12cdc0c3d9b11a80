//! Client for driving a worker.
//!
//! [`WorkerClient`] is the other end of the protocol: it writes request lines
//! with fresh ids, reads the worker's output on a background task and hands
//! each frame to the caller waiting on that id.
//!
//! ```rust,ignore
//! let client = WorkerClient::spawn("pipe-worker", ["--ping-delay-ms", "0"], 2)?;
//! let payload = client.run_task(&["random", "8"]).await?;
//! ```

use futures_util::StreamExt;
use rand::Rng;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use crate::protocol::{Frame, LineAssembler, Request, Tag, DELIMITER};

/// Default number of requests a client keeps in flight.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 2;

/// Client-side failures.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// The worker's output ended before the request was answered.
    #[error("worker disconnected")]
    Disconnected,

    /// The worker answered with an error frame.
    #[error("task failed: {0}")]
    Task(String),

    /// A request field would break the line framing.
    #[error("invalid request field: {0:?}")]
    InvalidField(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Starting,
    Ready,
    Closed,
}

/// Callers waiting for a frame, keyed by request id.
#[derive(Default)]
struct Pending {
    waiters: HashMap<String, oneshot::Sender<Frame>>,
    closed: bool,
}

type SharedPending = Arc<Mutex<Pending>>;

/// A connection to one worker.
pub struct WorkerClient {
    writer: tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: SharedPending,
    state: watch::Receiver<State>,
    permits: Semaphore,
    reader: JoinHandle<()>,
    /// Spawned worker process, killed when the client is dropped.
    child: Option<Child>,
}

impl WorkerClient {
    /// Connect to a worker through its output (`reader`) and input (`writer`).
    pub fn connect<R, W>(reader: R, writer: W, max_in_flight: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let pending = SharedPending::default();
        let (state_tx, state_rx) = watch::channel(State::Starting);
        let reader = tokio::spawn(run_reader(reader, Arc::clone(&pending), state_tx));

        WorkerClient {
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            pending,
            state: state_rx,
            permits: Semaphore::new(max_in_flight.max(1)),
            reader,
            child: None,
        }
    }

    /// Launch `program` as a worker process and connect to its stdio.
    ///
    /// The worker's stderr (its log output) is inherited.
    pub fn spawn<I, S>(program: impl AsRef<OsStr>, args: I, max_in_flight: usize) -> Result<Self, ClientError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("failed to capture worker stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("failed to capture worker stdout"))?;

        info!(pid = ?child.id(), "Spawned worker");
        let mut client = Self::connect(stdout, stdin, max_in_flight);
        client.child = Some(child);
        Ok(client)
    }

    /// Wait for the worker's readiness line.
    pub async fn wait_ready(&self) -> Result<(), ClientError> {
        let mut state = self.state.clone();
        let current = *state
            .wait_for(|s| *s != State::Starting)
            .await
            .map_err(|_| ClientError::Disconnected)?;
        match current {
            State::Ready => Ok(()),
            _ => Err(ClientError::Disconnected),
        }
    }

    /// Run one request and return its payload fields.
    ///
    /// Waits for readiness and for a free in-flight slot first.
    pub async fn run_task<S: AsRef<str>>(&self, fields: &[S]) -> Result<Vec<String>, ClientError> {
        for field in fields {
            let field = field.as_ref();
            if field.contains([DELIMITER, '\n', '\r']) {
                return Err(ClientError::InvalidField(field.to_string()));
            }
        }

        self.wait_ready().await?;
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ClientError::Disconnected)?;

        let request = Request::new(new_request_id(), fields.iter().map(|f| f.as_ref().to_string()));
        let rx = self.register(&request.id)?;
        let _waiter = WaiterGuard {
            pending: &self.pending,
            id: &request.id,
        };

        let mut line = request.encode();
        line.push('\n');
        self.write_line(line.as_bytes()).await?;
        debug!(id = %request.id, "Started task");

        let frame = rx.await.map_err(|_| ClientError::Disconnected)?;
        debug!(id = %request.id, tag = %frame.tag, "Task finished");
        match frame.tag {
            Tag::Response => Ok(frame.payload),
            _ => Err(ClientError::Task(frame.payload.join(&*DELIMITER.encode_utf8(&mut [0; 4])))),
        }
    }

    /// Close the worker's input and wait for its output to end.
    ///
    /// The worker answers everything already sent before exiting.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.writer.get_mut().shutdown().await?;
        (&mut self.reader).await.map_err(std::io::Error::other)?;
        if let Some(mut child) = self.child.take() {
            let status = child.wait().await?;
            debug!(?status, "Worker exited");
        }
        Ok(())
    }

    fn register(&self, id: &str) -> Result<oneshot::Receiver<Frame>, ClientError> {
        let (tx, rx) = oneshot::channel();
        let mut pending = lock(&self.pending);
        if pending.closed {
            return Err(ClientError::Disconnected);
        }
        pending.waiters.insert(id.to_string(), tx);
        Ok(rx)
    }

    async fn write_line(&self, line: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(line).await?;
        writer.flush().await
    }
}

/// Removes a caller's waiter when `run_task` returns or is dropped.
struct WaiterGuard<'a> {
    pending: &'a SharedPending,
    id: &'a str,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).waiters.remove(self.id);
    }
}

impl Drop for WorkerClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Reads worker output and routes frames to their waiters.
async fn run_reader<R>(reader: R, pending: SharedPending, state: watch::Sender<State>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = FramedRead::new(reader, LineAssembler::new());

    while let Some(item) = lines.next().await {
        let line = match item {
            Ok(Ok(line)) => line,
            Ok(Err(e)) => {
                warn!(error = %e, "Skipping worker output line");
                continue;
            }
            Err(e) => {
                warn!(error = %e, "Worker output failed");
                break;
            }
        };

        let Some(frame) = Frame::parse(&line) else {
            debug!(line = %line, "Ignoring unrecognised worker output");
            continue;
        };

        match frame.tag {
            Tag::Ready => {
                info!("Worker ready");
                state.send_replace(State::Ready);
            }
            Tag::Response | Tag::Error => {
                let waiter = lock(&pending).waiters.remove(&frame.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(frame);
                    }
                    None => debug!(id = %frame.id, "No caller waiting for frame"),
                }
            }
        }
    }

    // Dropping the senders fails every outstanding call.
    let mut pending = lock(&pending);
    pending.closed = true;
    pending.waiters.clear();
    state.send_replace(State::Closed);
}

fn lock(pending: &SharedPending) -> std::sync::MutexGuard<'_, Pending> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 32 hex digits of randomness.
fn new_request_id() -> String {
    format!("{:032x}", rand::thread_rng().gen::<u128>())
}
