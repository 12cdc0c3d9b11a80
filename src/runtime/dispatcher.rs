//! Task dispatch.
//!
//! Every decoded request becomes its own tokio task. Dispatching never waits:
//! with a concurrency limit configured the permit is acquired inside the new
//! task, so excess requests queue on the semaphore instead of stalling the
//! ingestion loop.

use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace, warn};

use super::writer::ResponseWriter;
use crate::commands::{TaskError, TaskExecutor};
use crate::protocol::{Frame, Request};

/// Spawns and tracks one task per request.
pub struct Dispatcher {
    executor: Arc<dyn TaskExecutor>,
    responses: ResponseWriter,
    /// Running-task limit; `None` means unbounded.
    limit: Option<Arc<Semaphore>>,
    tracker: TaskTracker,
    /// Fired to abandon in-flight tasks.
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        executor: Arc<dyn TaskExecutor>,
        responses: ResponseWriter,
        max_concurrency: Option<usize>,
    ) -> Self {
        Dispatcher {
            executor,
            responses,
            limit: max_concurrency.map(|n| Arc::new(Semaphore::new(n))),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Start a task for `request` and return immediately.
    pub fn dispatch(&self, request: Request) {
        let executor = Arc::clone(&self.executor);
        let responses = self.responses.clone();
        let limit = self.limit.clone();
        let cancel = self.cancel.clone();
        let id = request.id.clone();

        trace!(id = %id, in_flight = self.tracker.len(), "Task pending");

        self.tracker.spawn(async move {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!(id = %id, "Task abandoned");
                }

                () = run_task(executor, request, responses, limit) => {}
            }
        });
    }

    /// Number of tasks that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every dispatched task to finish.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Wait up to `timeout` for in-flight tasks, then abandon the rest.
    ///
    /// Returns `true` if every task finished in time.
    pub async fn drain_for(&self, timeout: Duration) -> bool {
        self.tracker.close();
        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok() {
            return true;
        }
        warn!(
            remaining = self.tracker.len(),
            "Drain timeout elapsed, abandoning tasks"
        );
        self.abandon().await;
        false
    }

    /// Cancel every in-flight task without writing responses for them.
    pub async fn abandon(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Body of one dispatched task: wait for a permit, execute, respond once.
async fn run_task(
    executor: Arc<dyn TaskExecutor>,
    request: Request,
    responses: ResponseWriter,
    limit: Option<Arc<Semaphore>>,
) {
    let _permit = match limit {
        Some(limit) => match limit.acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(_) => {
                warn!(id = %request.id, "Concurrency limiter closed, dropping task");
                return;
            }
        },
        None => None,
    };

    trace!(id = %request.id, command = ?request.command(), "Task running");

    // Covers executors that panic while building their future too.
    let outcome = AssertUnwindSafe(async { executor.execute(&request).await })
        .catch_unwind()
        .await
        .unwrap_or(Err(TaskError::Panicked));

    let frame = match outcome {
        Ok(payload) => {
            debug!(id = %request.id, "Task completed");
            Frame::response(request.id, payload)
        }
        Err(e) => {
            warn!(id = %request.id, error = %e, "Task failed");
            Frame::error(request.id, e.to_string())
        }
    };

    responses.send(frame);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::TaskFuture;
    use crate::runtime::writer::spawn_writer;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::AsyncReadExt;

    /// Sleeps for the number of milliseconds in field 0 and echoes the id,
    /// recording the peak number of simultaneous executions.
    #[derive(Default)]
    struct Sleeper {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl TaskExecutor for Sleeper {
        fn execute<'a>(&'a self, request: &'a Request) -> TaskFuture<'a> {
            Box::pin(async move {
                let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);

                let millis: u64 = request.fields[0].parse().unwrap();
                tokio::time::sleep(Duration::from_millis(millis)).await;

                self.running.fetch_sub(1, Ordering::SeqCst);
                if request.fields.get(1).map(String::as_str) == Some("panic") {
                    panic!("executor blew up");
                }
                Ok(vec![request.id.clone()])
            })
        }
    }

    /// Panics before returning a future.
    struct EagerPanic;

    impl TaskExecutor for EagerPanic {
        fn execute<'a>(&'a self, _request: &'a Request) -> TaskFuture<'a> {
            panic!("refused to build task");
        }
    }

    async fn read_lines(mut out: tokio::io::DuplexStream) -> Vec<String> {
        let mut text = String::new();
        out.read_to_string(&mut text).await.unwrap();
        text.lines().map(str::to_string).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_does_not_wait() {
        let (client, server) = tokio::io::duplex(4096);
        let (writer, handle) = spawn_writer(client);
        let dispatcher = Dispatcher::new(Arc::new(Sleeper::default()), writer, None);

        dispatcher.dispatch(Request::new("slow", ["5000"]));
        dispatcher.dispatch(Request::new("fast", ["10"]));
        assert_eq!(dispatcher.in_flight(), 2);

        dispatcher.drain().await;
        drop(dispatcher);
        handle.await.unwrap().unwrap();

        let lines = read_lines(server).await;
        assert_eq!(lines, vec!["fast|response|fast", "slow|response|slow"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_limit() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (writer, handle) = spawn_writer(client);
        let sleeper = Arc::new(Sleeper::default());
        let dispatcher = Dispatcher::new(sleeper.clone(), writer, Some(3));

        for i in 0..10 {
            dispatcher.dispatch(Request::new(format!("r{i}"), ["100"]));
        }
        // All ten are accepted immediately even though only three may run.
        assert_eq!(dispatcher.in_flight(), 10);

        dispatcher.drain().await;
        drop(dispatcher);
        handle.await.unwrap().unwrap();

        assert_eq!(sleeper.peak.load(Ordering::SeqCst), 3);
        assert_eq!(read_lines(server).await.len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_becomes_error_frame() {
        let (client, server) = tokio::io::duplex(4096);
        let (writer, handle) = spawn_writer(client);
        let dispatcher = Dispatcher::new(Arc::new(Sleeper::default()), writer, None);

        dispatcher.dispatch(Request::new("boom", ["0", "panic"]));
        dispatcher.dispatch(Request::new("fine", ["1"]));

        dispatcher.drain().await;
        drop(dispatcher);
        handle.await.unwrap().unwrap();

        let mut lines = read_lines(server).await;
        lines.sort();
        assert_eq!(lines, vec!["boom|error|task panicked", "fine|response|fine"]);
    }

    #[tokio::test]
    async fn test_panic_while_building_task_becomes_error_frame() {
        let (client, server) = tokio::io::duplex(4096);
        let (writer, handle) = spawn_writer(client);
        let dispatcher = Dispatcher::new(Arc::new(EagerPanic), writer, None);

        dispatcher.dispatch(Request::new("p1", ["x"]));

        dispatcher.drain().await;
        drop(dispatcher);
        handle.await.unwrap().unwrap();

        assert_eq!(read_lines(server).await, vec!["p1|error|task panicked"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_writes_nothing() {
        let (client, server) = tokio::io::duplex(4096);
        let (writer, handle) = spawn_writer(client);
        let dispatcher = Dispatcher::new(Arc::new(Sleeper::default()), writer, None);

        dispatcher.dispatch(Request::new("slow", ["60000"]));
        tokio::task::yield_now().await;

        dispatcher.abandon().await;
        assert_eq!(dispatcher.in_flight(), 0);
        drop(dispatcher);
        handle.await.unwrap().unwrap();

        assert!(read_lines(server).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_for_times_out() {
        let (client, server) = tokio::io::duplex(4096);
        let (writer, handle) = spawn_writer(client);
        let dispatcher = Dispatcher::new(Arc::new(Sleeper::default()), writer, None);

        dispatcher.dispatch(Request::new("quick", ["100"]));
        dispatcher.dispatch(Request::new("stuck", ["60000"]));

        assert!(!dispatcher.drain_for(Duration::from_secs(1)).await);
        drop(dispatcher);
        handle.await.unwrap().unwrap();

        assert_eq!(read_lines(server).await, vec!["quick|response|quick"]);
    }
}
