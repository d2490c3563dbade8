//! The worker: handler registry, enqueue, and the run loop.
//!
//! Grounded on `internal/worker/worker.go`'s `Worker` type: a registry of
//! handlers keyed by queue name, a coalescing trigger channel, and a run
//! loop that dispatches one job per iteration and reschedules itself with a
//! delay that depends on what happened.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tokio::sync::{Notify, RwLock};
use tracing::{info, instrument, warn};

use archive_core::{JobQueueHandle, Runtime, RuntimeError};

use crate::model::Job;
use crate::queue;
use crate::JobQueueError;

/// A registered job handler. Runs with the job's payload and the active
/// runtime, returning an output message on success or an error describing
/// why the attempt failed.
pub type Handler =
    Arc<dyn Fn(Arc<Runtime>, Job) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send>> + Send + Sync>;

/// Wrap a plain async closure as a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Arc<Runtime>, Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
{
    Arc::new(move |rt, job| Box::pin(f(rt, job)))
}

const CONTENTION_RETRY_ATTEMPTS: u32 = 25;
const CONTENTION_RETRY_MAX_BACKOFF: StdDuration = StdDuration::from_millis(500);
const SUCCESS_DELAY: StdDuration = StdDuration::from_secs(0);
const IDLE_DELAY: StdDuration = StdDuration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Running,
    ShuttingDown,
}

/// Durable job queue and dispatcher. One `Worker` is shared (behind an
/// `Arc`) between whatever enqueues jobs and however many concurrent `run`
/// loops `Config::background_workers` asks for — `Notify` (unlike a single
/// `mpsc::Receiver`) supports any number of concurrent waiters, matching the
/// original's buffered `chan struct{}`, which any number of goroutines can
/// `select` on at once.
pub struct Worker {
    pool: SqlitePool,
    handlers: RwLock<HashMap<String, Handler>>,
    trigger: Notify,
    reserve_duration: ChronoDuration,
}

impl Worker {
    /// Build a worker over `pool`. Callers still need to `register` handlers
    /// and call `run` (typically via `Arc::new(worker).run(runtime)`).
    pub fn new(pool: SqlitePool) -> Arc<Worker> {
        Arc::new(Worker {
            pool,
            handlers: RwLock::new(HashMap::new()),
            trigger: Notify::new(),
            reserve_duration: queue::DEFAULT_RESERVE_DURATION,
        })
    }

    /// Register a handler for `queue_name`. Fails if one is already
    /// registered for that name.
    pub async fn register(&self, queue_name: impl Into<String>, handler: Handler) -> Result<(), JobQueueError> {
        let queue_name = queue_name.into();
        let mut handlers = self.handlers.write().await;
        if handlers.contains_key(&queue_name) {
            return Err(JobQueueError::WorkerExists(queue_name));
        }
        handlers.insert(queue_name, handler);
        Ok(())
    }

    /// Register several handlers at once, the way a binary wiring up its
    /// whole pipeline would. Fails on the first name already registered,
    /// leaving any handlers registered before it in place.
    pub async fn register_all(&self, handlers: impl IntoIterator<Item = (String, Handler)>) -> Result<(), JobQueueError> {
        for (queue_name, handler) in handlers {
            self.register(queue_name, handler).await?;
        }
        Ok(())
    }

    async fn is_registered(&self, queue_name: &str) -> bool {
        self.handlers.read().await.contains_key(queue_name)
    }

    /// Default-fill and insert a job through `conn` — the caller's open
    /// transaction or savepoint — then best-effort trigger the run loop.
    /// Fails if `queue_name` has no registered handler.
    pub async fn add(
        &self,
        conn: &mut SqliteConnection,
        now: DateTime<Utc>,
        queue_name: &str,
        payload: String,
        run_after: Option<DateTime<Utc>>,
        failure_delay: Option<ChronoDuration>,
        attempts_remaining: Option<i64>,
    ) -> Result<i64, RuntimeError> {
        if !self.is_registered(queue_name).await {
            return Err(RuntimeError::NotConfigured("queue name has no registered handler"));
        }

        let id = queue::insert(
            conn,
            now,
            queue_name,
            &payload,
            run_after.unwrap_or(now),
            failure_delay.unwrap_or(queue::DEFAULT_FAILURE_DELAY),
            attempts_remaining.unwrap_or(queue::DEFAULT_ATTEMPTS_REMAINING),
        )
        .await?;

        self.trigger();

        Ok(id)
    }

    /// Non-blocking wake-up of every `run` loop currently waiting on this
    /// worker. Lost entirely if no loop is waiting at the moment it's
    /// called — harmless, since each loop's own idle timer bounds how long
    /// a missed trigger can delay the next dispatch.
    pub fn trigger(&self) {
        self.trigger.notify_waiters();
    }

    async fn find_next_and_reserve_with_retry(&self, now: DateTime<Utc>) -> Result<Option<Job>, RuntimeError> {
        let queue_names: Vec<String> = self.handlers.read().await.keys().cloned().collect();

        let mut attempt = 0u32;
        loop {
            match queue::find_next_and_reserve(&self.pool, &queue_names, now, self.reserve_duration).await {
                Ok(job) => return Ok(job),
                Err(err) if err.is_database_locked() && attempt < CONTENTION_RETRY_ATTEMPTS => {
                    attempt += 1;
                    let backoff = StdDuration::from_millis(
                        fastrand::u64(0..CONTENTION_RETRY_MAX_BACKOFF.as_millis() as u64),
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Dispatch a single job: invoke its handler under a panic guard, then
    /// record the outcome. Returns `true` if a job was found and dispatched
    /// (regardless of whether the attempt itself succeeded). Exposed
    /// directly (rather than only through `run`'s loop) so tests can
    /// exercise one tick at a time.
    #[instrument(skip(self, runtime), fields(job_id = tracing::field::Empty, queue_name = tracing::field::Empty))]
    pub async fn tick(&self, runtime: &Arc<Runtime>) -> Result<bool, RuntimeError> {
        let now = runtime.now().await?;

        let Some(mut job) = self.find_next_and_reserve_with_retry(now).await? else {
            return Ok(false);
        };

        tracing::Span::current().record("job_id", job.id);
        tracing::Span::current().record("queue_name", job.queue_name.as_str());

        let handler = self.handlers.read().await.get(&job.queue_name).cloned();
        let Some(handler) = handler else {
            warn!(queue_name = %job.queue_name, "job claimed for a queue with no handler");
            return Err(RuntimeError::NotConfigured("queue name has no registered handler"));
        };

        let outcome = run_handler_guarded(handler, runtime.clone(), job.clone()).await;

        let (error_message, output_message) = match outcome {
            Ok(output) => (String::new(), output),
            Err(message) => (message, String::new()),
        };

        let finish_now = runtime.now().await?;
        let mut conn = self.pool.acquire().await?;
        queue::finish(&mut conn, &mut job, finish_now, &error_message, &output_message).await?;

        if error_message.is_empty() {
            info!(job_id = job.id, "job finished");
        } else {
            warn!(job_id = job.id, attempts_remaining = job.attempts_remaining, error = %error_message, "job attempt failed");
        }

        Ok(true)
    }

    /// Run the dispatch loop until `runtime`'s cancellation token fires.
    /// Delay policy: no delay after a successful dispatch (drain greedily),
    /// 30s after finding no pending jobs or hitting any other error. The
    /// first iteration runs immediately.
    ///
    /// Safe to call more than once concurrently on the same `Arc<Worker>` —
    /// `Config::background_workers` configures exactly that — since nothing
    /// here holds a lock across an await point between iterations.
    pub async fn run(self: &Arc<Self>, runtime: Arc<Runtime>) {
        let mut state = RunState::Idle;
        self.trigger();

        let cancellation = runtime.cancellation().clone();

        loop {
            if cancellation.is_cancelled() {
                state = RunState::ShuttingDown;
            }
            if state == RunState::ShuttingDown {
                break;
            }

            state = RunState::Running;
            let delay = match self.tick(&runtime).await {
                Ok(true) => SUCCESS_DELAY,
                Ok(false) => IDLE_DELAY,
                Err(err) => {
                    warn!(error = %err, "worker iteration failed");
                    IDLE_DELAY
                }
            };
            state = RunState::Idle;

            tokio::select! {
                _ = cancellation.cancelled() => {
                    state = RunState::ShuttingDown;
                }
                _ = tokio::time::sleep(delay) => {}
                _ = self.trigger.notified() => {}
            }
        }
    }
}

/// Invoke `handler`, converting an unhandled panic into an error message
/// instead of taking down the worker task. `catch_unwind` cannot directly
/// wrap an `.await` point, so the handler runs on its own task and a panic
/// is detected via `JoinError::is_panic`.
async fn run_handler_guarded(handler: Handler, runtime: Arc<Runtime>, job: Job) -> Result<String, String> {
    let task = tokio::spawn(async move { handler(runtime, job).await });

    match task.await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(err)) => Err(err.to_string()),
        Err(join_err) if join_err.is_panic() => Err(format!("handler panicked: {}", describe_panic(join_err))),
        Err(join_err) => Err(format!("handler task was cancelled: {join_err}")),
    }
}

fn describe_panic(join_err: tokio::task::JoinError) -> String {
    match join_err.try_into_panic() {
        Ok(payload) => {
            if let Some(s) = payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "non-string panic payload".to_string()
            }
        }
        Err(_) => "unknown panic".to_string(),
    }
}

#[async_trait]
impl JobQueueHandle for Worker {
    async fn enqueue(
        &self,
        conn: &mut SqliteConnection,
        queue_name: &str,
        payload: String,
        run_after: Option<DateTime<Utc>>,
        failure_delay: Option<ChronoDuration>,
        attempts_remaining: Option<i64>,
    ) -> Result<i64, RuntimeError> {
        self.add(conn, Utc::now(), queue_name, payload, run_after, failure_delay, attempts_remaining)
            .await
    }

    fn trigger(&self) {
        Worker::trigger(self);
    }
}

/// A best-effort progress write for a handler to call mid-run. Failures are
/// logged and swallowed: losing a progress update must never fail the job.
pub async fn update_progress(pool: &SqlitePool, job_id: i64, percent: i32) {
    let mut conn = match pool.acquire().await {
        Ok(conn) => conn,
        Err(err) => {
            warn!(job_id, error = %err, "could not acquire connection to update progress");
            return;
        }
    };

    if let Err(err) = queue::update_progress(&mut conn, job_id, percent).await {
        warn!(job_id, error = %err, "could not update job progress");
    }
}
