//! The context bag, made explicit.
//!
//! `spec.md` describes an implicitly-carried context bag (database handle,
//! clock, logger, job-queue handle, template collection, HTTP client). Rust
//! has no idiomatic equivalent of Go's `context.Context` value bag outside
//! web-framework extractors, and the core is deliberately framework-agnostic,
//! so — per the REDESIGN FLAGS in `SPEC_FULL.md` — this crate carries the
//! same collaborators in an explicit `Runtime` struct passed by reference.
//! Every lookup that isn't present returns [`RuntimeError::NotConfigured`]
//! rather than panicking, matching the original's `ctxdb.ErrNoDB`/
//! `ctxjobqueue.ErrNoWorker` style.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, RealClock};
use crate::config::Config;
use crate::error::RuntimeError;
use crate::logger::LoggerHooks;

/// The minimal surface a handler needs to enqueue a follow-up job without
/// the context bag depending on the concrete worker implementation (which
/// lives in a separate crate that depends on this one). Grounded on the
/// teacher's own `JobQueue`/`NoOpJobQueue` split in `seesaw-core::dispatch`.
#[async_trait]
pub trait JobQueueHandle: Send + Sync {
    /// Insert a job row through `conn` (the caller's open transaction or
    /// savepoint) and return its assigned id. Implementations are
    /// responsible for filling in defaults and validating that `queue_name`
    /// is registered.
    async fn enqueue(
        &self,
        conn: &mut SqliteConnection,
        queue_name: &str,
        payload: String,
        run_after: Option<DateTime<Utc>>,
        failure_delay: Option<ChronoDuration>,
        attempts_remaining: Option<i64>,
    ) -> Result<i64, RuntimeError>;

    /// Non-blocking notification that work may be available.
    fn trigger(&self);
}

/// A [`JobQueueHandle`] that always fails. Used as the default so that
/// "enqueue without a worker registered" fails explicitly instead of
/// silently doing nothing.
pub struct NoOpJobQueueHandle;

#[async_trait]
impl JobQueueHandle for NoOpJobQueueHandle {
    async fn enqueue(
        &self,
        _conn: &mut SqliteConnection,
        _queue_name: &str,
        _payload: String,
        _run_after: Option<DateTime<Utc>>,
        _failure_delay: Option<ChronoDuration>,
        _attempts_remaining: Option<i64>,
    ) -> Result<i64, RuntimeError> {
        Err(RuntimeError::NotConfigured("job queue"))
    }

    fn trigger(&self) {}
}

/// The out-of-scope HTML template collection. The core only needs to carry
/// a handle to it (§1: template rendering is an external collaborator);
/// rendering itself is never invoked from this crate.
pub trait TemplateCollection: Send + Sync {
    fn execute_template(&self, writer: &mut dyn Write, name: &str, data: &serde_json::Value) -> anyhow::Result<()>;
}

/// Process-wide plumbing carried by reference through every job and
/// request. See the module docs for why this is explicit rather than
/// implicit.
pub struct Runtime {
    db: Option<SqlitePool>,
    clock: Arc<dyn Clock>,
    logger_hooks: Arc<LoggerHooks>,
    job_queue: Option<Arc<dyn JobQueueHandle>>,
    http_client: reqwest::Client,
    templates: Option<Arc<dyn TemplateCollection>>,
    config: Config,
    cancellation: CancellationToken,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    pub fn db(&self) -> Result<&SqlitePool, RuntimeError> {
        self.db.as_ref().ok_or(RuntimeError::NotConfigured("database"))
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Convenience: `self.clock().now()`.
    pub async fn now(&self) -> Result<DateTime<Utc>, RuntimeError> {
        self.clock.now().await
    }

    pub fn logger_hooks(&self) -> &LoggerHooks {
        &self.logger_hooks
    }

    pub fn job_queue(&self) -> Result<&Arc<dyn JobQueueHandle>, RuntimeError> {
        self.job_queue.as_ref().ok_or(RuntimeError::NotConfigured("no worker"))
    }

    /// The only collaborator with a silent default per `SPEC_FULL.md` §4.4.
    pub fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }

    pub fn templates(&self) -> Result<&Arc<dyn TemplateCollection>, RuntimeError> {
        self.templates.as_ref().ok_or(RuntimeError::NotConfigured("template collection"))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The token every long-running loop (the worker's run loop, chiefly)
    /// should select against to stop promptly on shutdown.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}

/// Builds a [`Runtime`]. Every collaborator except the HTTP client and
/// logger hooks defaults to "not configured" until supplied.
#[derive(Default)]
pub struct RuntimeBuilder {
    db: Option<SqlitePool>,
    clock: Option<Arc<dyn Clock>>,
    logger_hooks: Option<LoggerHooks>,
    job_queue: Option<Arc<dyn JobQueueHandle>>,
    http_client: Option<reqwest::Client>,
    templates: Option<Arc<dyn TemplateCollection>>,
    config: Option<Config>,
    cancellation: Option<CancellationToken>,
}

impl RuntimeBuilder {
    pub fn with_db(mut self, db: SqlitePool) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_logger_hooks(mut self, hooks: LoggerHooks) -> Self {
        self.logger_hooks = Some(hooks);
        self
    }

    pub fn with_job_queue(mut self, job_queue: Arc<dyn JobQueueHandle>) -> Self {
        self.job_queue = Some(job_queue);
        self
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn with_templates(mut self, templates: Arc<dyn TemplateCollection>) -> Self {
        self.templates = Some(templates);
        self
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    pub fn build(self) -> Runtime {
        Runtime {
            db: self.db,
            clock: self.clock.unwrap_or_else(|| Arc::new(RealClock)),
            logger_hooks: Arc::new(self.logger_hooks.unwrap_or_default()),
            job_queue: self.job_queue,
            http_client: self.http_client.unwrap_or_default(),
            templates: self.templates,
            config: self.config.unwrap_or_default(),
            cancellation: self.cancellation.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_collaborators_fail_explicitly() {
        let rt = Runtime::builder().build();
        assert!(matches!(rt.db(), Err(RuntimeError::NotConfigured("database"))));
        assert!(matches!(rt.job_queue(), Err(RuntimeError::NotConfigured("no worker"))));
        assert!(matches!(rt.templates(), Err(RuntimeError::NotConfigured("template collection"))));
    }

    #[tokio::test]
    async fn http_client_defaults_when_absent() {
        let rt = Runtime::builder().build();
        // Does not panic or error: the one collaborator with a silent default.
        let _ = rt.http_client();
    }

    #[tokio::test]
    async fn real_clock_is_the_default() {
        let rt = Runtime::builder().build();
        assert!(rt.now().await.is_ok());
    }
}
