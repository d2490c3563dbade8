//! # archive-jobqueue
//!
//! The durable background job queue and worker runtime described by
//! `SPEC_FULL.md` §4.2: a `jobs` table, lease-based reservation, bounded
//! retry with per-job backoff, and a handler registry a binary wires up at
//! startup.

mod model;
mod queue;
pub mod queue_names;
mod worker;

pub use model::{ensure_schema, Job, CREATE_INDEX_SQL, CREATE_TABLE_SQL};
pub use worker::{handler, update_progress, Handler, Worker};

use thiserror::Error;

/// Fetch a job by id, mainly for tests and the (out of scope) jobs list UI
/// to inspect state without going through the worker.
pub async fn fetch(pool: &sqlx::SqlitePool, job_id: i64) -> Result<Option<Job>, archive_core::RuntimeError> {
    let mut conn = pool.acquire().await?;
    queue::fetch(&mut conn, job_id).await
}

/// Errors specific to worker registration and dispatch, layered over
/// [`archive_core::RuntimeError`] for the underlying plumbing failures.
#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("a handler is already registered for queue {0:?}")]
    WorkerExists(String),

    #[error(transparent)]
    Runtime(#[from] archive_core::RuntimeError),
}
