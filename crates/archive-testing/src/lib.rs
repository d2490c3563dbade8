//! Shared fixtures for testing code built on `archive-core`: an in-memory
//! database pool and a [`Runtime`] wired up to it.
//!
//! Grounded on the pool-construction pattern already used by
//! `archive_core::savepoint`'s own unit tests (`SqlitePoolOptions` capped at
//! one connection over `sqlite::memory:`, so every acquire sees the same
//! in-memory database rather than a fresh one per connection).

use std::sync::Arc;

use archive_core::{Clock, Runtime, RuntimeBuilder, ScriptedClock, ScriptedResult, StaticClock};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

/// A fresh in-memory SQLite pool. Capped at one connection: SQLite's
/// `:memory:` database is private to the connection that created it, so a
/// pool that could hand out a second connection would silently see an empty
/// database.
pub async fn sqlite_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite pool")
}

/// Build a [`Runtime`] over `pool` with the real clock. Starting point for
/// tests that only need a database and don't care about time control.
pub fn runtime_with_db(pool: SqlitePool) -> Runtime {
    Runtime::builder().with_db(pool).build()
}

/// Build a [`Runtime`] over `pool` whose clock always reports `now`.
pub fn runtime_with_fixed_time(pool: SqlitePool, now: DateTime<Utc>) -> Runtime {
    Runtime::builder().with_db(pool).with_clock(Arc::new(StaticClock(now))).build()
}

/// Build a [`Runtime`] over `pool` whose clock dequeues from `times` in
/// order, failing with `RuntimeError::NoTimesLeft` once exhausted. Useful
/// for asserting exactly how many times a code path reads the clock.
pub fn runtime_with_scripted_time(pool: SqlitePool, times: Vec<DateTime<Utc>>) -> Runtime {
    let results = times.into_iter().map(ScriptedResult::from).collect();
    builder_with_db_and_clock(pool, Arc::new(ScriptedClock::new(results))).build()
}

fn builder_with_db_and_clock(pool: SqlitePool, clock: Arc<dyn Clock>) -> RuntimeBuilder {
    Runtime::builder().with_db(pool).with_clock(clock)
}
