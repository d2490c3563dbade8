//! The primitive operations over `jobs` rows: insert, find-next, reserve,
//! finish. Grounded on `internal/jobqueue/jobqueue.go`'s `findNext`,
//! `reserve`, `findNextAndReserve`, and `finish`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use archive_core::{RuntimeError, Savepoint};

use crate::model::{encode_json_string_slice, Job};

/// Default reservation lease: 5 minutes.
pub const DEFAULT_RESERVE_DURATION: ChronoDuration = ChronoDuration::minutes(5);
/// Default delay added to `run_after` following a failed attempt: 5 seconds.
pub const DEFAULT_FAILURE_DELAY: ChronoDuration = ChronoDuration::seconds(5);
/// Default number of attempts a freshly enqueued job gets.
pub const DEFAULT_ATTEMPTS_REMAINING: i64 = 5;

/// Insert a fully-defaulted job row and return its assigned id.
pub(crate) async fn insert(
    conn: &mut SqliteConnection,
    created_at: DateTime<Utc>,
    queue_name: &str,
    payload: &str,
    run_after: DateTime<Utc>,
    failure_delay: ChronoDuration,
    attempts_remaining: i64,
) -> Result<i64, RuntimeError> {
    let result = sqlx::query(
        r#"
        insert into jobs
            (created_at, queue_name, payload, run_after, failure_delay, attempts_remaining, error_messages, output_messages)
        values (?, ?, ?, ?, ?, ?, '[]', '[]')
        "#,
    )
    .bind(created_at)
    .bind(queue_name)
    .bind(payload)
    .bind(run_after)
    .bind(failure_delay.num_nanoseconds().unwrap_or(i64::MAX))
    .bind(attempts_remaining)
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Select the single eligible job with the smallest `run_after` among
/// `queue_names`. Ties break on `id asc` (a deterministic secondary key;
/// `SPEC_FULL.md` §9 records this as a conscious resolution of the
/// original's open question about tie-breaking).
pub(crate) async fn find_next(
    conn: &mut SqliteConnection,
    queue_names: &[String],
    now: DateTime<Utc>,
) -> Result<Option<Job>, RuntimeError> {
    if queue_names.is_empty() {
        return Ok(None);
    }

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        "select * from jobs where finished_at is null and run_after < ",
    );
    builder.push_bind(now);
    builder.push(" and (reserved_until is null or reserved_until < ");
    builder.push_bind(now);
    builder.push(") and queue_name in (");
    {
        let mut separated = builder.separated(", ");
        for name in queue_names {
            separated.push_bind(name.clone());
        }
    }
    builder.push(") order by run_after asc, id asc limit 1");

    let row = builder.build().fetch_optional(&mut *conn).await?;

    row.as_ref().map(Job::from_row).transpose()
}

/// Reserve `job`, writing the new lease back to the row. Fails if the row's
/// current state doesn't match what `job` was read with (non-expired
/// reservation, or already finished).
pub(crate) async fn reserve(
    conn: &mut SqliteConnection,
    job: &mut Job,
    now: DateTime<Utc>,
    reserve_duration: ChronoDuration,
) -> Result<(), RuntimeError> {
    if let Some(reserved_until) = job.reserved_until {
        if reserved_until > now {
            return Err(RuntimeError::NotConfigured(
                "can't reserve a job with a non-expired reservation",
            ));
        }
    }
    if job.finished_at.is_some() {
        return Err(RuntimeError::NotConfigured("can't reserve a job that has already finished"));
    }

    let reserved_until = now + reserve_duration;

    let result = sqlx::query(
        "update jobs set reserved_at = ?, reserved_until = ? where id = ? and finished_at is null and (reserved_until is null or reserved_until < ?)",
    )
    .bind(now)
    .bind(reserved_until)
    .bind(job.id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RuntimeError::Conflict("could not reserve job: row was concurrently modified"));
    }

    job.reserved_at = Some(now);
    job.reserved_until = Some(reserved_until);

    Ok(())
}

/// `find_next` followed by `reserve`, as one operation in a fresh
/// transaction (mirrors the original's `findNextAndReserve(ctx, tx, ...)`,
/// which runs under a transaction its caller already opened; this version
/// opens and owns its own since nothing upstream of it holds one open).
///
/// A `reserve` that loses the race to another worker is swallowed as "no
/// job found" rather than surfaced as an error: under concurrent access
/// losing that race is routine, not exceptional.
pub(crate) async fn find_next_and_reserve(
    pool: &SqlitePool,
    queue_names: &[String],
    now: DateTime<Utc>,
    reserve_duration: ChronoDuration,
) -> Result<Option<Job>, RuntimeError> {
    let mut scope = Savepoint::from_pool(pool, "find_next_and_reserve").await?;

    let Some(mut job) = find_next(scope.connection()?, queue_names, now).await? else {
        scope.release().await?;
        return Ok(None);
    };

    match reserve(scope.connection()?, &mut job, now, reserve_duration).await {
        Ok(()) => {
            scope.release().await?;
            Ok(Some(job))
        }
        Err(err) if err.is_conflict() => {
            scope.rollback().await?;
            Ok(None)
        }
        Err(err) => match scope.rollback().await {
            Ok(()) => Err(err),
            Err(rollback_err) => Err(RuntimeError::join(err, rollback_err)),
        },
    }
}

/// Record the outcome of one attempt. Appends `error_message`/
/// `output_message`; finalizes on success or attempt exhaustion, otherwise
/// schedules a retry.
pub(crate) async fn finish(
    conn: &mut SqliteConnection,
    job: &mut Job,
    now: DateTime<Utc>,
    error_message: &str,
    output_message: &str,
) -> Result<(), RuntimeError> {
    if job.finished_at.is_some() {
        return Err(RuntimeError::NotConfigured("can't finish a job that has already finished"));
    }

    job.error_messages.push(error_message.to_string());
    job.output_messages.push(output_message.to_string());

    let mut finished_at = Some(now);

    if !error_message.is_empty() && job.attempts_remaining > 0 {
        job.attempts_remaining -= 1;
        job.run_after = now + job.failure_delay;
        job.reserved_at = None;
        job.reserved_until = None;
        finished_at = None;
    }

    job.finished_at = finished_at;

    sqlx::query(
        r#"
        update jobs set
            finished_at = ?,
            run_after = ?,
            attempts_remaining = ?,
            reserved_at = ?,
            reserved_until = ?,
            error_messages = ?,
            output_messages = ?
        where id = ?
        "#,
    )
    .bind(job.finished_at)
    .bind(job.run_after)
    .bind(job.attempts_remaining)
    .bind(job.reserved_at)
    .bind(job.reserved_until)
    .bind(encode_json_string_slice(&job.error_messages))
    .bind(encode_json_string_slice(&job.output_messages))
    .bind(job.id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Best-effort progress write, clamped to `[0, 100]`.
pub(crate) async fn update_progress(conn: &mut SqliteConnection, job_id: i64, percent: i32) -> Result<(), RuntimeError> {
    let clamped = percent.clamp(0, 100);
    sqlx::query("update jobs set progress = ? where id = ?")
        .bind(clamped)
        .bind(job_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub(crate) async fn fetch(conn: &mut SqliteConnection, job_id: i64) -> Result<Option<Job>, RuntimeError> {
    let row = sqlx::query("select * from jobs where id = ?")
        .bind(job_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(Job::from_row).transpose()
}

