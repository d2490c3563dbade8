//! The `jobs` row and its SQLite encoding.
//!
//! Grounded on `internal/jobqueue/jobqueue.go`'s `Job` struct and
//! `internal/sqltypes/sqltypes.go`'s `JSONStringSlice` (error/output
//! messages are stored as a JSON array of strings; nil/empty round-trips as
//! the literal `[]`).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use archive_core::RuntimeError;

/// A durable unit of background work. See `SPEC_FULL.md` §3 for the full
/// invariant list; this struct only carries the data.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub queue_name: String,
    pub payload: String,
    pub run_after: DateTime<Utc>,
    pub failure_delay: ChronoDuration,
    pub attempts_remaining: i64,
    pub reserved_at: Option<DateTime<Utc>>,
    pub reserved_until: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_messages: Vec<String>,
    pub output_messages: Vec<String>,
    pub progress: Option<i32>,
}

pub(crate) fn decode_json_string_slice(raw: &str) -> Result<Vec<String>, RuntimeError> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw).map_err(|e| RuntimeError::Database(sqlx::Error::Decode(Box::new(e))))
}

pub(crate) fn encode_json_string_slice(values: &[String]) -> String {
    if values.is_empty() {
        return "[]".to_string();
    }
    serde_json::to_string(values).expect("Vec<String> always serializes")
}

impl Job {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Job, RuntimeError> {
        let failure_delay_nanos: i64 = row.try_get("failure_delay")?;
        let error_messages_raw: String = row.try_get("error_messages")?;
        let output_messages_raw: String = row.try_get("output_messages")?;

        Ok(Job {
            id: row.try_get("id")?,
            created_at: row.try_get("created_at")?,
            queue_name: row.try_get("queue_name")?,
            payload: row.try_get("payload")?,
            run_after: row.try_get("run_after")?,
            failure_delay: ChronoDuration::nanoseconds(failure_delay_nanos),
            attempts_remaining: row.try_get("attempts_remaining")?,
            reserved_at: row.try_get("reserved_at")?,
            reserved_until: row.try_get("reserved_until")?,
            finished_at: row.try_get("finished_at")?,
            error_messages: decode_json_string_slice(&error_messages_raw)?,
            output_messages: decode_json_string_slice(&output_messages_raw)?,
            progress: row.try_get("progress")?,
        })
    }
}

/// DDL for the `jobs` table, verbatim from `SPEC_FULL.md` §6.
pub const CREATE_TABLE_SQL: &str = r#"
create table if not exists jobs (
  id integer primary key autoincrement,
  created_at timestamp not null,
  queue_name text not null,
  payload text not null,
  run_after timestamp not null,
  failure_delay integer not null,
  attempts_remaining integer not null,
  reserved_at timestamp null,
  reserved_until timestamp null,
  finished_at timestamp null,
  error_messages text not null default '[]',
  output_messages text not null default '[]',
  progress integer null
)
"#;

pub const CREATE_INDEX_SQL: &str =
    "create index if not exists jobs_queue_name_finished_at_run_after on jobs (queue_name, finished_at, run_after)";

/// Create the `jobs` table and its index if they don't already exist.
pub async fn ensure_schema(pool: &sqlx::SqlitePool) -> Result<(), RuntimeError> {
    sqlx::query(CREATE_TABLE_SQL).execute(pool).await?;
    sqlx::query(CREATE_INDEX_SQL).execute(pool).await?;
    Ok(())
}
