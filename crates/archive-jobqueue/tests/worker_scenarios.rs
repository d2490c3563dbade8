//! End-to-end scenarios over a real (in-memory) SQLite database, covering
//! the queue's retry, exhaustion, panic-isolation, transactional-enqueue,
//! contention, and lease-expiry behavior.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use archive_core::{with_transaction, Savepoint};
use archive_jobqueue::{ensure_schema, fetch, handler, Worker};
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::Row;

const QUEUE: &str = "test_queue";

async fn setup() -> (sqlx::SqlitePool, Arc<Worker>) {
    let pool = archive_testing::sqlite_pool().await;
    ensure_schema(&pool).await.unwrap();
    let worker = Worker::new(pool.clone());
    (pool, worker)
}

#[tokio::test]
async fn s1_happy_path() {
    let (pool, worker) = setup().await;
    worker.register(QUEUE, handler(|_rt, _job| async { Ok(String::new()) })).await.unwrap();

    let runtime = Arc::new(archive_testing::runtime_with_db(pool.clone()));

    let mut conn = pool.acquire().await.unwrap();
    let id = worker
        .add(&mut conn, Utc::now(), QUEUE, "x".to_string(), None, None, Some(3))
        .await
        .unwrap();
    drop(conn);

    assert!(worker.tick(&runtime).await.unwrap());

    let job = fetch(&pool, id).await.unwrap().expect("job exists");
    assert!(job.finished_at.is_some());
    assert_eq!(job.error_messages, vec![""]);
    assert_eq!(job.output_messages, vec![""]);
}

#[tokio::test]
async fn s2_retry_then_succeed() {
    let (pool, worker) = setup().await;
    let attempt = Arc::new(AtomicUsize::new(0));
    let attempt_for_handler = attempt.clone();

    worker
        .register(
            QUEUE,
            handler(move |_rt, _job| {
                let attempt = attempt_for_handler.clone();
                async move {
                    if attempt.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(anyhow::anyhow!("boom"))
                    } else {
                        Ok(String::new())
                    }
                }
            }),
        )
        .await
        .unwrap();

    let runtime = Arc::new(archive_testing::runtime_with_db(pool.clone()));

    let mut conn = pool.acquire().await.unwrap();
    let id = worker
        .add(
            &mut conn,
            Utc::now(),
            QUEUE,
            "x".to_string(),
            None,
            Some(ChronoDuration::milliseconds(10)),
            Some(3),
        )
        .await
        .unwrap();
    drop(conn);

    assert!(worker.tick(&runtime).await.unwrap());
    let after_first = fetch(&pool, id).await.unwrap().unwrap();
    assert!(after_first.finished_at.is_none());
    assert_eq!(after_first.error_messages, vec!["boom"]);
    assert_eq!(after_first.attempts_remaining, 2);

    tokio::time::sleep(StdDuration::from_millis(15)).await;

    assert!(worker.tick(&runtime).await.unwrap());
    let after_second = fetch(&pool, id).await.unwrap().unwrap();
    assert!(after_second.finished_at.is_some());
    assert_eq!(after_second.error_messages, vec!["boom", ""]);
    assert_eq!(after_second.attempts_remaining, 2);
    assert!(after_first.run_after - after_first.created_at >= ChronoDuration::milliseconds(10));
}

#[tokio::test]
async fn s3_exhaustion() {
    let (pool, worker) = setup().await;
    worker
        .register(QUEUE, handler(|_rt, _job| async { Err(anyhow::anyhow!("boom")) }))
        .await
        .unwrap();

    let runtime = Arc::new(archive_testing::runtime_with_db(pool.clone()));

    let mut conn = pool.acquire().await.unwrap();
    let id = worker
        .add(
            &mut conn,
            Utc::now(),
            QUEUE,
            "x".to_string(),
            None,
            Some(ChronoDuration::milliseconds(1)),
            Some(1),
        )
        .await
        .unwrap();
    drop(conn);

    assert!(worker.tick(&runtime).await.unwrap());
    let after_first = fetch(&pool, id).await.unwrap().unwrap();
    assert!(after_first.finished_at.is_none());
    assert_eq!(after_first.attempts_remaining, 0);

    tokio::time::sleep(StdDuration::from_millis(5)).await;

    assert!(worker.tick(&runtime).await.unwrap());
    let after_second = fetch(&pool, id).await.unwrap().unwrap();
    assert!(after_second.finished_at.is_some());
    assert_eq!(after_second.error_messages, vec!["boom", "boom"]);
    assert_eq!(after_second.attempts_remaining, 0);
}

#[tokio::test]
async fn s4_panic_isolation() {
    let (pool, worker) = setup().await;
    worker
        .register(QUEUE, handler(|_rt, _job| async { panic!("oops") }))
        .await
        .unwrap();

    let runtime = Arc::new(archive_testing::runtime_with_db(pool.clone()));

    let mut conn = pool.acquire().await.unwrap();
    let id = worker
        .add(&mut conn, Utc::now(), QUEUE, "x".to_string(), None, None, Some(3))
        .await
        .unwrap();
    drop(conn);

    let dispatched = worker.tick(&runtime).await.unwrap();
    assert!(dispatched);

    let job = fetch(&pool, id).await.unwrap().unwrap();
    assert!(job.finished_at.is_none());
    assert!(job.error_messages.last().unwrap().contains("oops"));

    // The worker itself is unharmed: a second, unrelated tick still works.
    assert!(!worker.tick(&runtime).await.unwrap());
}

#[tokio::test]
async fn s5_transactional_enqueue_rolled_back() {
    let (pool, worker) = setup().await;
    worker.register(QUEUE, handler(|_rt, _job| async { Ok(String::new()) })).await.unwrap();

    let runtime = Arc::new(archive_testing::runtime_with_db(pool.clone()));

    let worker_in_sp = worker.clone();
    let result: Result<(), archive_core::RuntimeError> = with_transaction(&pool, "enqueue_sp", async move |sp: &mut Savepoint<'static>| {
        worker_in_sp
            .add(sp.connection()?, Utc::now(), QUEUE, "rolled_back".to_string(), None, None, None)
            .await?;
        Err(archive_core::RuntimeError::NotConfigured("force rollback"))
    })
    .await;
    assert!(result.is_err());

    let row = sqlx::query("select count(*) as n from jobs where payload = ?")
        .bind("rolled_back")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(row.get::<i64, _>("n"), 0);

    assert!(!worker.tick(&runtime).await.unwrap());
}

#[tokio::test]
async fn s6_contention_retry_dispatches_exactly_once() {
    let (pool, worker) = setup().await;
    let runs = Arc::new(AtomicUsize::new(0));
    let runs_for_handler = runs.clone();

    worker
        .register(
            QUEUE,
            handler(move |_rt, _job| {
                let runs = runs_for_handler.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(String::new())
                }
            }),
        )
        .await
        .unwrap();

    let runtime = Arc::new(archive_testing::runtime_with_db(pool.clone()));

    let mut conn = pool.acquire().await.unwrap();
    worker
        .add(&mut conn, Utc::now(), QUEUE, "x".to_string(), None, None, Some(3))
        .await
        .unwrap();
    drop(conn);

    let (a, b) = tokio::join!(worker.tick(&runtime), worker.tick(&runtime));
    let dispatched = [a.unwrap(), b.unwrap()].into_iter().filter(|v| *v).count();

    assert_eq!(dispatched, 1, "exactly one tick should have found the job");
    assert_eq!(runs.load(Ordering::SeqCst), 1, "the handler must run exactly once");
}

#[tokio::test]
async fn s7_lease_expiry_allows_redispatch() {
    let (pool, worker) = setup().await;
    worker.register(QUEUE, handler(|_rt, _job| async { Ok(String::new()) })).await.unwrap();

    let runtime = Arc::new(archive_testing::runtime_with_db(pool.clone()));
    let now = Utc::now();

    // A job reserved by a worker that died before finishing: the lease
    // expired ten minutes ago.
    sqlx::query(
        r#"
        insert into jobs
            (created_at, queue_name, payload, run_after, failure_delay, attempts_remaining,
             reserved_at, reserved_until, error_messages, output_messages)
        values (?, ?, ?, ?, ?, ?, ?, ?, '[]', '[]')
        "#,
    )
    .bind(now - ChronoDuration::minutes(20))
    .bind(QUEUE)
    .bind("orphaned")
    .bind(now - ChronoDuration::minutes(20))
    .bind(ChronoDuration::seconds(5).num_nanoseconds().unwrap())
    .bind(3i64)
    .bind(now - ChronoDuration::minutes(15))
    .bind(now - ChronoDuration::minutes(10))
    .execute(&pool)
    .await
    .unwrap();

    assert!(worker.tick(&runtime).await.unwrap());

    let row = sqlx::query("select finished_at from jobs where payload = 'orphaned'")
        .fetch_one(&pool)
        .await
        .unwrap();
    let finished_at: Option<chrono::DateTime<Utc>> = row.try_get("finished_at").unwrap();
    assert!(finished_at.is_some());
}
