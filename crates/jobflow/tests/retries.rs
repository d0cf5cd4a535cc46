mod common;

use chrono::{DateTime, Utc};
use common::{force_eligible, insert_job, insert_job_with, job_status_and_retries, setup_db};
use jobflow::jobs::Store;
use serial_test::serial;
use sqlx::PgPool;

async fn job_schedule(pool: &PgPool, id: i64) -> (String, i32, DateTime<Utc>, Option<String>) {
    sqlx::query_as("SELECT status, retry_count, next_run_at, last_err FROM jobs WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
#[serial]
async fn failure_requeues_with_backoff() {
    let pool = setup_db().await;
    let store = Store::new(pool.clone());

    let id = insert_job(&pool, "flaky").await;
    store.claim_pending(1).await.unwrap();

    let before = Utc::now();
    store.handle_failure(id, "connection refused").await.unwrap();

    let (status, retries, next_run_at, last_err) = job_schedule(&pool, id).await;
    assert_eq!(status, "pending");
    assert_eq!(retries, 1);
    assert!(next_run_at > before, "backoff must push next_run_at forward");
    assert_eq!(last_err.as_deref(), Some("connection refused"));

    let completed_at: Option<DateTime<Utc>> =
        sqlx::query_scalar("SELECT completed_at FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(completed_at.is_none());
}

#[tokio::test]
#[serial]
async fn backoff_grows_with_each_retry() {
    let pool = setup_db().await;
    let store = Store::new(pool.clone());

    let id = insert_job_with(&pool, "flaky", 0, 10).await;

    store.claim_pending(1).await.unwrap();
    store.handle_failure(id, "t1").await.unwrap();
    let (_, _, first_run_at, _) = job_schedule(&pool, id).await;
    let first_delay = first_run_at - Utc::now();

    force_eligible(&pool, id).await;
    store.claim_pending(1).await.unwrap();
    store.handle_failure(id, "t2").await.unwrap();
    let (_, _, second_run_at, _) = job_schedule(&pool, id).await;
    let second_delay = second_run_at - Utc::now();

    assert!(
        second_delay > first_delay,
        "expected increasing backoff, got {first_delay} then {second_delay}"
    );
}

#[tokio::test]
#[serial]
async fn exhausted_retries_fail_terminally() {
    let pool = setup_db().await;
    let store = Store::new(pool.clone());

    let id = insert_job_with(&pool, "flaky", 0, 2).await;

    for attempt in 1..=2 {
        force_eligible(&pool, id).await;
        let claimed = store.claim_pending(1).await.unwrap();
        assert_eq!(claimed.len(), 1, "attempt {attempt} should claim the job");
        store.handle_failure(id, "still broken").await.unwrap();
    }

    let job = store.get_job(id).await.unwrap();
    assert_eq!(job.status, "failed");
    assert_eq!(job.retry_count, 2);
    assert!(job.completed_at.is_some(), "terminal failure sets completed_at");
    assert_eq!(job.last_err.as_deref(), Some("still broken"));

    // and it never comes back
    force_eligible(&pool, id).await;
    assert!(store.claim_pending(10).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn handle_failure_only_touches_running_jobs() {
    let pool = setup_db().await;
    let store = Store::new(pool.clone());

    let id = insert_job(&pool, "flaky").await;
    store.handle_failure(id, "phantom failure").await.unwrap();

    let (status, retries) = job_status_and_retries(&pool, id).await;
    assert_eq!(status, "pending");
    assert_eq!(retries, 0, "a job that is not running cannot accrue retries");
}

#[tokio::test]
#[serial]
async fn terminal_jobs_are_not_resurrected() {
    let pool = setup_db().await;
    let store = Store::new(pool.clone());

    let id = insert_job(&pool, "noop").await;
    store.claim_pending(1).await.unwrap();
    store.mark_completed(id).await.unwrap();

    store.mark_completed(id).await.unwrap();
    store.handle_failure(id, "late error").await.unwrap();
    store.mark_failed(id, "late config error").await.unwrap();

    let job = store.get_job(id).await.unwrap();
    assert_eq!(job.status, "completed");
    assert_eq!(job.retry_count, 0);
    assert!(job.last_err.is_none());
}

#[tokio::test]
#[serial]
async fn long_error_messages_are_truncated() {
    let pool = setup_db().await;
    let store = Store::new(pool.clone());

    let id = insert_job(&pool, "flaky").await;
    store.claim_pending(1).await.unwrap();

    let huge = "x".repeat(10_000);
    store.handle_failure(id, &huge).await.unwrap();

    let job = store.get_job(id).await.unwrap();
    let stored = job.last_err.unwrap();
    assert!(stored.chars().count() <= 1024, "stored {}", stored.len());
}
