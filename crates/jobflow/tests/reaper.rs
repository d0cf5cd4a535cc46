mod common;

use std::time::Duration;

use common::{insert_job, job_status_and_retries, setup_db};
use jobflow::jobs::{Store, STUCK_JOB_ERR};
use serial_test::serial;
use sqlx::PgPool;

async fn age_started_at(pool: &PgPool, id: i64, secs: i64) {
    sqlx::query("UPDATE jobs SET started_at = now() - make_interval(secs => $2) WHERE id = $1")
        .bind(id)
        .bind(secs as f64)
        .execute(pool)
        .await
        .unwrap();
}

#[tokio::test]
#[serial]
async fn rescues_jobs_running_past_the_deadline() {
    let pool = setup_db().await;
    let store = Store::new(pool.clone());

    let id = insert_job(&pool, "noop").await;
    store.claim_pending(1).await.unwrap();
    age_started_at(&pool, id, 3600).await;

    let reaped = store
        .reap_stuck_jobs(Duration::from_secs(30 * 60))
        .await
        .unwrap();
    assert_eq!(reaped, 1);

    let job = store.get_job(id).await.unwrap();
    assert_eq!(job.status, "pending");
    assert_eq!(job.last_err.as_deref(), Some(STUCK_JOB_ERR));
    assert_eq!(job.retry_count, 0, "a reap is not a retry");
    assert!(job.started_at.is_some(), "started_at is preserved");

    // back in the queue for any dispatcher
    let claimed = store.claim_pending(10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, id);
}

#[tokio::test]
#[serial]
async fn leaves_fresh_running_jobs_alone() {
    let pool = setup_db().await;
    let store = Store::new(pool.clone());

    let id = insert_job(&pool, "noop").await;
    store.claim_pending(1).await.unwrap();

    let reaped = store
        .reap_stuck_jobs(Duration::from_secs(30 * 60))
        .await
        .unwrap();
    assert_eq!(reaped, 0);

    let (status, _) = job_status_and_retries(&pool, id).await;
    assert_eq!(status, "running");
}

#[tokio::test]
#[serial]
async fn reaped_jobs_cannot_double_count_retries() {
    let pool = setup_db().await;
    let store = Store::new(pool.clone());

    let id = insert_job(&pool, "noop").await;
    store.claim_pending(1).await.unwrap();
    age_started_at(&pool, id, 3600).await;

    assert_eq!(
        store
            .reap_stuck_jobs(Duration::from_secs(60))
            .await
            .unwrap(),
        1
    );

    // The presumed-dead worker reports in after all. Both the reaper and
    // the retry transition predicate on running, so this is a no-op.
    store.handle_failure(id, "late report").await.unwrap();

    let (status, retries) = job_status_and_retries(&pool, id).await;
    assert_eq!(status, "pending");
    assert_eq!(retries, 0);
}

#[tokio::test]
#[serial]
async fn reap_returns_count_of_rescued_jobs() {
    let pool = setup_db().await;
    let store = Store::new(pool.clone());

    for _ in 0..3 {
        insert_job(&pool, "noop").await;
    }
    let claimed = store.claim_pending(3).await.unwrap();
    assert_eq!(claimed.len(), 3);

    for job in &claimed[..2] {
        age_started_at(&pool, job.id, 7200).await;
    }

    let reaped = store
        .reap_stuck_jobs(Duration::from_secs(1800))
        .await
        .unwrap();
    assert_eq!(reaped, 2);

    let running: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = 'running'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(running, 1);

    let pending: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = 'pending'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(pending, 2);
}
