mod common;

use std::time::Duration;

use common::{insert_job, setup_db};
use jobflow::jobs::Store;
use serial_test::serial;
use sqlx::PgPool;

async fn complete_with_age(pool: &PgPool, id: i64, age_secs: i64) {
    sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'completed',
            completed_at = now() - make_interval(secs => $2)
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(age_secs as f64)
    .execute(pool)
    .await
    .unwrap();
}

#[tokio::test]
#[serial]
async fn lists_only_completed_jobs_past_the_cutoff() {
    let pool = setup_db().await;
    let store = Store::new(pool.clone());

    let old_completed = insert_job(&pool, "noop").await;
    complete_with_age(&pool, old_completed, 3 * 24 * 3600).await;

    let fresh_completed = insert_job(&pool, "noop").await;
    complete_with_age(&pool, fresh_completed, 60).await;

    let old_failed = insert_job(&pool, "noop").await;
    sqlx::query(
        "UPDATE jobs SET status = 'failed', completed_at = now() - interval '3 days' WHERE id = $1",
    )
    .bind(old_failed)
    .execute(&pool)
    .await
    .unwrap();

    let _still_pending = insert_job(&pool, "noop").await;

    let archivable = store
        .list_archivable(Duration::from_secs(24 * 3600), 100)
        .await
        .unwrap();

    let ids: Vec<i64> = archivable.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![old_completed]);
}

#[tokio::test]
#[serial]
async fn respects_the_batch_limit_oldest_first() {
    let pool = setup_db().await;
    let store = Store::new(pool.clone());

    let oldest = insert_job(&pool, "noop").await;
    complete_with_age(&pool, oldest, 5 * 24 * 3600).await;
    let middle = insert_job(&pool, "noop").await;
    complete_with_age(&pool, middle, 4 * 24 * 3600).await;
    let newest = insert_job(&pool, "noop").await;
    complete_with_age(&pool, newest, 3 * 24 * 3600).await;

    let archivable = store
        .list_archivable(Duration::from_secs(24 * 3600), 2)
        .await
        .unwrap();

    let ids: Vec<i64> = archivable.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![oldest, middle]);
}

#[tokio::test]
#[serial]
async fn batch_delete_ignores_absent_ids() {
    let pool = setup_db().await;
    let store = Store::new(pool.clone());

    let a = insert_job(&pool, "noop").await;
    let b = insert_job(&pool, "noop").await;

    let deleted = store.batch_delete(&[a, b, 9999]).await.unwrap();
    assert_eq!(deleted, 2);

    // idempotent on re-run
    let deleted = store.batch_delete(&[a, b, 9999]).await.unwrap();
    assert_eq!(deleted, 0);

    let deleted = store.batch_delete(&[]).await.unwrap();
    assert_eq!(deleted, 0);

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(total, 0);
}
