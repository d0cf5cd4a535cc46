use std::time::Duration;

use sqlx::PgPool;
use tracing::debug;

use crate::error::StoreError;
use crate::jobs::model::{Job, JobPage, JobStats, JobStatus, PageMeta};

/// Retry delays grow as `2^retry_count` seconds, capped here.
const MAX_BACKOFF_SECONDS: f64 = 3600.0;

/// `last_err` is an operator-facing message, not a log sink.
const MAX_LAST_ERR_CHARS: usize = 1024;

/// Message written by the reaper when it rescues a job stuck in `running`.
pub const STUCK_JOB_ERR: &str = "job execution timed out (stuck)";

fn truncate_err(msg: &str) -> String {
    if msg.chars().count() <= MAX_LAST_ERR_CHARS {
        return msg.to_string();
    }
    msg.chars().take(MAX_LAST_ERR_CHARS).collect()
}

/// Durable job state machine over the `jobs` relation.
///
/// All mutation of job state goes through here. Claiming uses row-level locks
/// with skip-locked semantics so that concurrent dispatchers never observe
/// the same row as claimable; every other transition conditions on the
/// current status in its UPDATE predicate, which makes transitions on a
/// single job strictly serial.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new pending job, eligible immediately. Returns the full row
    /// including the assigned id. Type validation happens at the API layer.
    pub async fn create_job(&self, job_type: &str, payload: &str) -> Result<Job, StoreError> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (type, payload, status, next_run_at)
            VALUES ($1, $2, $3, now())
            RETURNING *
            "#,
        )
        .bind(job_type)
        .bind(payload)
        .bind(JobStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(job)
    }

    pub async fn get_job(&self, id: i64) -> Result<Job, StoreError> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        job.ok_or(StoreError::NotFound)
    }

    /// Atomically claim up to `limit` eligible jobs, oldest eligibility
    /// first, and flip them to `running`.
    ///
    /// Correctness: `SELECT ... FOR UPDATE SKIP LOCKED` inside one
    /// transaction with the UPDATE. Contending claimers skip locked rows
    /// instead of waiting, so no two callers ever receive the same job.
    /// On rollback the selected rows stay pending.
    pub async fn claim_pending(&self, limit: i64) -> Result<Vec<Job>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let mut jobs = sqlx::query_as::<_, Job>(
            r#"
            WITH eligible AS (
                SELECT id
                FROM jobs
                WHERE status = 'pending'
                  AND next_run_at <= now()
                ORDER BY next_run_at ASC, id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT $1
            )
            UPDATE jobs j
            SET status = 'running',
                started_at = now(),
                updated_at = now()
            FROM eligible e
            WHERE j.id = e.id
            RETURNING j.*
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        // UPDATE ... RETURNING does not preserve the selection order.
        jobs.sort_by_key(|j| (j.next_run_at, j.id));
        Ok(jobs)
    }

    /// Terminal success transition. Conditional on `running` so a job that
    /// was already reaped or finished is never resurrected.
    pub async fn mark_completed(&self, id: i64) -> Result<(), StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2,
                completed_at = now(),
                updated_at = now()
            WHERE id = $1
              AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(JobStatus::Completed.as_str())
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            debug!(job_id = id, "mark_completed skipped: job not running");
        }
        Ok(())
    }

    /// The retry transition. One atomic UPDATE, conditional on `running`:
    /// increments `retry_count`, records the error, and either re-queues
    /// with exponential backoff (`2^retry_count` seconds after the
    /// increment, capped) or fails terminally once retries are exhausted.
    ///
    /// The status predicate is what prevents double-counting a retry when
    /// the reaper has already re-queued the row.
    pub async fn handle_failure(&self, id: i64, err_msg: &str) -> Result<(), StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET retry_count = retry_count + 1,
                last_err = $2,
                updated_at = now(),
                status = CASE WHEN retry_count + 1 >= max_retries
                              THEN 'failed' ELSE 'pending' END,
                completed_at = CASE WHEN retry_count + 1 >= max_retries
                                    THEN now() ELSE NULL END,
                next_run_at = CASE WHEN retry_count + 1 >= max_retries
                                   THEN next_run_at
                                   ELSE now() + make_interval(secs => LEAST(POWER(2, retry_count + 1), $3)) END
            WHERE id = $1
              AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(truncate_err(err_msg))
        .bind(MAX_BACKOFF_SECONDS)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            debug!(job_id = id, "handle_failure skipped: job not running");
        }
        Ok(())
    }

    /// Direct terminal failure, bypassing retry. Used for configuration
    /// errors such as an unregistered job type, where re-running cannot
    /// help. Conditional on `running` like every other transition.
    pub async fn mark_failed(&self, id: i64, err_msg: &str) -> Result<(), StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $3,
                last_err = $2,
                completed_at = now(),
                updated_at = now()
            WHERE id = $1
              AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(truncate_err(err_msg))
        .bind(JobStatus::Failed.as_str())
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            debug!(job_id = id, "mark_failed skipped: job not running");
        }
        Ok(())
    }

    /// Rescue jobs that have been `running` longer than `max_run`: a worker
    /// crash, host loss, or hung external call. The rows go back to pending
    /// with `retry_count` untouched (a reap is not a retry) and are
    /// immediately eligible for claiming. Returns the number rescued.
    pub async fn reap_stuck_jobs(&self, max_run: Duration) -> Result<u64, StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                last_err = $2,
                updated_at = now()
            WHERE status = 'running'
              AND started_at < now() - make_interval(secs => $1)
            "#,
        )
        .bind(max_run.as_secs_f64())
        .bind(STUCK_JOB_ERR)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected())
    }

    /// Completed jobs older than `age`, oldest first, for the archival
    /// exporter.
    pub async fn list_archivable(&self, age: Duration, limit: i64) -> Result<Vec<Job>, StoreError> {
        let jobs = sqlx::query_as::<_, Job>(
            r#"
            SELECT *
            FROM jobs
            WHERE status = 'completed'
              AND completed_at < now() - make_interval(secs => $1)
            ORDER BY completed_at ASC
            LIMIT $2
            "#,
        )
        .bind(age.as_secs_f64())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    /// Bulk delete; absent ids are ignored.
    pub async fn batch_delete(&self, ids: &[i64]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let res = sqlx::query("DELETE FROM jobs WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;

        Ok(res.rows_affected())
    }

    pub async fn list_jobs(&self, limit: i64, offset: i64) -> Result<JobPage, StoreError> {
        let limit = limit.clamp(1, 100);
        let offset = offset.max(0);

        let jobs = sqlx::query_as::<_, Job>(
            r#"
            SELECT *
            FROM jobs
            ORDER BY created_at DESC, id DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&self.pool)
            .await?;

        Ok(JobPage {
            jobs,
            meta: PageMeta::new(limit, offset, total),
        })
    }

    /// Failed jobs, most recently failed first.
    pub async fn list_dead(&self, limit: i64, offset: i64) -> Result<JobPage, StoreError> {
        let limit = limit.clamp(1, 100);
        let offset = offset.max(0);

        let jobs = sqlx::query_as::<_, Job>(
            r#"
            SELECT *
            FROM jobs
            WHERE status = 'failed'
            ORDER BY completed_at DESC, id DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = 'failed'")
            .fetch_one(&self.pool)
            .await?;

        Ok(JobPage {
            jobs,
            meta: PageMeta::new(limit, offset, total),
        })
    }

    pub async fn get_stats(&self) -> Result<JobStats, StoreError> {
        let (pending, running, completed, failed, total) =
            sqlx::query_as::<_, (i64, i64, i64, i64, i64)>(
                r#"
                SELECT
                    COUNT(*) FILTER (WHERE status = 'pending'),
                    COUNT(*) FILTER (WHERE status = 'running'),
                    COUNT(*) FILTER (WHERE status = 'completed'),
                    COUNT(*) FILTER (WHERE status = 'failed'),
                    COUNT(*)
                FROM jobs
                "#,
            )
            .fetch_one(&self.pool)
            .await?;

        Ok(JobStats {
            pending,
            running,
            completed,
            failed,
            total,
        })
    }

    /// Close the underlying pool. Idempotent.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}
