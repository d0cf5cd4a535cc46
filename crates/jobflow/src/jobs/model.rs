use chrono::{DateTime, Utc};
use serde::Serialize;

/// A persisted job row. The `jobs` table is the single source of truth for
/// job state; this struct mirrors it column for column.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
    pub id: i64,
    #[sqlx(rename = "type")]
    pub job_type: String,
    pub payload: String,
    pub status: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub next_run_at: DateTime<Utc>,

    pub retry_count: i32,
    pub max_retries: i32,
    pub last_err: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

/// Aggregate counts by status, served by the stats endpoint.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct JobStats {
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub total: i64,
}

/// One page of jobs plus the pagination arithmetic the list endpoint needs.
#[derive(Debug)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    pub meta: PageMeta,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub current_page: i64,
    pub total_pages: i64,
    pub total_records: i64,
    pub limit: i64,
}

impl PageMeta {
    pub fn new(limit: i64, offset: i64, total_records: i64) -> Self {
        let current_page = offset / limit + 1;
        let total_pages = (total_records + limit - 1) / limit;
        Self {
            current_page,
            total_pages,
            total_records,
            limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_meta_arithmetic() {
        let meta = PageMeta::new(10, 0, 42);
        assert_eq!(meta.current_page, 1);
        assert_eq!(meta.total_pages, 5);

        let meta = PageMeta::new(10, 30, 42);
        assert_eq!(meta.current_page, 4);

        let meta = PageMeta::new(10, 0, 0);
        assert_eq!(meta.total_pages, 0);

        let meta = PageMeta::new(10, 0, 10);
        assert_eq!(meta.total_pages, 1);
    }
}
