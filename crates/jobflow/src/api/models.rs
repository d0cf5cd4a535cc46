use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::jobs::{Job, PageMeta};

/// Wire timestamps are second-resolution ISO-8601 UTC.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    #[serde(rename = "type", default)]
    pub job_type: String,
    #[serde(default)]
    pub payload: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub payload: String,
    pub status: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    pub retry_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id.to_string(),
            job_type: job.job_type,
            payload: job.payload,
            status: job.status,
            created_at: format_ts(job.created_at),
            completed_at: job.completed_at.map(format_ts),
            retry_count: job.retry_count,
            error_message: job.last_err,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub jobs: Vec<JobResponse>,
    pub meta: PageMeta,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}
