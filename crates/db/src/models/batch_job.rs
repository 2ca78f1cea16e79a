use hookline_core::{BatchJob, BatchKind, BatchStatus};
use uuid::Uuid;

use super::{datetime_to_timestamp, from_json, timestamp_to_datetime, to_json};
use crate::error::DbError;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BatchJobRow {
    pub id: String,
    pub campaign_id: String,
    pub kind: String,
    pub external_batch_id: Option<String>,
    pub status: String,
    pub request_count: i64,
    pub custom_ids: String,
    pub succeeded_count: i64,
    pub errored_count: i64,
    pub processing_count: i64,
    pub failed_custom_ids: String,
    pub attempt: i64,
    pub parent_job_id: Option<String>,
    pub active: bool,
    pub submitted_at: i64,
    pub completed_at: Option<i64>,
    pub harvested_at: Option<i64>,
    pub error: Option<String>,
}

impl BatchJobRow {
    pub fn into_domain(self) -> Result<BatchJob, DbError> {
        let id = self.id.clone();
        Ok(BatchJob {
            id: Uuid::parse_str(&self.id).unwrap_or_default(),
            campaign_id: Uuid::parse_str(&self.campaign_id).unwrap_or_default(),
            kind: BatchKind::parse(&self.kind).unwrap_or(BatchKind::Hooks),
            external_batch_id: self.external_batch_id,
            status: BatchStatus::parse(&self.status).unwrap_or_default(),
            request_count: self.request_count as u32,
            custom_ids: from_json(&id, "custom_ids", &self.custom_ids)?,
            succeeded_count: self.succeeded_count as u32,
            errored_count: self.errored_count as u32,
            processing_count: self.processing_count as u32,
            failed_custom_ids: from_json(&id, "failed_custom_ids", &self.failed_custom_ids)?,
            attempt: self.attempt as u32,
            parent_job_id: self.parent_job_id.and_then(|s| Uuid::parse_str(&s).ok()),
            active: self.active,
            submitted_at: timestamp_to_datetime(self.submitted_at),
            completed_at: self.completed_at.map(timestamp_to_datetime),
            harvested_at: self.harvested_at.map(timestamp_to_datetime),
            error: self.error,
        })
    }
}

impl From<&BatchJob> for BatchJobRow {
    fn from(job: &BatchJob) -> Self {
        Self {
            id: job.id.to_string(),
            campaign_id: job.campaign_id.to_string(),
            kind: job.kind.as_str().to_string(),
            external_batch_id: job.external_batch_id.clone(),
            status: job.status.as_str().to_string(),
            request_count: job.request_count as i64,
            custom_ids: to_json(&job.custom_ids),
            succeeded_count: job.succeeded_count as i64,
            errored_count: job.errored_count as i64,
            processing_count: job.processing_count as i64,
            failed_custom_ids: to_json(&job.failed_custom_ids),
            attempt: job.attempt as i64,
            parent_job_id: job.parent_job_id.map(|id| id.to_string()),
            active: job.active,
            submitted_at: datetime_to_timestamp(job.submitted_at),
            completed_at: job.completed_at.map(datetime_to_timestamp),
            harvested_at: job.harvested_at.map(datetime_to_timestamp),
            error: job.error.clone(),
        }
    }
}
