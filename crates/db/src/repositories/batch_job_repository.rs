use crate::error::{is_unique_violation, DbError};
use crate::models::BatchJobRow;
use hookline_core::{BatchJob, BatchKind};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

const BATCH_JOB_COLUMNS: &str = r#"
    id, campaign_id, kind, external_batch_id, status, request_count, custom_ids,
    succeeded_count, errored_count, processing_count, failed_custom_ids, attempt,
    parent_job_id, active, submitted_at, completed_at, harvested_at, error
"#;

/// Result of trying to reserve the active slot for a (campaign, kind).
#[derive(Debug, Clone)]
pub enum Claim {
    /// The new job now owns the slot.
    Claimed(BatchJob),
    /// Another job already holds it.
    Existing(BatchJob),
}

#[derive(Clone)]
pub struct BatchJobRepository {
    pool: SqlitePool,
}

impl BatchJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert `job` as the active job for its campaign and kind.
    ///
    /// The partial unique index on `(campaign_id, kind) WHERE active = 1`
    /// decides races; the loser gets the winner's record back.
    pub async fn claim(&self, job: &BatchJob) -> Result<Claim, DbError> {
        let row = BatchJobRow::from(job);

        let inserted = sqlx::query(&format!(
            "INSERT INTO batch_jobs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            BATCH_JOB_COLUMNS
        ))
        .bind(&row.id)
        .bind(&row.campaign_id)
        .bind(&row.kind)
        .bind(&row.external_batch_id)
        .bind(&row.status)
        .bind(row.request_count)
        .bind(&row.custom_ids)
        .bind(row.succeeded_count)
        .bind(row.errored_count)
        .bind(row.processing_count)
        .bind(&row.failed_custom_ids)
        .bind(row.attempt)
        .bind(&row.parent_job_id)
        .bind(row.active)
        .bind(row.submitted_at)
        .bind(row.completed_at)
        .bind(row.harvested_at)
        .bind(&row.error)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(Claim::Claimed(job.clone())),
            Err(e) if is_unique_violation(&e) => {
                debug!(
                    campaign_id = %job.campaign_id,
                    kind = %job.kind,
                    "Active batch slot already taken"
                );
                self.find_active(job.campaign_id, job.kind)
                    .await?
                    .map(Claim::Existing)
                    .ok_or(DbError::Sqlx(e))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<BatchJob>, DbError> {
        let row: Option<BatchJobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM batch_jobs WHERE id = ?",
            BATCH_JOB_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_domain()).transpose()
    }

    pub async fn find_by_external_id(
        &self,
        external_batch_id: &str,
    ) -> Result<Option<BatchJob>, DbError> {
        let row: Option<BatchJobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM batch_jobs WHERE external_batch_id = ?",
            BATCH_JOB_COLUMNS
        ))
        .bind(external_batch_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_domain()).transpose()
    }

    pub async fn find_active(
        &self,
        campaign_id: Uuid,
        kind: BatchKind,
    ) -> Result<Option<BatchJob>, DbError> {
        let row: Option<BatchJobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM batch_jobs WHERE campaign_id = ? AND kind = ? AND active = 1",
            BATCH_JOB_COLUMNS
        ))
        .bind(campaign_id.to_string())
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_domain()).transpose()
    }

    /// Most recently submitted job of `kind`, active or not.
    pub async fn find_latest(
        &self,
        campaign_id: Uuid,
        kind: BatchKind,
    ) -> Result<Option<BatchJob>, DbError> {
        let row: Option<BatchJobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM batch_jobs WHERE campaign_id = ? AND kind = ? ORDER BY submitted_at DESC, attempt DESC LIMIT 1",
            BATCH_JOB_COLUMNS
        ))
        .bind(campaign_id.to_string())
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_domain()).transpose()
    }

    pub async fn list_for_campaign(&self, campaign_id: Uuid) -> Result<Vec<BatchJob>, DbError> {
        let rows: Vec<BatchJobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM batch_jobs WHERE campaign_id = ? ORDER BY submitted_at ASC, attempt ASC",
            BATCH_JOB_COLUMNS
        ))
        .bind(campaign_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_domain()).collect()
    }

    pub async fn save(&self, job: &BatchJob) -> Result<BatchJob, DbError> {
        let mut conn = self.pool.acquire().await?;
        write_batch_job(&mut conn, &BatchJobRow::from(job)).await?;
        Ok(job.clone())
    }

    /// Release a claim whose external submission never happened.
    pub async fn delete(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM batch_jobs WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

pub(crate) async fn write_batch_job(
    conn: &mut SqliteConnection,
    row: &BatchJobRow,
) -> Result<(), DbError> {
    let result = sqlx::query(
        r#"
        UPDATE batch_jobs
        SET external_batch_id = ?, status = ?, succeeded_count = ?, errored_count = ?,
            processing_count = ?, failed_custom_ids = ?, active = ?, completed_at = ?,
            harvested_at = ?, error = ?
        WHERE id = ?
        "#,
    )
    .bind(&row.external_batch_id)
    .bind(&row.status)
    .bind(row.succeeded_count)
    .bind(row.errored_count)
    .bind(row.processing_count)
    .bind(&row.failed_custom_ids)
    .bind(row.active)
    .bind(row.completed_at)
    .bind(row.harvested_at)
    .bind(&row.error)
    .bind(&row.id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::BatchJobNotFound(
            Uuid::parse_str(&row.id).unwrap_or_default(),
        ));
    }

    Ok(())
}
