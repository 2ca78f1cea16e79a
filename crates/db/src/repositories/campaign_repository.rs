use crate::error::DbError;
use crate::models::{BatchJobRow, CampaignRow};
use crate::repositories::batch_job_repository::write_batch_job;
use chrono::Utc;
use hookline_core::{BatchJob, Campaign, CampaignStatus};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

const CAMPAIGN_COLUMNS: &str = r#"
    id, owner, status, current_phase, product_info, avatar_analysis, journey_map, objections,
    angles, hooks, scripts, hooks_batch_id, scripts_batch_id, batch_status, batch_created_at,
    batch_completed_at, batch_error, error_message, conversation_thread_id, resume_status,
    version, created_at, updated_at
"#;

#[derive(Clone)]
pub struct CampaignRepository {
    pool: SqlitePool,
}

impl CampaignRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn create(&self, campaign: &Campaign) -> Result<Campaign, DbError> {
        let row = CampaignRow::from(campaign);

        sqlx::query(&format!(
            "INSERT INTO campaigns ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            CAMPAIGN_COLUMNS
        ))
        .bind(&row.id)
        .bind(&row.owner)
        .bind(&row.status)
        .bind(&row.current_phase)
        .bind(&row.product_info)
        .bind(&row.avatar_analysis)
        .bind(&row.journey_map)
        .bind(&row.objections)
        .bind(&row.angles)
        .bind(&row.hooks)
        .bind(&row.scripts)
        .bind(&row.hooks_batch_id)
        .bind(&row.scripts_batch_id)
        .bind(&row.batch_status)
        .bind(row.batch_created_at)
        .bind(row.batch_completed_at)
        .bind(&row.batch_error)
        .bind(&row.error_message)
        .bind(&row.conversation_thread_id)
        .bind(&row.resume_status)
        .bind(row.version)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(campaign.clone())
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Campaign>, DbError> {
        let row: Option<CampaignRow> = sqlx::query_as(&format!(
            "SELECT {} FROM campaigns WHERE id = ?",
            CAMPAIGN_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_domain()).transpose()
    }

    pub async fn get(&self, id: Uuid) -> Result<Campaign, DbError> {
        self.find_by_id(id)
            .await?
            .ok_or(DbError::CampaignNotFound(id))
    }

    pub async fn find_all(&self) -> Result<Vec<Campaign>, DbError> {
        let rows: Vec<CampaignRow> = sqlx::query_as(&format!(
            "SELECT {} FROM campaigns ORDER BY created_at DESC",
            CAMPAIGN_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_domain()).collect()
    }

    pub async fn find_by_statuses(
        &self,
        statuses: &[CampaignStatus],
    ) -> Result<Vec<Campaign>, DbError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM campaigns WHERE status IN ({}) ORDER BY updated_at ASC",
            CAMPAIGN_COLUMNS, placeholders
        );

        let mut query = sqlx::query_as::<_, CampaignRow>(&sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(|r| r.into_domain()).collect()
    }

    /// Persist `campaign` if nobody else wrote it since it was read.
    ///
    /// Returns the stored record with its bumped version.
    pub async fn save(&self, campaign: &Campaign) -> Result<Campaign, DbError> {
        let mut conn = self.pool.acquire().await?;
        let saved = write_campaign(&mut conn, campaign).await?;
        Ok(saved)
    }

    /// Persist the campaign and a batch job in one transaction.
    pub async fn save_with_batch_job(
        &self,
        campaign: &Campaign,
        job: &BatchJob,
    ) -> Result<Campaign, DbError> {
        let mut tx = self.pool.begin().await?;
        let saved = write_campaign(&mut tx, campaign).await?;
        write_batch_job(&mut tx, &BatchJobRow::from(job)).await?;
        tx.commit().await?;
        Ok(saved)
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM campaigns WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

async fn write_campaign(conn: &mut SqliteConnection, campaign: &Campaign) -> Result<Campaign, DbError> {
    let mut next = campaign.clone();
    next.version = campaign.version + 1;
    next.updated_at = Utc::now();
    let row = CampaignRow::from(&next);

    let result = sqlx::query(
        r#"
        UPDATE campaigns
        SET owner = ?, status = ?, current_phase = ?, product_info = ?, avatar_analysis = ?,
            journey_map = ?, objections = ?, angles = ?, hooks = ?, scripts = ?,
            hooks_batch_id = ?, scripts_batch_id = ?, batch_status = ?, batch_created_at = ?,
            batch_completed_at = ?, batch_error = ?, error_message = ?, conversation_thread_id = ?,
            resume_status = ?, version = ?, updated_at = ?
        WHERE id = ? AND version = ?
        "#,
    )
    .bind(&row.owner)
    .bind(&row.status)
    .bind(&row.current_phase)
    .bind(&row.product_info)
    .bind(&row.avatar_analysis)
    .bind(&row.journey_map)
    .bind(&row.objections)
    .bind(&row.angles)
    .bind(&row.hooks)
    .bind(&row.scripts)
    .bind(&row.hooks_batch_id)
    .bind(&row.scripts_batch_id)
    .bind(&row.batch_status)
    .bind(row.batch_created_at)
    .bind(row.batch_completed_at)
    .bind(&row.batch_error)
    .bind(&row.error_message)
    .bind(&row.conversation_thread_id)
    .bind(&row.resume_status)
    .bind(row.version)
    .bind(row.updated_at)
    .bind(&row.id)
    .bind(campaign.version)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        let exists: Option<(i64,)> = sqlx::query_as("SELECT version FROM campaigns WHERE id = ?")
            .bind(&row.id)
            .fetch_optional(&mut *conn)
            .await?;

        return Err(match exists {
            Some(_) => DbError::Conflict {
                id: campaign.id,
                expected_version: campaign.version,
            },
            None => DbError::CampaignNotFound(campaign.id),
        });
    }

    Ok(next)
}
