use crate::error::DbError;
use crate::models::ConversationThreadRow;
use hookline_core::ConversationThread;
use sqlx::SqlitePool;
use uuid::Uuid;

#[derive(Clone)]
pub struct ConversationThreadRepository {
    pool: SqlitePool,
}

impl ConversationThreadRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_by_campaign(
        &self,
        campaign_id: Uuid,
    ) -> Result<Option<ConversationThread>, DbError> {
        let row: Option<ConversationThreadRow> = sqlx::query_as(
            r#"
            SELECT campaign_id, handle, snapshot, context_version, created_at, updated_at
            FROM conversation_threads
            WHERE campaign_id = ?
            "#,
        )
        .bind(campaign_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_domain()).transpose()
    }

    pub async fn upsert(&self, thread: &ConversationThread) -> Result<(), DbError> {
        let row = ConversationThreadRow::from(thread);

        sqlx::query(
            r#"
            INSERT INTO conversation_threads (campaign_id, handle, snapshot, context_version, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(campaign_id) DO UPDATE SET
                handle = excluded.handle,
                snapshot = excluded.snapshot,
                context_version = excluded.context_version,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&row.campaign_id)
        .bind(&row.handle)
        .bind(&row.snapshot)
        .bind(row.context_version)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::test_support::setup_test_db;
    use crate::CampaignRepository;
    use hookline_core::Campaign;
    use serde_json::json;

    #[tokio::test]
    async fn test_upsert_replaces_handle() {
        let (pool, _dir) = setup_test_db().await;
        let campaign = CampaignRepository::new(pool.clone())
            .create(&Campaign::new("owner"))
            .await
            .unwrap();
        let repo = ConversationThreadRepository::new(pool);

        assert!(repo.find_by_campaign(campaign.id).await.unwrap().is_none());

        repo.upsert(&ConversationThread::new(campaign.id, "thread-a"))
            .await
            .unwrap();
        let replaced = ConversationThread::new(campaign.id, "thread-b")
            .with_snapshot(json!({"version": 1}), 3);
        repo.upsert(&replaced).await.unwrap();

        let found = repo.find_by_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(found.handle, "thread-b");
        assert_eq!(found.context_version, 3);
        assert_eq!(found.snapshot, json!({"version": 1}));
    }
}
