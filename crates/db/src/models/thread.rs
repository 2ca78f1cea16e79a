use hookline_core::ConversationThread;
use uuid::Uuid;

use super::{datetime_to_timestamp, from_json, timestamp_to_datetime, to_json};
use crate::error::DbError;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConversationThreadRow {
    pub campaign_id: String,
    pub handle: String,
    pub snapshot: String,
    pub context_version: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ConversationThreadRow {
    pub fn into_domain(self) -> Result<ConversationThread, DbError> {
        Ok(ConversationThread {
            campaign_id: Uuid::parse_str(&self.campaign_id).unwrap_or_default(),
            snapshot: from_json(&self.campaign_id, "snapshot", &self.snapshot)?,
            handle: self.handle,
            context_version: self.context_version as u32,
            created_at: timestamp_to_datetime(self.created_at),
            updated_at: timestamp_to_datetime(self.updated_at),
        })
    }
}

impl From<&ConversationThread> for ConversationThreadRow {
    fn from(thread: &ConversationThread) -> Self {
        Self {
            campaign_id: thread.campaign_id.to_string(),
            handle: thread.handle.clone(),
            snapshot: to_json(&thread.snapshot),
            context_version: thread.context_version as i64,
            created_at: datetime_to_timestamp(thread.created_at),
            updated_at: datetime_to_timestamp(thread.updated_at),
        }
    }
}
