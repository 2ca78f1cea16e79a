use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Provider conversation handle for a campaign plus the last context bundle
/// sent through it. The campaign remains the source of truth; the snapshot is
/// only a cache.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConversationThread {
    pub campaign_id: Uuid,
    pub handle: String,
    #[schema(value_type = Object)]
    pub snapshot: serde_json::Value,
    pub context_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationThread {
    pub fn new(campaign_id: Uuid, handle: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            campaign_id,
            handle: handle.into(),
            snapshot: serde_json::Value::Null,
            context_version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_snapshot(mut self, snapshot: serde_json::Value, context_version: u32) -> Self {
        self.snapshot = snapshot;
        self.context_version = context_version;
        self.updated_at = Utc::now();
        self
    }
}
