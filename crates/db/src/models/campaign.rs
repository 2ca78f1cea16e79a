use hookline_core::{BatchStatus, Campaign, CampaignStatus, Phase};
use uuid::Uuid;

use super::{datetime_to_timestamp, from_json, optional_json, timestamp_to_datetime, to_json};
use crate::error::DbError;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CampaignRow {
    pub id: String,
    pub owner: String,
    pub status: String,
    pub current_phase: Option<String>,
    pub product_info: Option<String>,
    pub avatar_analysis: Option<String>,
    pub journey_map: Option<String>,
    pub objections: Option<String>,
    pub angles: String,
    pub hooks: String,
    pub scripts: String,
    pub hooks_batch_id: Option<String>,
    pub scripts_batch_id: Option<String>,
    pub batch_status: Option<String>,
    pub batch_created_at: Option<i64>,
    pub batch_completed_at: Option<i64>,
    pub batch_error: Option<String>,
    pub error_message: Option<String>,
    pub conversation_thread_id: Option<String>,
    pub resume_status: Option<String>,
    pub version: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl CampaignRow {
    pub fn into_domain(self) -> Result<Campaign, DbError> {
        let id = self.id.clone();
        Ok(Campaign {
            id: Uuid::parse_str(&self.id).unwrap_or_default(),
            owner: self.owner,
            status: CampaignStatus::parse(&self.status).unwrap_or_default(),
            current_phase: self.current_phase.as_deref().and_then(Phase::parse),
            product_info: optional_json(&id, "product_info", self.product_info)?,
            avatar_analysis: optional_json(&id, "avatar_analysis", self.avatar_analysis)?,
            journey_map: optional_json(&id, "journey_map", self.journey_map)?,
            objections: optional_json(&id, "objections", self.objections)?,
            angles: from_json(&id, "angles", &self.angles)?,
            hooks: from_json(&id, "hooks", &self.hooks)?,
            scripts: from_json(&id, "scripts", &self.scripts)?,
            hooks_batch_id: self.hooks_batch_id,
            scripts_batch_id: self.scripts_batch_id,
            batch_status: self.batch_status.as_deref().and_then(BatchStatus::parse),
            batch_created_at: self.batch_created_at.map(timestamp_to_datetime),
            batch_completed_at: self.batch_completed_at.map(timestamp_to_datetime),
            batch_error: self.batch_error,
            error_message: self.error_message,
            conversation_thread_id: self.conversation_thread_id,
            resume_status: self.resume_status.as_deref().and_then(CampaignStatus::parse),
            version: self.version,
            created_at: timestamp_to_datetime(self.created_at),
            updated_at: timestamp_to_datetime(self.updated_at),
        })
    }
}

impl From<&Campaign> for CampaignRow {
    fn from(campaign: &Campaign) -> Self {
        Self {
            id: campaign.id.to_string(),
            owner: campaign.owner.clone(),
            status: campaign.status.as_str().to_string(),
            current_phase: campaign.current_phase.map(|p| p.as_str().to_string()),
            product_info: campaign.product_info.as_ref().map(to_json),
            avatar_analysis: campaign.avatar_analysis.as_ref().map(to_json),
            journey_map: campaign.journey_map.as_ref().map(to_json),
            objections: campaign.objections.as_ref().map(to_json),
            angles: to_json(&campaign.angles),
            hooks: to_json(&campaign.hooks),
            scripts: to_json(&campaign.scripts),
            hooks_batch_id: campaign.hooks_batch_id.clone(),
            scripts_batch_id: campaign.scripts_batch_id.clone(),
            batch_status: campaign.batch_status.map(|s| s.as_str().to_string()),
            batch_created_at: campaign.batch_created_at.map(datetime_to_timestamp),
            batch_completed_at: campaign.batch_completed_at.map(datetime_to_timestamp),
            batch_error: campaign.batch_error.clone(),
            error_message: campaign.error_message.clone(),
            conversation_thread_id: campaign.conversation_thread_id.clone(),
            resume_status: campaign.resume_status.map(|s| s.as_str().to_string()),
            version: campaign.version,
            created_at: datetime_to_timestamp(campaign.created_at),
            updated_at: datetime_to_timestamp(campaign.updated_at),
        }
    }
}
