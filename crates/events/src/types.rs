//! Pipeline event types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all events with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event: Event,
}

impl EventEnvelope {
    pub fn new(event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "campaign.created")]
    CampaignCreated { campaign_id: Uuid, owner: String },

    #[serde(rename = "campaign.status_changed")]
    StatusChanged {
        campaign_id: Uuid,
        from_status: String,
        to_status: String,
    },

    /// A single-shot phase committed its output.
    #[serde(rename = "phase.completed")]
    PhaseCompleted { campaign_id: Uuid, phase: String },

    #[serde(rename = "batch.submitted")]
    BatchSubmitted {
        campaign_id: Uuid,
        kind: String,
        batch_id: String,
        request_count: u32,
        attempt: u32,
    },

    #[serde(rename = "batch.progress")]
    BatchProgress {
        campaign_id: Uuid,
        batch_id: String,
        status: String,
        succeeded: u32,
        errored: u32,
        processing: u32,
    },

    #[serde(rename = "batch.harvested")]
    BatchHarvested {
        campaign_id: Uuid,
        kind: String,
        batch_id: String,
        added: usize,
        failed: usize,
    },

    #[serde(rename = "campaign.failed")]
    CampaignFailed { campaign_id: Uuid, message: String },
}

impl Event {
    pub fn campaign_id(&self) -> Uuid {
        match self {
            Event::CampaignCreated { campaign_id, .. }
            | Event::StatusChanged { campaign_id, .. }
            | Event::PhaseCompleted { campaign_id, .. }
            | Event::BatchSubmitted { campaign_id, .. }
            | Event::BatchProgress { campaign_id, .. }
            | Event::BatchHarvested { campaign_id, .. }
            | Event::CampaignFailed { campaign_id, .. } => *campaign_id,
        }
    }

    /// The dotted name used as the serialized `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            Event::CampaignCreated { .. } => "campaign.created",
            Event::StatusChanged { .. } => "campaign.status_changed",
            Event::PhaseCompleted { .. } => "phase.completed",
            Event::BatchSubmitted { .. } => "batch.submitted",
            Event::BatchProgress { .. } => "batch.progress",
            Event::BatchHarvested { .. } => "batch.harvested",
            Event::CampaignFailed { .. } => "campaign.failed",
        }
    }
}
