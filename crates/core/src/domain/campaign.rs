use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use uuid::Uuid;

use super::batch::{BatchKind, BatchStatus};
use super::content::{Hook, MarketingAngle, Script};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    #[default]
    Draft,
    ProductInfoReady,
    AnglesGenerated,
    HooksBatchSubmitted,
    HooksBatchCompleted,
    ScriptsBatchSubmitted,
    ScriptsBatchCompleted,
    Completed,
    Failed,
    PartiallyCompleted,
    Paused,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::ProductInfoReady => "product_info_ready",
            Self::AnglesGenerated => "angles_generated",
            Self::HooksBatchSubmitted => "hooks_batch_submitted",
            Self::HooksBatchCompleted => "hooks_batch_completed",
            Self::ScriptsBatchSubmitted => "scripts_batch_submitted",
            Self::ScriptsBatchCompleted => "scripts_batch_completed",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::PartiallyCompleted => "partially_completed",
            Self::Paused => "paused",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "product_info_ready" => Some(Self::ProductInfoReady),
            "angles_generated" => Some(Self::AnglesGenerated),
            "hooks_batch_submitted" => Some(Self::HooksBatchSubmitted),
            "hooks_batch_completed" => Some(Self::HooksBatchCompleted),
            "scripts_batch_submitted" => Some(Self::ScriptsBatchSubmitted),
            "scripts_batch_completed" => Some(Self::ScriptsBatchCompleted),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "partially_completed" => Some(Self::PartiallyCompleted),
            "paused" => Some(Self::Paused),
            _ => None,
        }
    }

    /// Side states park the campaign; `resume_status` records where it was.
    pub fn is_side_state(&self) -> bool {
        matches!(self, Self::Failed | Self::Paused)
    }

    /// The status a campaign sits in while a batch of `kind` is in flight.
    pub fn submitted_for(kind: BatchKind) -> Self {
        match kind {
            BatchKind::Hooks => Self::HooksBatchSubmitted,
            BatchKind::Scripts => Self::ScriptsBatchSubmitted,
        }
    }

    pub fn completed_for(kind: BatchKind) -> Self {
        match kind {
            BatchKind::Hooks => Self::HooksBatchCompleted,
            BatchKind::Scripts => Self::ScriptsBatchCompleted,
        }
    }

    /// Which batch kind, if any, this status is waiting on.
    pub fn awaiting_batch(&self) -> Option<BatchKind> {
        match self {
            Self::HooksBatchSubmitted => Some(BatchKind::Hooks),
            Self::ScriptsBatchSubmitted => Some(BatchKind::Scripts),
            _ => None,
        }
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pipeline stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Avatar,
    Journey,
    Objections,
    Angles,
    Hooks,
    Scripts,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Avatar => "avatar",
            Self::Journey => "journey",
            Self::Objections => "objections",
            Self::Angles => "angles",
            Self::Hooks => "hooks",
            Self::Scripts => "scripts",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "avatar" => Some(Self::Avatar),
            "journey" => Some(Self::Journey),
            "objections" => Some(Self::Objections),
            "angles" => Some(Self::Angles),
            "hooks" => Some(Self::Hooks),
            "scripts" => Some(Self::Scripts),
            _ => None,
        }
    }

    /// Phases run synchronously through the phase executor.
    pub fn is_single_shot(&self) -> bool {
        matches!(
            self,
            Self::Avatar | Self::Journey | Self::Objections | Self::Angles
        )
    }

    pub fn batch_kind(&self) -> Option<BatchKind> {
        match self {
            Self::Hooks => Some(BatchKind::Hooks),
            Self::Scripts => Some(BatchKind::Scripts),
            _ => None,
        }
    }

    pub fn previous(&self) -> Option<Self> {
        match self {
            Self::Avatar => None,
            Self::Journey => Some(Self::Avatar),
            Self::Objections => Some(Self::Journey),
            Self::Angles => Some(Self::Objections),
            Self::Hooks => Some(Self::Angles),
            Self::Scripts => Some(Self::Hooks),
        }
    }
}

impl From<BatchKind> for Phase {
    fn from(kind: BatchKind) -> Self {
        match kind {
            BatchKind::Hooks => Self::Hooks,
            BatchKind::Scripts => Self::Scripts,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Campaign {
    pub id: Uuid,
    pub owner: String,
    pub status: CampaignStatus,
    pub current_phase: Option<Phase>,
    #[schema(value_type = Option<Object>)]
    pub product_info: Option<serde_json::Value>,
    #[schema(value_type = Option<Object>)]
    pub avatar_analysis: Option<serde_json::Value>,
    #[schema(value_type = Option<Object>)]
    pub journey_map: Option<serde_json::Value>,
    #[schema(value_type = Option<Object>)]
    pub objections: Option<serde_json::Value>,
    pub angles: Vec<MarketingAngle>,
    pub hooks: Vec<Hook>,
    pub scripts: Vec<Script>,
    pub hooks_batch_id: Option<String>,
    pub scripts_batch_id: Option<String>,
    pub batch_status: Option<BatchStatus>,
    pub batch_created_at: Option<DateTime<Utc>>,
    pub batch_completed_at: Option<DateTime<Utc>>,
    pub batch_error: Option<String>,
    pub error_message: Option<String>,
    pub conversation_thread_id: Option<String>,
    pub resume_status: Option<CampaignStatus>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn new(owner: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            status: CampaignStatus::default(),
            current_phase: None,
            product_info: None,
            avatar_analysis: None,
            journey_map: None,
            objections: None,
            angles: Vec::new(),
            hooks: Vec::new(),
            scripts: Vec::new(),
            hooks_batch_id: None,
            scripts_batch_id: None,
            batch_status: None,
            batch_created_at: None,
            batch_completed_at: None,
            batch_error: None,
            error_message: None,
            conversation_thread_id: None,
            resume_status: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// The status a retry or resume continues from.
    pub fn effective_status(&self) -> CampaignStatus {
        if self.status.is_side_state() {
            self.resume_status.unwrap_or(CampaignStatus::Draft)
        } else {
            self.status
        }
    }

    pub fn angle(&self, id: &str) -> Option<&MarketingAngle> {
        self.angles.iter().find(|a| a.id == id)
    }

    pub fn hook(&self, id: &str) -> Option<&Hook> {
        self.hooks.iter().find(|h| h.id == id)
    }

    pub fn hooks_by_angle(&self) -> BTreeMap<&str, Vec<&Hook>> {
        let mut grouped: BTreeMap<&str, Vec<&Hook>> = BTreeMap::new();
        for hook in &self.hooks {
            grouped.entry(hook.angle_id.as_str()).or_default().push(hook);
        }
        grouped
    }

    pub fn scripts_for_hook<'a>(
        &'a self,
        hook_id: &'a str,
    ) -> impl Iterator<Item = &'a Script> + 'a {
        self.scripts.iter().filter(move |s| s.hook_id == hook_id)
    }

    pub fn batch_id(&self, kind: BatchKind) -> Option<&str> {
        match kind {
            BatchKind::Hooks => self.hooks_batch_id.as_deref(),
            BatchKind::Scripts => self.scripts_batch_id.as_deref(),
        }
    }

    /// Whether the output a phase produces has been committed.
    pub fn has_output(&self, phase: Phase) -> bool {
        match phase {
            Phase::Avatar => self.avatar_analysis.is_some(),
            Phase::Journey => self.journey_map.is_some(),
            Phase::Objections => self.objections.is_some(),
            Phase::Angles => !self.angles.is_empty(),
            Phase::Hooks => !self.hooks.is_empty(),
            Phase::Scripts => !self.scripts.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateCampaignRequest {
    pub owner: String,
    #[schema(value_type = Object)]
    pub product_info: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::content::AngleType;

    #[test]
    fn test_campaign_creation() {
        let campaign = Campaign::new("owner-1");

        assert_eq!(campaign.owner, "owner-1");
        assert_eq!(campaign.status, CampaignStatus::Draft);
        assert!(campaign.current_phase.is_none());
        assert_eq!(campaign.version, 0);
        assert!(campaign.angles.is_empty());
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(
            CampaignStatus::parse("hooks_batch_submitted"),
            Some(CampaignStatus::HooksBatchSubmitted)
        );
        assert_eq!(CampaignStatus::parse("invalid"), None);
        assert_eq!(
            CampaignStatus::PartiallyCompleted.as_str(),
            "partially_completed"
        );
    }

    #[test]
    fn test_effective_status_uses_resume_status() {
        let mut campaign = Campaign::new("owner");
        campaign.status = CampaignStatus::Failed;
        campaign.resume_status = Some(CampaignStatus::AnglesGenerated);

        assert_eq!(campaign.effective_status(), CampaignStatus::AnglesGenerated);
    }

    #[test]
    fn test_hooks_grouped_by_angle() {
        let mut campaign = Campaign::new("owner");
        campaign.angles = vec![
            MarketingAngle::new(AngleType::Positive, 1, "Status", "A"),
            MarketingAngle::new(AngleType::Positive, 2, "Ease", "B"),
        ];
        campaign.hooks = vec![
            Hook::new("pos-1", "h1", "question", "Q?"),
            Hook::new("pos-2", "h1", "question", "Q2?"),
            Hook::new("pos-1", "h2", "stat", "90%"),
        ];

        let grouped = campaign.hooks_by_angle();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["pos-1"].len(), 2);
        assert_eq!(grouped["pos-2"].len(), 1);
    }

    #[test]
    fn test_phase_order() {
        assert_eq!(Phase::Angles.previous(), Some(Phase::Objections));
        assert_eq!(Phase::Avatar.previous(), None);
        assert!(Phase::Objections.is_single_shot());
        assert!(!Phase::Hooks.is_single_shot());
        assert_eq!(Phase::Scripts.batch_kind(), Some(BatchKind::Scripts));
    }

    #[test]
    fn test_awaiting_batch() {
        assert_eq!(
            CampaignStatus::HooksBatchSubmitted.awaiting_batch(),
            Some(BatchKind::Hooks)
        );
        assert_eq!(CampaignStatus::HooksBatchCompleted.awaiting_batch(), None);
    }
}
