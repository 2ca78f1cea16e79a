use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// The two fan-out phases that run as provider-side batch jobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    Hooks,
    Scripts,
}

impl BatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hooks => "hooks",
            Self::Scripts => "scripts",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hooks" => Some(Self::Hooks),
            "scripts" => Some(Self::Scripts),
            _ => None,
        }
    }

    /// Custom id for the sub-request whose parent is `parent_id`
    /// (an angle id for hooks, a hook id for scripts).
    pub fn custom_id(&self, parent_id: &str) -> String {
        format!("{}-{}", self.as_str(), parent_id)
    }

    /// Recover the parent id from a custom id produced by [`BatchKind::custom_id`].
    pub fn parent_id<'a>(&self, custom_id: &'a str) -> Option<&'a str> {
        custom_id
            .strip_prefix(self.as_str())
            .and_then(|rest| rest.strip_prefix('-'))
            .filter(|parent| !parent.is_empty())
    }
}

impl std::fmt::Display for BatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    #[default]
    #[serde(alias = "pending")]
    Submitted,
    Processing,
    Completed,
    PartiallyCompleted,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::PartiallyCompleted => "partially_completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "submitted" | "pending" => Some(Self::Submitted),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "partially_completed" => Some(Self::PartiallyCompleted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::PartiallyCompleted | Self::Failed
        )
    }
}

/// One provider-side batch submission for a campaign.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BatchJob {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub kind: BatchKind,
    /// Set once the provider accepted the submission.
    pub external_batch_id: Option<String>,
    pub status: BatchStatus,
    pub request_count: u32,
    pub custom_ids: Vec<String>,
    pub succeeded_count: u32,
    pub errored_count: u32,
    pub processing_count: u32,
    pub failed_custom_ids: Vec<String>,
    pub attempt: u32,
    pub parent_job_id: Option<Uuid>,
    /// True while the job is in flight or awaiting harvest.
    pub active: bool,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub harvested_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl BatchJob {
    pub fn new(campaign_id: Uuid, kind: BatchKind, custom_ids: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            kind,
            external_batch_id: None,
            status: BatchStatus::Submitted,
            request_count: custom_ids.len() as u32,
            processing_count: custom_ids.len() as u32,
            custom_ids,
            succeeded_count: 0,
            errored_count: 0,
            failed_custom_ids: Vec::new(),
            attempt: 1,
            parent_job_id: None,
            active: true,
            submitted_at: Utc::now(),
            completed_at: None,
            harvested_at: None,
            error: None,
        }
    }

    /// A follow-up job scoped to the items `parent` failed to produce.
    pub fn retry_of(parent: &BatchJob, custom_ids: Vec<String>) -> Self {
        let mut job = Self::new(parent.campaign_id, parent.kind, custom_ids);
        job.attempt = parent.attempt + 1;
        job.parent_job_id = Some(parent.id);
        job
    }

    pub fn is_harvested(&self) -> bool {
        self.harvested_at.is_some()
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = BatchStatus::Failed;
        self.error = Some(error.into());
        self.active = false;
        self.completed_at.get_or_insert_with(Utc::now);
    }
}
