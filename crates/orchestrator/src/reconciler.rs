//! Idempotent reconciliation of a campaign against its in-flight batch.

use db::CampaignRepository;
use hookline_core::{BatchJob, BatchKind, Campaign, CampaignStatus};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::assembler::missing_custom_ids;
use crate::batch::{BatchOrchestrator, BatchPoll, HarvestReport};
use crate::error::{OrchestratorError, Result};
use crate::notify::Notifier;
use crate::state_machine::CampaignStateMachine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum ReconcileAction {
    /// Nothing to do for the campaign's current status.
    Idle,
    /// The batch is still running at the provider.
    InFlight,
    Harvested,
    /// The batch was lost or stalled and the campaign was failed.
    Failed,
    /// Missing items were resubmitted as a follow-up batch.
    Resubmitted,
    /// A claim that never reached the provider was cleared, so the batch can
    /// be submitted again.
    Released,
}

#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ReconcileOutcome {
    pub campaign: Campaign,
    pub action: ReconcileAction,
    pub poll: Option<BatchPoll>,
    pub harvest: Option<HarvestReport>,
    pub resubmitted: Option<BatchJob>,
}

impl ReconcileOutcome {
    fn new(campaign: Campaign, action: ReconcileAction) -> Self {
        Self {
            campaign,
            action,
            poll: None,
            harvest: None,
            resubmitted: None,
        }
    }
}

#[derive(Clone)]
pub struct Reconciler {
    campaigns: CampaignRepository,
    batches: BatchOrchestrator,
    notifier: Notifier,
}

impl Reconciler {
    pub fn new(campaigns: CampaignRepository, batches: BatchOrchestrator) -> Self {
        Self {
            campaigns,
            batches,
            notifier: Notifier::default(),
        }
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Statuses the background worker should visit: campaigns awaiting a
    /// batch, and those a submission may start from, which can hold a claim
    /// left by a crashed submit.
    pub fn watched_statuses(&self) -> Vec<CampaignStatus> {
        vec![
            CampaignStatus::HooksBatchSubmitted,
            CampaignStatus::ScriptsBatchSubmitted,
            CampaignStatus::AnglesGenerated,
            CampaignStatus::HooksBatchCompleted,
            CampaignStatus::ScriptsBatchCompleted,
            CampaignStatus::PartiallyCompleted,
        ]
    }

    /// Poll, harvest and commit whatever the campaign's batch state allows.
    ///
    /// Safe to call any number of times; paused, draft, failed and completed
    /// campaigns are returned untouched.
    pub async fn check_and_process_batch(&self, campaign_id: Uuid) -> Result<ReconcileOutcome> {
        let campaign = self.campaigns.get(campaign_id).await?;
        if matches!(
            campaign.status,
            CampaignStatus::Draft
                | CampaignStatus::Paused
                | CampaignStatus::Failed
                | CampaignStatus::Completed
        ) {
            debug!(campaign_id = %campaign_id, status = %campaign.status, "Nothing to reconcile");
            return Ok(ReconcileOutcome::new(campaign, ReconcileAction::Idle));
        }

        let mut poll = None;
        let mut harvest = None;
        let mut released = 0;
        if let Some(kind) = campaign.status.awaiting_batch() {
            let Some(job) = self.batches.jobs().find_active(campaign_id, kind).await? else {
                return self.fail_orphaned(campaign, kind).await;
            };

            let polled = self.batches.poll_batch(&job).await?;
            if let Some(reason) = polled.error.clone() {
                let campaign = self.batches.abandon(&job, &reason).await?;
                return Ok(ReconcileOutcome {
                    poll: Some(polled),
                    ..ReconcileOutcome::new(campaign, ReconcileAction::Failed)
                });
            }

            if !polled.is_harvestable() {
                self.batches.record_progress(&job, &polled).await?;
                let campaign = self.campaigns.get(campaign_id).await?;
                return Ok(ReconcileOutcome {
                    poll: Some(polled),
                    ..ReconcileOutcome::new(campaign, ReconcileAction::InFlight)
                });
            }

            match self.batches.harvest(job.id).await {
                Ok(report) => harvest = Some(report),
                Err(OrchestratorError::BatchNotFound(_)) => {
                    let campaign = self.campaigns.get(campaign_id).await?;
                    return Ok(ReconcileOutcome {
                        poll: Some(polled),
                        ..ReconcileOutcome::new(campaign, ReconcileAction::Failed)
                    });
                }
                Err(e) => return Err(e),
            }
            poll = Some(polled);
        } else {
            released = self.batches.release_stale_claims(campaign_id).await?;
        }

        let campaign = self.campaigns.get(campaign_id).await?;
        let action = if harvest.is_some() {
            ReconcileAction::Harvested
        } else if released > 0 {
            info!(campaign_id = %campaign_id, released, "Released stale batch claims");
            ReconcileAction::Released
        } else {
            ReconcileAction::Idle
        };

        let resubmitted = self.resubmit_missing(&campaign).await?;
        let (campaign, action) = match &resubmitted {
            Some(_) => (
                self.campaigns.get(campaign_id).await?,
                ReconcileAction::Resubmitted,
            ),
            None => (campaign, action),
        };

        Ok(ReconcileOutcome {
            campaign,
            action,
            poll,
            harvest,
            resubmitted,
        })
    }

    async fn fail_orphaned(&self, campaign: Campaign, kind: BatchKind) -> Result<ReconcileOutcome> {
        warn!(campaign_id = %campaign.id, kind = %kind, "Campaign awaits a batch with no active job");
        let failed = CampaignStateMachine::fail_batch(
            &campaign,
            kind,
            format!("no active {} batch job found", kind),
        )?;
        let saved = self.campaigns.save(&failed).await?;
        self.notifier.status_changed(&campaign, &saved);
        Ok(ReconcileOutcome::new(saved, ReconcileAction::Failed))
    }

    async fn resubmit_missing(&self, campaign: &Campaign) -> Result<Option<BatchJob>> {
        let config = self.batches.config();
        if !config.auto_resubmit_missing {
            return Ok(None);
        }
        if !matches!(
            campaign.status,
            CampaignStatus::PartiallyCompleted
                | CampaignStatus::HooksBatchCompleted
                | CampaignStatus::ScriptsBatchCompleted
        ) {
            return Ok(None);
        }
        let Some(kind) = campaign.current_phase.and_then(|p| p.batch_kind()) else {
            return Ok(None);
        };
        if missing_custom_ids(campaign, kind).is_empty() {
            return Ok(None);
        }

        let used = self
            .batches
            .jobs()
            .find_latest(campaign.id, kind)
            .await?
            .map(|job| job.attempt.saturating_sub(1))
            .unwrap_or(0);
        if used >= config.max_resubmissions {
            debug!(campaign_id = %campaign.id, kind = %kind, used, "Resubmission budget exhausted");
            return Ok(None);
        }

        info!(campaign_id = %campaign.id, kind = %kind, "Auto-resubmitting missing items");
        let outcome = self.batches.retry_missing(campaign.id, kind).await?;
        Ok(outcome.created.then_some(outcome.job))
    }
}
