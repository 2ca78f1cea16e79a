//! Fan-out phases executed as provider-side batch jobs.

mod locks;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use db::{BatchJobRepository, CampaignRepository, Claim, DbError};
use events::Event;
use hookline_core::{BatchJob, BatchKind, BatchStatus, Campaign, CampaignStatus, Phase};
use provider::{with_retry, with_retry_when, BatchRequest, Provider, ProviderError};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

pub use locks::{BatchLockGuard, BatchLocks};

const STALE_CLAIM_REASON: &str = "submission never reached the provider";

fn job_age(job: &BatchJob) -> std::time::Duration {
    (Utc::now() - job.submitted_at).to_std().unwrap_or_default()
}

use crate::assembler::{
    expected_custom_ids, is_valid_custom_id, missing_custom_ids, ResultAssembler, SkippedItem,
};
use crate::config::PipelineConfig;
use crate::context::ContextBundle;
use crate::error::{OrchestratorError, Result};
use crate::notify::Notifier;
use crate::prompts::phase_instructions;
use crate::state_machine::{CampaignStateMachine, HarvestDecision, PhaseOutput};

/// Read-only view of a batch job's progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct BatchPoll {
    pub status: BatchStatus,
    pub succeeded_count: u32,
    pub errored_count: u32,
    pub processing_count: u32,
    /// Set when the job is unrecoverable: vanished, timed out, or never
    /// reached the provider.
    pub error: Option<String>,
}

impl BatchPoll {
    fn from_job(job: &BatchJob) -> Self {
        Self {
            status: job.status,
            succeeded_count: job.succeeded_count,
            errored_count: job.errored_count,
            processing_count: job.processing_count,
            error: job.error.clone(),
        }
    }

    fn failed(job: &BatchJob, error: impl Into<String>) -> Self {
        Self {
            status: BatchStatus::Failed,
            error: Some(error.into()),
            ..Self::from_job(job)
        }
    }

    /// Terminal and with results worth fetching.
    pub fn is_harvestable(&self) -> bool {
        self.status.is_terminal() && self.error.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub job: BatchJob,
    /// False when an existing job was returned instead of submitting.
    pub created: bool,
}

#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct HarvestReport {
    pub job_id: Uuid,
    pub batch_id: Option<String>,
    pub kind: BatchKind,
    pub batch_status: BatchStatus,
    pub added: usize,
    pub unchanged: usize,
    pub skipped_with_reason: Vec<SkippedItem>,
    pub succeeded_custom_ids: Vec<String>,
    /// Errored, malformed, or absent from the results.
    pub failed_custom_ids: Vec<String>,
    /// Share of parents with output after the merge.
    pub coverage: f64,
    pub campaign_status: CampaignStatus,
    pub already_harvested: bool,
}

impl HarvestReport {
    pub fn ensure_complete(&self) -> Result<()> {
        if self.failed_custom_ids.is_empty() {
            Ok(())
        } else {
            Err(OrchestratorError::PartialBatchFailure {
                kind: self.kind,
                failed_custom_ids: self.failed_custom_ids.clone(),
            })
        }
    }
}

#[derive(Clone)]
pub struct BatchOrchestrator {
    provider: Arc<dyn Provider>,
    campaigns: CampaignRepository,
    jobs: BatchJobRepository,
    config: PipelineConfig,
    locks: BatchLocks,
    notifier: Notifier,
}

impl BatchOrchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        campaigns: CampaignRepository,
        jobs: BatchJobRepository,
        config: PipelineConfig,
    ) -> Self {
        Self {
            provider,
            campaigns,
            jobs,
            config,
            locks: BatchLocks::new(),
            notifier: Notifier::default(),
        }
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn jobs(&self) -> &BatchJobRepository {
        &self.jobs
    }

    /// Submit one sub-request per parent.
    ///
    /// Returns the existing job instead when one of this kind is active, or
    /// when an earlier submission already produced output.
    pub async fn submit_batch(&self, campaign_id: Uuid, kind: BatchKind) -> Result<SubmitOutcome> {
        let _guard = self.locks.acquire(campaign_id, kind).await;

        if let Some(active) = self.live_active_job(campaign_id, kind).await? {
            info!(campaign_id = %campaign_id, kind = %kind, job_id = %active.id, "Batch already active, returning existing handle");
            return Ok(SubmitOutcome {
                job: active,
                created: false,
            });
        }

        let campaign = self.campaigns.get(campaign_id).await?;
        if campaign.has_output(kind.into()) {
            if let Some(latest) = self.jobs.find_latest(campaign_id, kind).await? {
                if latest.status != BatchStatus::Failed {
                    info!(campaign_id = %campaign_id, kind = %kind, job_id = %latest.id, "Batch already harvested, returning existing handle");
                    return Ok(SubmitOutcome {
                        job: latest,
                        created: false,
                    });
                }
            }
        }

        let job = BatchJob::new(campaign_id, kind, expected_custom_ids(&campaign, kind));
        self.submit_job(campaign, job).await
    }

    /// Submit a new batch scoped to the parents that still have no output.
    pub async fn retry_missing(&self, campaign_id: Uuid, kind: BatchKind) -> Result<SubmitOutcome> {
        let _guard = self.locks.acquire(campaign_id, kind).await;

        if let Some(active) = self.live_active_job(campaign_id, kind).await? {
            return Ok(SubmitOutcome {
                job: active,
                created: false,
            });
        }

        let campaign = self.campaigns.get(campaign_id).await?;
        let missing = missing_custom_ids(&campaign, kind);
        if missing.is_empty() {
            return Err(OrchestratorError::Validation(format!(
                "no missing {} items to resubmit",
                kind
            )));
        }

        let job = match self.jobs.find_latest(campaign_id, kind).await? {
            Some(latest) => BatchJob::retry_of(&latest, missing),
            None => BatchJob::new(campaign_id, kind, missing),
        };
        info!(
            campaign_id = %campaign_id,
            kind = %kind,
            attempt = job.attempt,
            count = job.request_count,
            "Resubmitting missing items"
        );
        self.submit_job(campaign, job).await
    }

    /// The slot's active job, after releasing a claim that never got an
    /// external id within `submit_grace`. Caller holds the slot lock.
    async fn live_active_job(&self, campaign_id: Uuid, kind: BatchKind) -> Result<Option<BatchJob>> {
        let Some(active) = self.jobs.find_active(campaign_id, kind).await? else {
            return Ok(None);
        };
        if self.is_stale_claim(&active) {
            self.abandon_locked(&active, STALE_CLAIM_REASON).await?;
            return Ok(None);
        }
        Ok(Some(active))
    }

    fn is_stale_claim(&self, job: &BatchJob) -> bool {
        job.external_batch_id.is_none()
            && !job.status.is_terminal()
            && job_age(job) >= self.config.submit_grace
    }

    /// Release claims of either kind left behind by a submission that died
    /// before the provider returned a batch id. Returns how many were released.
    pub async fn release_stale_claims(&self, campaign_id: Uuid) -> Result<usize> {
        let mut released = 0;
        for kind in [BatchKind::Hooks, BatchKind::Scripts] {
            let _guard = self.locks.acquire(campaign_id, kind).await;
            if let Some(active) = self.jobs.find_active(campaign_id, kind).await? {
                if self.is_stale_claim(&active) {
                    self.abandon_locked(&active, STALE_CLAIM_REASON).await?;
                    released += 1;
                }
            }
        }
        Ok(released)
    }

    async fn submit_job(&self, campaign: Campaign, job: BatchJob) -> Result<SubmitOutcome> {
        let kind = job.kind;

        // Reject before any external call if the campaign cannot move.
        CampaignStateMachine::advance(
            &campaign,
            PhaseOutput::BatchSubmitted {
                kind,
                batch_id: String::new(),
            },
        )?;
        if job.custom_ids.is_empty() {
            return Err(OrchestratorError::Validation(format!(
                "{} batch has no items",
                kind
            )));
        }
        if let Some(bad) = job.custom_ids.iter().find(|id| !is_valid_custom_id(id)) {
            return Err(OrchestratorError::Validation(format!(
                "invalid custom id {:?}",
                bad
            )));
        }

        let mut job = match self.jobs.claim(&job).await? {
            Claim::Claimed(job) => job,
            Claim::Existing(existing) => {
                return Ok(SubmitOutcome {
                    job: existing,
                    created: false,
                })
            }
        };

        let requests = self.build_requests(&campaign, &job);
        let provider = &self.provider;
        // Creating a batch is not idempotent: only resend when the provider
        // provably refused the request.
        let submitted = with_retry_when(
            &self.config.retry,
            "submit_batch",
            ProviderError::is_safe_to_resend,
            || {
                let requests = requests.clone();
                async move { provider.submit_batch(requests).await }
            },
        )
        .await;

        let external_id = match submitted {
            Ok(id) => id,
            Err(e) => {
                error!(campaign_id = %campaign.id, kind = %kind, "Batch submission failed: {}", e);
                if e.is_rejection() {
                    if let Err(release) = self.jobs.delete(job.id).await {
                        warn!(job_id = %job.id, "Failed to release batch claim: {}", release);
                    }
                } else {
                    warn!(
                        job_id = %job.id,
                        grace_secs = self.config.submit_grace.as_secs(),
                        "Submission outcome unknown, keeping the claim until the grace period ends"
                    );
                }
                return Err(OrchestratorError::from_provider(
                    e,
                    self.config.retry.max_attempts,
                ));
            }
        };

        job.external_batch_id = Some(external_id.clone());
        let saved = self.commit_submission(campaign, &job).await;
        let saved = match saved {
            Ok(saved) => saved,
            Err(e) => {
                // The provider accepted the batch but the campaign could not
                // record it; free the slot so a later submit can proceed.
                job.mark_failed(format!("submission not recorded: {}", e));
                if let Err(save) = self.jobs.save(&job).await {
                    error!(job_id = %job.id, "Failed to record orphaned batch: {}", save);
                }
                return Err(e);
            }
        };

        info!(
            campaign_id = %saved.id,
            kind = %kind,
            batch_id = %external_id,
            requests = job.request_count,
            attempt = job.attempt,
            "Batch submitted"
        );
        self.notifier.emit(Event::BatchSubmitted {
            campaign_id: saved.id,
            kind: kind.to_string(),
            batch_id: external_id,
            request_count: job.request_count,
            attempt: job.attempt,
        });

        Ok(SubmitOutcome { job, created: true })
    }

    async fn commit_submission(&self, mut campaign: Campaign, job: &BatchJob) -> Result<Campaign> {
        let batch_id = job.external_batch_id.clone().unwrap_or_default();
        let mut conflicts = 0;
        loop {
            let candidate = CampaignStateMachine::advance(
                &campaign,
                PhaseOutput::BatchSubmitted {
                    kind: job.kind,
                    batch_id: batch_id.clone(),
                },
            )?;
            match self.campaigns.save_with_batch_job(&candidate, job).await {
                Ok(saved) => {
                    self.notifier.status_changed(&campaign, &saved);
                    return Ok(saved);
                }
                Err(DbError::Conflict { .. }) if conflicts == 0 => {
                    conflicts += 1;
                    warn!(campaign_id = %campaign.id, "Concurrent write while recording submission, re-reading");
                    campaign = self.campaigns.get(campaign.id).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn build_requests(&self, campaign: &Campaign, job: &BatchJob) -> Vec<BatchRequest> {
        let bundle = ContextBundle::from_campaign(campaign, self.config.max_context_chars);
        let instructions = phase_instructions(Phase::from(job.kind));

        job.custom_ids
            .iter()
            .filter_map(|custom_id| {
                let parent = job.kind.parent_id(custom_id)?;
                let target = match job.kind {
                    BatchKind::Hooks => {
                        let angle = campaign.angle(parent)?;
                        json!({
                            "angle_id": angle.id,
                            "type": angle.angle_type.as_str(),
                            "category": angle.category,
                            "concept": angle.concept,
                        })
                    }
                    BatchKind::Scripts => {
                        let hook = campaign.hook(parent)?;
                        json!({
                            "angle_id": hook.angle_id,
                            "hook_id": hook.id,
                            "category": hook.category,
                            "hook_text": hook.text,
                        })
                    }
                };
                Some(BatchRequest {
                    custom_id: custom_id.clone(),
                    phase_instructions: instructions.to_string(),
                    context: bundle.render_with_target(target),
                })
            })
            .collect()
    }

    /// Report a job's progress without changing anything.
    ///
    /// Lost and stalled jobs report `failed` with an error instead of
    /// returning an error.
    pub async fn poll_batch(&self, job: &BatchJob) -> Result<BatchPoll> {
        if job.status.is_terminal() {
            return Ok(BatchPoll::from_job(job));
        }

        let age = job_age(job);
        let Some(external_id) = job.external_batch_id.as_deref() else {
            if self.is_stale_claim(job) {
                return Ok(BatchPoll::failed(job, STALE_CLAIM_REASON));
            }
            return Ok(BatchPoll::from_job(job));
        };

        let provider = &self.provider;
        let status = with_retry(&self.config.retry, "batch_status", || async move {
            provider.batch_status(external_id).await
        })
        .await;

        match status {
            Ok(report) => {
                if !report.status.is_terminal() && age >= self.config.batch_timeout {
                    return Ok(BatchPoll::failed(
                        job,
                        format!(
                            "batch {} still in flight after {}s",
                            external_id,
                            self.config.batch_timeout.as_secs()
                        ),
                    ));
                }
                Ok(BatchPoll {
                    status: report.status,
                    succeeded_count: report.succeeded,
                    errored_count: report.errored,
                    processing_count: report.processing,
                    error: None,
                })
            }
            Err(ProviderError::BatchNotFound(_)) => Ok(BatchPoll::failed(
                job,
                format!("batch {} no longer exists at the provider", external_id),
            )),
            Err(e) => Err(OrchestratorError::from_provider(
                e,
                self.config.retry.max_attempts,
            )),
        }
    }

    /// Persist in-flight progress from `poll` when it differs from the job.
    pub async fn record_progress(&self, job: &BatchJob, poll: &BatchPoll) -> Result<BatchJob> {
        if poll.status.is_terminal() {
            return Ok(job.clone());
        }
        let unchanged = job.status == poll.status
            && job.succeeded_count == poll.succeeded_count
            && job.errored_count == poll.errored_count
            && job.processing_count == poll.processing_count;
        if unchanged {
            return Ok(job.clone());
        }

        let mut updated = job.clone();
        updated.status = poll.status;
        updated.succeeded_count = poll.succeeded_count;
        updated.errored_count = poll.errored_count;
        updated.processing_count = poll.processing_count;

        let campaign = self.campaigns.get(job.campaign_id).await?;
        let tracks_job = campaign.status == CampaignStatus::submitted_for(job.kind)
            && campaign.batch_status != Some(poll.status);
        if tracks_job {
            let candidate = CampaignStateMachine::advance(
                &campaign,
                PhaseOutput::BatchProgress {
                    kind: job.kind,
                    status: poll.status,
                },
            )?;
            self.campaigns.save_with_batch_job(&candidate, &updated).await?;
        } else {
            self.jobs.save(&updated).await?;
        }

        self.notifier.emit(Event::BatchProgress {
            campaign_id: job.campaign_id,
            batch_id: job.external_batch_id.clone().unwrap_or_default(),
            status: poll.status.as_str().to_string(),
            succeeded: poll.succeeded_count,
            errored: poll.errored_count,
            processing: poll.processing_count,
        });
        Ok(updated)
    }

    /// Fetch results for a terminal job and merge them into the campaign.
    ///
    /// A job that was already harvested is reported again without changes.
    pub async fn harvest(&self, job_id: Uuid) -> Result<HarvestReport> {
        let job = self
            .jobs
            .find_by_id(job_id)
            .await?
            .ok_or(OrchestratorError::BatchJobNotFound(job_id))?;
        let _guard = self.locks.acquire(job.campaign_id, job.kind).await;

        // Re-read under the lock; a concurrent harvester may have finished.
        let job = self
            .jobs
            .find_by_id(job_id)
            .await?
            .ok_or(OrchestratorError::BatchJobNotFound(job_id))?;
        if job.is_harvested() {
            let campaign = self.campaigns.get(job.campaign_id).await?;
            return Ok(Self::report_from_job(&job, &campaign));
        }

        let external_id = job.external_batch_id.clone().ok_or_else(|| {
            OrchestratorError::Validation(format!("batch job {} was never submitted", job.id))
        })?;

        let provider = &self.provider;
        let fetched = with_retry(&self.config.retry, "batch_results", || {
            let external_id = external_id.as_str();
            async move { provider.batch_results(external_id).await }
        })
        .await;
        let items = match fetched {
            Ok(items) => items,
            Err(ProviderError::BatchNotFound(_)) => {
                let reason = format!("batch {} no longer exists at the provider", external_id);
                self.abandon_locked(&job, &reason).await?;
                return Err(OrchestratorError::BatchNotFound(external_id));
            }
            Err(e) => {
                return Err(OrchestratorError::from_provider(
                    e,
                    self.config.retry.max_attempts,
                ))
            }
        };

        let mut conflicts = 0;
        loop {
            let campaign = self.campaigns.get(job.campaign_id).await?;
            let assembly = ResultAssembler::assemble(&campaign, job.kind, &items, job.attempt);

            let returned: HashSet<&str> = items.iter().map(|i| i.custom_id.as_str()).collect();
            let mut failed = assembly.failed_custom_ids.clone();
            for custom_id in &job.custom_ids {
                if !returned.contains(custom_id.as_str()) && !failed.contains(custom_id) {
                    warn!(campaign_id = %job.campaign_id, custom_id = %custom_id, "Custom id absent from batch results");
                    failed.push(custom_id.clone());
                }
            }

            let succeeded = assembly.succeeded_custom_ids.len() as u32;
            let batch_status = if failed.is_empty() {
                BatchStatus::Completed
            } else if succeeded == 0 {
                BatchStatus::Failed
            } else {
                BatchStatus::PartiallyCompleted
            };

            let coverage = assembly.coverage();
            let decision = if coverage < self.config.min_success_ratio {
                HarvestDecision::Partial
            } else if assembly.missing_custom_ids.is_empty() {
                HarvestDecision::Complete
            } else {
                HarvestDecision::Advance
            };
            let error = (!failed.is_empty()).then(|| {
                format!(
                    "{} of {} {} items failed",
                    failed.len(),
                    job.request_count,
                    job.kind
                )
            });

            let candidate = CampaignStateMachine::advance(
                &campaign,
                PhaseOutput::BatchHarvested {
                    content: assembly.content.clone(),
                    batch_status,
                    decision,
                    error,
                },
            )?;

            let now = Utc::now();
            let mut harvested = job.clone();
            harvested.status = batch_status;
            harvested.succeeded_count = succeeded;
            harvested.errored_count = failed.len() as u32;
            harvested.processing_count = 0;
            harvested.failed_custom_ids = failed.clone();
            harvested.active = false;
            harvested.completed_at.get_or_insert(now);
            harvested.harvested_at = Some(now);

            match self.campaigns.save_with_batch_job(&candidate, &harvested).await {
                Ok(saved) => {
                    info!(
                        campaign_id = %saved.id,
                        kind = %job.kind,
                        batch_id = %external_id,
                        added = assembly.added,
                        unchanged = assembly.unchanged,
                        failed = failed.len(),
                        coverage = coverage,
                        "Batch harvested"
                    );
                    self.notifier.emit(Event::BatchHarvested {
                        campaign_id: saved.id,
                        kind: job.kind.to_string(),
                        batch_id: external_id.clone(),
                        added: assembly.added,
                        failed: failed.len(),
                    });
                    self.notifier.status_changed(&campaign, &saved);

                    return Ok(HarvestReport {
                        job_id: job.id,
                        batch_id: Some(external_id),
                        kind: job.kind,
                        batch_status,
                        added: assembly.added,
                        unchanged: assembly.unchanged,
                        skipped_with_reason: assembly.skipped_with_reason,
                        succeeded_custom_ids: assembly.succeeded_custom_ids,
                        failed_custom_ids: failed,
                        coverage,
                        campaign_status: saved.status,
                        already_harvested: false,
                    });
                }
                Err(DbError::Conflict { .. }) if conflicts == 0 => {
                    conflicts += 1;
                    warn!(campaign_id = %job.campaign_id, "Concurrent write during harvest, re-assembling");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn report_from_job(job: &BatchJob, campaign: &Campaign) -> HarvestReport {
        let total = expected_custom_ids(campaign, job.kind).len();
        let missing = missing_custom_ids(campaign, job.kind).len();
        let coverage = if total == 0 {
            1.0
        } else {
            (total - missing) as f64 / total as f64
        };

        HarvestReport {
            job_id: job.id,
            batch_id: job.external_batch_id.clone(),
            kind: job.kind,
            batch_status: job.status,
            added: 0,
            unchanged: 0,
            skipped_with_reason: Vec::new(),
            succeeded_custom_ids: job
                .custom_ids
                .iter()
                .filter(|id| !job.failed_custom_ids.contains(id))
                .cloned()
                .collect(),
            failed_custom_ids: job.failed_custom_ids.clone(),
            coverage,
            campaign_status: campaign.status,
            already_harvested: true,
        }
    }

    /// Mark a lost job failed and, if the campaign is waiting on it, fail the
    /// campaign so it can be retried.
    pub async fn abandon(&self, job: &BatchJob, reason: &str) -> Result<Campaign> {
        let _guard = self.locks.acquire(job.campaign_id, job.kind).await;
        let current = self
            .jobs
            .find_by_id(job.id)
            .await?
            .ok_or(OrchestratorError::BatchJobNotFound(job.id))?;
        if current.is_harvested() || current.status == BatchStatus::Failed {
            return Ok(self.campaigns.get(job.campaign_id).await?);
        }
        self.abandon_locked(&current, reason).await
    }

    async fn abandon_locked(&self, job: &BatchJob, reason: &str) -> Result<Campaign> {
        warn!(campaign_id = %job.campaign_id, job_id = %job.id, kind = %job.kind, "Abandoning batch: {}", reason);

        let mut failed_job = job.clone();
        failed_job.mark_failed(reason);

        let campaign = self.campaigns.get(job.campaign_id).await?;
        // A claim without an external id is only ever recorded alongside a
        // pre-submit status, so a submitted campaign holding one is stuck on it.
        let waiting_on_job = campaign.status == CampaignStatus::submitted_for(job.kind)
            && (job.external_batch_id.is_none()
                || campaign.batch_id(job.kind) == job.external_batch_id.as_deref());

        if waiting_on_job {
            let candidate = CampaignStateMachine::fail_batch(&campaign, job.kind, reason)?;
            let saved = self
                .campaigns
                .save_with_batch_job(&candidate, &failed_job)
                .await?;
            self.notifier.status_changed(&campaign, &saved);
            Ok(saved)
        } else {
            self.jobs.save(&failed_job).await?;
            Ok(campaign)
        }
    }
}
