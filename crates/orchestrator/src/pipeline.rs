//! Facade wiring the pipeline components over one database and provider.

use std::sync::Arc;

use db::{
    BatchJobRepository, CampaignRepository, ConversationThreadRepository, DbError, SqlitePool,
};
use events::{Event, EventBus};
use hookline_core::{BatchJob, BatchKind, Campaign, CreateCampaignRequest, Phase};
use provider::Provider;
use tracing::info;
use uuid::Uuid;

use crate::batch::{BatchOrchestrator, SubmitOutcome};
use crate::config::PipelineConfig;
use crate::context::ContextManager;
use crate::error::{OrchestratorError, Result};
use crate::notify::Notifier;
use crate::phase_executor::PhaseExecutor;
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::state_machine::{CampaignStateMachine, PhaseOutput};
use crate::worker::BatchWorker;

#[derive(Clone)]
pub struct CampaignPipeline {
    campaigns: CampaignRepository,
    executor: PhaseExecutor,
    batches: BatchOrchestrator,
    reconciler: Reconciler,
    notifier: Notifier,
    config: PipelineConfig,
}

impl CampaignPipeline {
    pub fn new(pool: SqlitePool, provider: Arc<dyn Provider>, config: PipelineConfig) -> Self {
        Self::build(pool, provider, config, Notifier::default())
    }

    pub fn with_event_bus(
        pool: SqlitePool,
        provider: Arc<dyn Provider>,
        config: PipelineConfig,
        bus: EventBus,
    ) -> Self {
        Self::build(pool, provider, config, Notifier::new(Some(bus)))
    }

    fn build(
        pool: SqlitePool,
        provider: Arc<dyn Provider>,
        config: PipelineConfig,
        notifier: Notifier,
    ) -> Self {
        let campaigns = CampaignRepository::new(pool.clone());
        let jobs = BatchJobRepository::new(pool.clone());
        let context = ContextManager::new(
            provider.clone(),
            ConversationThreadRepository::new(pool),
            config.max_context_chars,
        );

        let executor = PhaseExecutor::new(provider.clone(), campaigns.clone(), context, config.clone())
            .with_notifier(notifier.clone());
        let batches = BatchOrchestrator::new(provider, campaigns.clone(), jobs, config.clone())
            .with_notifier(notifier.clone());
        let reconciler =
            Reconciler::new(campaigns.clone(), batches.clone()).with_notifier(notifier.clone());

        Self {
            campaigns,
            executor,
            batches,
            reconciler,
            notifier,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Create a campaign from submitted product info.
    pub async fn create_campaign(&self, request: CreateCampaignRequest) -> Result<Campaign> {
        if request.owner.trim().is_empty() {
            return Err(OrchestratorError::Validation("owner is required".to_string()));
        }
        let draft = Campaign::new(request.owner);
        let campaign =
            CampaignStateMachine::advance(&draft, PhaseOutput::ProductInfo(request.product_info))?;
        let created = self.campaigns.create(&campaign).await?;

        info!(campaign_id = %created.id, owner = %created.owner, "Campaign created");
        self.notifier.emit(Event::CampaignCreated {
            campaign_id: created.id,
            owner: created.owner.clone(),
        });
        self.notifier.status_changed(&draft, &created);
        Ok(created)
    }

    pub async fn get(&self, campaign_id: Uuid) -> Result<Campaign> {
        Ok(self.campaigns.get(campaign_id).await?)
    }

    pub async fn list(&self) -> Result<Vec<Campaign>> {
        Ok(self.campaigns.find_all().await?)
    }

    pub async fn run_phase(&self, campaign_id: Uuid, phase: Phase) -> Result<Campaign> {
        self.executor.run_phase(campaign_id, phase).await
    }

    pub async fn submit_batch(&self, campaign_id: Uuid, kind: BatchKind) -> Result<SubmitOutcome> {
        self.batches.submit_batch(campaign_id, kind).await
    }

    /// Resubmit only the items of `kind` that have no output yet.
    pub async fn retry_batch(&self, campaign_id: Uuid, kind: BatchKind) -> Result<SubmitOutcome> {
        self.batches.retry_missing(campaign_id, kind).await
    }

    pub async fn list_batches(&self, campaign_id: Uuid) -> Result<Vec<BatchJob>> {
        self.campaigns.get(campaign_id).await?;
        Ok(self.batches.jobs().list_for_campaign(campaign_id).await?)
    }

    pub async fn check_and_process_batch(&self, campaign_id: Uuid) -> Result<ReconcileOutcome> {
        self.reconciler.check_and_process_batch(campaign_id).await
    }

    pub async fn pause(&self, campaign_id: Uuid) -> Result<Campaign> {
        self.transition(campaign_id, CampaignStateMachine::pause).await
    }

    pub async fn resume(&self, campaign_id: Uuid) -> Result<Campaign> {
        self.transition(campaign_id, CampaignStateMachine::resume).await
    }

    pub async fn retry(&self, campaign_id: Uuid) -> Result<Campaign> {
        self.transition(campaign_id, CampaignStateMachine::retry).await
    }

    /// Mark a campaign with scripts complete, accepting any missing items.
    pub async fn finalize(&self, campaign_id: Uuid) -> Result<Campaign> {
        self.transition(campaign_id, |c| {
            CampaignStateMachine::advance(c, PhaseOutput::Finalized)
        })
        .await
    }

    pub fn worker(&self) -> BatchWorker {
        BatchWorker::new(
            self.campaigns.clone(),
            self.reconciler.clone(),
            self.config.poll_interval,
        )
    }

    async fn transition<F>(&self, campaign_id: Uuid, apply: F) -> Result<Campaign>
    where
        F: Fn(&Campaign) -> Result<Campaign>,
    {
        let mut attempts = 0;
        loop {
            let current = self.campaigns.get(campaign_id).await?;
            let next = apply(&current)?;
            match self.campaigns.save(&next).await {
                Ok(saved) => {
                    self.notifier.status_changed(&current, &saved);
                    return Ok(saved);
                }
                Err(DbError::Conflict { .. }) if attempts == 0 => attempts += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
