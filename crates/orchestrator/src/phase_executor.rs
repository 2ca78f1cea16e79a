//! Single-shot phases: avatar, journey, objections, angles.

use std::sync::Arc;

use db::{CampaignRepository, DbError};
use events::Event;
use hookline_core::{Campaign, Phase};
use provider::{with_retry, GenerationRequest, Provider};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::context::ContextManager;
use crate::error::{OrchestratorError, Result};
use crate::notify::Notifier;
use crate::prompts::phase_instructions;
use crate::schema::parse_phase_output;
use crate::state_machine::{CampaignStateMachine, PhaseOutput};

#[derive(Clone)]
pub struct PhaseExecutor {
    provider: Arc<dyn Provider>,
    campaigns: CampaignRepository,
    context: ContextManager,
    config: PipelineConfig,
    notifier: Notifier,
}

impl PhaseExecutor {
    pub fn new(
        provider: Arc<dyn Provider>,
        campaigns: CampaignRepository,
        context: ContextManager,
        config: PipelineConfig,
    ) -> Self {
        Self {
            provider,
            campaigns,
            context,
            config,
            notifier: Notifier::default(),
        }
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Run `phase` for the campaign and commit its output.
    ///
    /// Provider and schema failures commit nothing but the `failed` status.
    pub async fn run_phase(&self, campaign_id: Uuid, phase: Phase) -> Result<Campaign> {
        let campaign = self.campaigns.get(campaign_id).await?;
        CampaignStateMachine::ensure_phase_ready(&campaign, phase)?;

        info!(campaign_id = %campaign_id, phase = %phase, "Running phase");

        match self.generate(&campaign, phase).await {
            Ok((committed, handle)) => {
                if let Err(e) = self.context.record_phase(&committed, &handle).await {
                    warn!(campaign_id = %campaign_id, "Failed to refresh context snapshot: {}", e);
                }
                info!(campaign_id = %campaign_id, phase = %phase, "Phase completed");
                self.notifier.emit(Event::PhaseCompleted {
                    campaign_id,
                    phase: phase.as_str().to_string(),
                });
                self.notifier.status_changed(&campaign, &committed);
                Ok(committed)
            }
            Err(e) if Self::fails_campaign(&e) => {
                error!(campaign_id = %campaign_id, phase = %phase, "Phase failed: {}", e);
                self.record_failure(campaign_id, phase, &e).await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Provider and output failures park the campaign; conflicts and
    /// validation errors leave it as it was.
    fn fails_campaign(error: &OrchestratorError) -> bool {
        matches!(
            error,
            OrchestratorError::Provider(_)
                | OrchestratorError::TransientProvider { .. }
                | OrchestratorError::Schema { .. }
        )
    }

    async fn generate(&self, campaign: &Campaign, phase: Phase) -> Result<(Campaign, String)> {
        let thread = self.context.get_or_create_thread(campaign).await?;
        let request = GenerationRequest {
            label: phase.as_str().to_string(),
            thread_id: Some(thread.handle.clone()),
            context: thread.bundle.render(),
            phase_instructions: phase_instructions(phase).to_string(),
        };

        let provider = &self.provider;
        let value = with_retry(&self.config.retry, phase.as_str(), || {
            let request = request.clone();
            async move { provider.generate(request).await }
        })
        .await
        .map_err(|e| OrchestratorError::from_provider(e, self.config.retry.max_attempts))?;

        let output = parse_phase_output(phase, value)?;
        let committed = self.commit(campaign, output, &thread.handle).await?;
        Ok((committed, thread.handle))
    }

    /// Apply `output` and save it. If another writer saved first, re-read and
    /// re-apply once; the state machine rejects the output if the phase is no
    /// longer runnable.
    async fn commit(&self, campaign: &Campaign, output: PhaseOutput, handle: &str) -> Result<Campaign> {
        let mut candidate = CampaignStateMachine::advance(campaign, output.clone())?;
        candidate.conversation_thread_id = Some(handle.to_string());

        match self.campaigns.save(&candidate).await {
            Ok(saved) => Ok(saved),
            Err(DbError::Conflict { .. }) => {
                warn!(campaign_id = %campaign.id, "Concurrent write while committing phase, re-applying");
                let latest = self.campaigns.get(campaign.id).await?;
                let mut candidate = CampaignStateMachine::advance(&latest, output)?;
                candidate.conversation_thread_id = Some(handle.to_string());
                Ok(self.campaigns.save(&candidate).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn record_failure(&self, campaign_id: Uuid, phase: Phase, cause: &OrchestratorError) {
        let message = format!("{} phase failed: {}", phase, cause);
        let result: Result<()> = async {
            let latest = self.campaigns.get(campaign_id).await?;
            let failed = CampaignStateMachine::fail(&latest, &message)?;
            let saved = match self.campaigns.save(&failed).await {
                Ok(saved) => saved,
                Err(DbError::Conflict { .. }) => {
                    let latest = self.campaigns.get(campaign_id).await?;
                    let failed = CampaignStateMachine::fail(&latest, &message)?;
                    self.campaigns.save(&failed).await?
                }
                Err(e) => return Err(e.into()),
            };
            self.notifier.status_changed(&latest, &saved);
            Ok(())
        }
        .await;

        if let Err(e) = result {
            error!(campaign_id = %campaign_id, "Failed to record phase failure: {}", e);
        }
    }
}
