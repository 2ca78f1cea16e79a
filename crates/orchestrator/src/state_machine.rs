use std::collections::HashSet;

use chrono::Utc;
use hookline_core::{
    BatchKind, BatchStatus, Campaign, CampaignStatus, Hook, MarketingAngle, Phase, Script,
};
use serde::Serialize;
use serde_json::Value;

use crate::error::{OrchestratorError, Result};

/// Validated output of one pipeline step, ready to be applied to a campaign.
#[derive(Debug, Clone)]
pub enum PhaseOutput {
    ProductInfo(Value),
    Avatar(Value),
    Journey(Value),
    Objections(Value),
    Angles(Vec<MarketingAngle>),
    BatchSubmitted {
        kind: BatchKind,
        batch_id: String,
    },
    BatchProgress {
        kind: BatchKind,
        status: BatchStatus,
    },
    BatchHarvested {
        content: MergedContent,
        batch_status: BatchStatus,
        decision: HarvestDecision,
        error: Option<String>,
    },
    Finalized,
}

/// Full post-merge collection for the harvested kind.
#[derive(Debug, Clone)]
pub enum MergedContent {
    Hooks(Vec<Hook>),
    Scripts(Vec<Script>),
}

impl MergedContent {
    pub fn kind(&self) -> BatchKind {
        match self {
            Self::Hooks(_) => BatchKind::Hooks,
            Self::Scripts(_) => BatchKind::Scripts,
        }
    }
}

/// Where a harvested batch leaves the campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HarvestDecision {
    /// Coverage met the threshold; move to `*_batch_completed`.
    Advance,
    /// Nothing is missing; for scripts this finishes the campaign.
    Complete,
    /// Coverage fell short; park in `partially_completed`.
    Partial,
}

pub struct CampaignStateMachine;

impl CampaignStateMachine {
    pub fn validate_transition(from: CampaignStatus, to: CampaignStatus) -> Result<()> {
        if Self::allowed_transitions(from).contains(&to) {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }

    fn allowed_transitions(from: CampaignStatus) -> Vec<CampaignStatus> {
        use CampaignStatus::*;

        let mut allowed = match from {
            Draft => vec![ProductInfoReady],
            ProductInfoReady => vec![ProductInfoReady, AnglesGenerated],
            AnglesGenerated => vec![HooksBatchSubmitted],
            HooksBatchSubmitted => vec![HooksBatchCompleted, PartiallyCompleted],
            HooksBatchCompleted => vec![ScriptsBatchSubmitted, HooksBatchSubmitted],
            ScriptsBatchSubmitted => vec![ScriptsBatchCompleted, PartiallyCompleted],
            ScriptsBatchCompleted => vec![Completed, ScriptsBatchSubmitted],
            PartiallyCompleted => vec![HooksBatchSubmitted, ScriptsBatchSubmitted],
            // Side states leave only through resume/retry.
            Completed | Failed | Paused => return vec![],
        };
        allowed.extend([Failed, Paused]);
        allowed
    }

    pub fn can_transition(from: CampaignStatus, to: CampaignStatus) -> bool {
        Self::validate_transition(from, to).is_ok()
    }

    fn invalid(from: CampaignStatus, to: impl std::fmt::Display) -> OrchestratorError {
        OrchestratorError::InvalidTransition {
            from: from.as_str().to_string(),
            to: to.to_string(),
        }
    }

    /// Check that a single-shot phase may run now.
    ///
    /// Phases inside `product_info_ready` run in strict order: each needs the
    /// previous output, and a phase cannot be re-run once a later one exists.
    pub fn ensure_phase_ready(campaign: &Campaign, phase: Phase) -> Result<()> {
        if !phase.is_single_shot() {
            return Err(OrchestratorError::Validation(format!(
                "{} runs as a batch, not a single-shot phase",
                phase
            )));
        }

        if campaign.status != CampaignStatus::ProductInfoReady {
            return Err(Self::invalid(campaign.status, phase));
        }

        let prerequisite_met = match phase.previous() {
            Some(previous) => campaign.has_output(previous),
            None => campaign.product_info.is_some(),
        };
        if !prerequisite_met {
            let needed = phase
                .previous()
                .map(|p| p.as_str())
                .unwrap_or("product_info");
            return Err(OrchestratorError::Validation(format!(
                "{} requires {} output",
                phase, needed
            )));
        }

        let superseded = [Phase::Journey, Phase::Objections, Phase::Angles]
            .into_iter()
            .filter(|later| *later > phase)
            .find(|later| campaign.has_output(*later));
        if let Some(later) = superseded {
            return Err(OrchestratorError::Validation(format!(
                "{} cannot be re-run after {} was generated",
                phase, later
            )));
        }

        Ok(())
    }

    /// Apply `output` to a copy of `campaign`.
    ///
    /// The candidate is validated for the transition and for referential
    /// integrity before it is returned; on error the input is untouched.
    pub fn advance(campaign: &Campaign, output: PhaseOutput) -> Result<Campaign> {
        use CampaignStatus::*;

        let from = campaign.status;
        let mut next = campaign.clone();

        match output {
            PhaseOutput::ProductInfo(info) => {
                if campaign.avatar_analysis.is_some() {
                    return Err(Self::invalid(from, "product_info"));
                }
                Self::validate_transition(from, ProductInfoReady)?;
                if !info.as_object().is_some_and(|o| !o.is_empty()) {
                    return Err(OrchestratorError::schema(
                        "product_info",
                        "expected a non-empty JSON object",
                    ));
                }
                next.product_info = Some(info);
                next.status = ProductInfoReady;
            }
            PhaseOutput::Avatar(value) => {
                Self::ensure_phase_ready(campaign, Phase::Avatar)?;
                next.avatar_analysis = Some(value);
                next.current_phase = Some(Phase::Avatar);
            }
            PhaseOutput::Journey(value) => {
                Self::ensure_phase_ready(campaign, Phase::Journey)?;
                next.journey_map = Some(value);
                next.current_phase = Some(Phase::Journey);
            }
            PhaseOutput::Objections(value) => {
                Self::ensure_phase_ready(campaign, Phase::Objections)?;
                next.objections = Some(value);
                next.current_phase = Some(Phase::Objections);
            }
            PhaseOutput::Angles(angles) => {
                Self::ensure_phase_ready(campaign, Phase::Angles)?;
                Self::validate_transition(from, AnglesGenerated)?;
                if angles.is_empty() {
                    return Err(OrchestratorError::schema(Phase::Angles, "no angles produced"));
                }
                next.angles = angles;
                next.current_phase = Some(Phase::Angles);
                next.status = AnglesGenerated;
            }
            PhaseOutput::BatchSubmitted { kind, batch_id } => {
                let to = CampaignStatus::submitted_for(kind);
                Self::validate_transition(from, to)?;
                if from == PartiallyCompleted && campaign.current_phase != Some(kind.into()) {
                    return Err(Self::invalid(from, to));
                }
                let has_parents = match kind {
                    BatchKind::Hooks => !campaign.angles.is_empty(),
                    BatchKind::Scripts => !campaign.hooks.is_empty(),
                };
                if !has_parents {
                    return Err(OrchestratorError::Validation(format!(
                        "{} batch has nothing to generate from",
                        kind
                    )));
                }

                match kind {
                    BatchKind::Hooks => next.hooks_batch_id = Some(batch_id),
                    BatchKind::Scripts => next.scripts_batch_id = Some(batch_id),
                }
                next.batch_status = Some(BatchStatus::Submitted);
                next.batch_created_at = Some(Utc::now());
                next.batch_completed_at = None;
                next.batch_error = None;
                next.error_message = None;
                next.resume_status = None;
                next.current_phase = Some(kind.into());
                next.status = to;
            }
            PhaseOutput::BatchProgress { kind, status } => {
                if from != CampaignStatus::submitted_for(kind) {
                    return Err(Self::invalid(from, CampaignStatus::submitted_for(kind)));
                }
                next.batch_status = Some(status);
            }
            PhaseOutput::BatchHarvested {
                content,
                batch_status,
                decision,
                error,
            } => {
                let kind = content.kind();
                if from != CampaignStatus::submitted_for(kind) {
                    return Err(Self::invalid(from, CampaignStatus::completed_for(kind)));
                }

                let path: &[CampaignStatus] = match (decision, kind) {
                    (HarvestDecision::Partial, _) => &[PartiallyCompleted],
                    (HarvestDecision::Complete, BatchKind::Scripts) => {
                        &[ScriptsBatchCompleted, Completed]
                    }
                    (_, BatchKind::Hooks) => &[HooksBatchCompleted],
                    (HarvestDecision::Advance, BatchKind::Scripts) => &[ScriptsBatchCompleted],
                };
                let mut current = from;
                for step in path {
                    Self::validate_transition(current, *step)?;
                    current = *step;
                }

                match content {
                    MergedContent::Hooks(hooks) => next.hooks = hooks,
                    MergedContent::Scripts(scripts) => next.scripts = scripts,
                }
                next.batch_status = Some(batch_status);
                next.batch_completed_at = Some(Utc::now());
                next.batch_error = error.clone();

                if batch_status == BatchStatus::Failed {
                    // Not a single item came back usable.
                    Self::validate_transition(from, Failed)?;
                    next.resume_status = Some(match decision {
                        HarvestDecision::Partial if next.has_output(kind.into()) => {
                            PartiallyCompleted
                        }
                        HarvestDecision::Partial => Self::batch_prerequisite(kind),
                        _ => CampaignStatus::completed_for(kind),
                    });
                    next.error_message = Some(
                        error.unwrap_or_else(|| format!("every {} item in the batch failed", kind)),
                    );
                    next.status = Failed;
                } else {
                    next.resume_status = match decision {
                        HarvestDecision::Partial => Some(Self::batch_prerequisite(kind)),
                        _ => None,
                    };
                    if decision == HarvestDecision::Partial {
                        next.error_message = Some(error.unwrap_or_else(|| {
                            format!("{} coverage is below the success threshold", kind)
                        }));
                    }
                    next.status = current;
                }
            }
            PhaseOutput::Finalized => {
                Self::validate_transition(from, Completed)?;
                next.status = Completed;
            }
        }

        Self::validate_integrity(&next)?;
        Ok(next)
    }

    /// The furthest validated status before a batch of `kind` was submitted.
    fn batch_prerequisite(kind: BatchKind) -> CampaignStatus {
        match kind {
            BatchKind::Hooks => CampaignStatus::AnglesGenerated,
            BatchKind::Scripts => CampaignStatus::HooksBatchCompleted,
        }
    }

    /// Ids are unique per collection, every hook has a live angle and every
    /// script a live hook.
    pub fn validate_integrity(campaign: &Campaign) -> Result<()> {
        let mut angle_ids = HashSet::new();
        for angle in &campaign.angles {
            if !angle_ids.insert(angle.id.as_str()) {
                return Err(OrchestratorError::ReferentialIntegrity(format!(
                    "duplicate angle id {}",
                    angle.id
                )));
            }
        }

        let mut hook_ids = HashSet::new();
        for hook in &campaign.hooks {
            if !angle_ids.contains(hook.angle_id.as_str()) {
                return Err(OrchestratorError::ReferentialIntegrity(format!(
                    "hook {} references missing angle {}",
                    hook.id, hook.angle_id
                )));
            }
            if !hook_ids.insert(hook.id.as_str()) {
                return Err(OrchestratorError::ReferentialIntegrity(format!(
                    "duplicate hook id {}",
                    hook.id
                )));
            }
        }

        let mut script_ids = HashSet::new();
        for script in &campaign.scripts {
            if !hook_ids.contains(script.hook_id.as_str()) {
                return Err(OrchestratorError::ReferentialIntegrity(format!(
                    "script {} references missing hook {}",
                    script.id, script.hook_id
                )));
            }
            if !script_ids.insert(script.id.as_str()) {
                return Err(OrchestratorError::ReferentialIntegrity(format!(
                    "duplicate script id {}",
                    script.id
                )));
            }
        }

        Ok(())
    }

    /// Park the campaign in `failed`, keeping every committed output.
    pub fn fail(campaign: &Campaign, message: impl Into<String>) -> Result<Campaign> {
        let mut next = campaign.clone();
        match campaign.status {
            CampaignStatus::Completed => {
                return Err(Self::invalid(campaign.status, CampaignStatus::Failed))
            }
            CampaignStatus::Failed => {}
            CampaignStatus::Paused => next.status = CampaignStatus::Failed,
            status => {
                next.resume_status = Some(status);
                next.status = CampaignStatus::Failed;
            }
        }
        next.error_message = Some(message.into());
        Ok(next)
    }

    /// Fail a campaign whose in-flight batch was lost.
    ///
    /// The campaign resumes from before the submission: `partially_completed`
    /// when some output of that kind already exists, the prerequisite status
    /// otherwise.
    pub fn fail_batch(
        campaign: &Campaign,
        kind: BatchKind,
        message: impl Into<String>,
    ) -> Result<Campaign> {
        let expected = CampaignStatus::submitted_for(kind);
        if campaign.status != expected {
            return Err(Self::invalid(campaign.status, CampaignStatus::Failed));
        }

        let message = message.into();
        let mut next = campaign.clone();
        next.resume_status = Some(if campaign.has_output(kind.into()) {
            CampaignStatus::PartiallyCompleted
        } else {
            Self::batch_prerequisite(kind)
        });
        next.batch_status = Some(BatchStatus::Failed);
        next.batch_error = Some(message.clone());
        next.batch_completed_at = Some(Utc::now());
        next.error_message = Some(message);
        next.status = CampaignStatus::Failed;
        Ok(next)
    }

    pub fn pause(campaign: &Campaign) -> Result<Campaign> {
        Self::validate_transition(campaign.status, CampaignStatus::Paused)?;
        let mut next = campaign.clone();
        next.resume_status = Some(campaign.status);
        next.status = CampaignStatus::Paused;
        Ok(next)
    }

    pub fn resume(campaign: &Campaign) -> Result<Campaign> {
        if campaign.status != CampaignStatus::Paused {
            return Err(Self::invalid(campaign.status, "resume"));
        }
        let mut next = campaign.clone();
        next.status = campaign.effective_status();
        next.resume_status = None;
        Ok(next)
    }

    /// Return a failed campaign to the status it failed from.
    pub fn retry(campaign: &Campaign) -> Result<Campaign> {
        if campaign.status != CampaignStatus::Failed {
            return Err(Self::invalid(campaign.status, "retry"));
        }
        let mut next = campaign.clone();
        next.status = campaign.effective_status();
        next.resume_status = None;
        next.error_message = None;
        Ok(next)
    }
}
