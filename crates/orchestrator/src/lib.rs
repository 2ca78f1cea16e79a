//! Campaign pipeline: single-shot phases, batch fan-out phases, and the
//! reconciliation that keeps the persisted campaign consistent.

pub mod assembler;
pub mod batch;
pub mod config;
pub mod context;
pub mod error;
pub mod notify;
pub mod phase_executor;
pub mod pipeline;
pub mod prompts;
pub mod reconciler;
pub mod schema;
pub mod state_machine;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use assembler::{Assembly, ResultAssembler, SkippedItem};
pub use batch::{BatchOrchestrator, BatchPoll, HarvestReport, SubmitOutcome};
pub use config::PipelineConfig;
pub use context::{ContextBundle, ContextManager, ThreadContext};
pub use error::{OrchestratorError, Result};
pub use phase_executor::PhaseExecutor;
pub use pipeline::CampaignPipeline;
pub use reconciler::{ReconcileAction, ReconcileOutcome, Reconciler};
pub use state_machine::{CampaignStateMachine, HarvestDecision, MergedContent, PhaseOutput};
pub use worker::{BatchWorker, WorkerPass};
