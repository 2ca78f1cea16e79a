//! Background reconciliation loop.

use std::time::Duration;

use db::CampaignRepository;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::reconciler::{ReconcileAction, Reconciler};

/// Totals from one pass over the watched campaigns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerPass {
    pub visited: usize,
    pub harvested: usize,
    pub failed: usize,
    pub resubmitted: usize,
    pub released: usize,
    pub errors: usize,
}

/// Periodically reconciles every campaign awaiting or about to start a batch,
/// independent of client polling.
#[derive(Clone)]
pub struct BatchWorker {
    campaigns: CampaignRepository,
    reconciler: Reconciler,
    poll_interval: Duration,
}

impl BatchWorker {
    pub fn new(campaigns: CampaignRepository, reconciler: Reconciler, poll_interval: Duration) -> Self {
        Self {
            campaigns,
            reconciler,
            poll_interval,
        }
    }

    /// Reconcile each watched campaign once. Errors on one campaign do not
    /// stop the pass.
    pub async fn run_once(&self) -> Result<WorkerPass> {
        let statuses = self.reconciler.watched_statuses();
        let campaigns = self.campaigns.find_by_statuses(&statuses).await?;

        let mut pass = WorkerPass::default();
        for campaign in campaigns {
            pass.visited += 1;
            match self.reconciler.check_and_process_batch(campaign.id).await {
                Ok(outcome) => match outcome.action {
                    ReconcileAction::Harvested => pass.harvested += 1,
                    ReconcileAction::Failed => pass.failed += 1,
                    ReconcileAction::Resubmitted => pass.resubmitted += 1,
                    ReconcileAction::Released => pass.released += 1,
                    ReconcileAction::Idle | ReconcileAction::InFlight => {}
                },
                Err(e) => {
                    pass.errors += 1;
                    error!(campaign_id = %campaign.id, "Reconciliation failed: {}", e);
                }
            }
        }
        Ok(pass)
    }

    /// Run until `shutdown` flips to true or its sender is dropped.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.poll_interval.as_secs(), "Batch worker started");
            let mut interval = tokio::time::interval(self.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match self.run_once().await {
                            Ok(pass) if pass.visited > 0 => {
                                info!(
                                    visited = pass.visited,
                                    harvested = pass.harvested,
                                    failed = pass.failed,
                                    resubmitted = pass.resubmitted,
                                    released = pass.released,
                                    errors = pass.errors,
                                    "Batch worker pass"
                                );
                            }
                            Ok(_) => debug!("Batch worker pass found nothing to do"),
                            Err(e) => error!("Batch worker pass failed: {}", e),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Batch worker stopped");
        })
    }
}
