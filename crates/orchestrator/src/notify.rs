use events::{Event, EventBus};
use hookline_core::{Campaign, CampaignStatus};
use tracing::{debug, info};

/// Optional event bus handle shared by the pipeline components.
#[derive(Clone, Default)]
pub struct Notifier {
    bus: Option<EventBus>,
}

impl Notifier {
    pub fn new(bus: Option<EventBus>) -> Self {
        Self { bus }
    }

    pub fn emit(&self, event: Event) {
        if let Some(bus) = &self.bus {
            debug!(event = event.name(), "Publishing event");
            bus.publish(event);
        }
    }

    /// Log and publish a status change between two versions of a campaign.
    pub fn status_changed(&self, before: &Campaign, after: &Campaign) {
        if before.status == after.status {
            return;
        }
        info!(
            campaign_id = %after.id,
            from = %before.status,
            to = %after.status,
            "Campaign state transition"
        );
        self.emit(Event::StatusChanged {
            campaign_id: after.id,
            from_status: before.status.as_str().to_string(),
            to_status: after.status.as_str().to_string(),
        });
        if let Some(message) = after.error_message.as_ref().filter(|_| after.status == CampaignStatus::Failed) {
            self.emit(Event::CampaignFailed {
                campaign_id: after.id,
                message: message.clone(),
            });
        }
    }
}
