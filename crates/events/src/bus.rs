//! Broadcast bus for pipeline events

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::types::{Event, EventEnvelope};

const DEFAULT_CAPACITY: usize = 1000;

/// Fan-out of pipeline events to any number of subscribers.
///
/// Cloning shares the underlying channel. Slow subscribers lose the oldest
/// events rather than blocking publishers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
    published: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            published: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Wrap `event` in an envelope and broadcast it. The envelope is returned
    /// whether or not anyone was listening.
    pub fn publish(&self, event: Event) -> EventEnvelope {
        let envelope = EventEnvelope::new(event);
        self.published.fetch_add(1, Ordering::Relaxed);
        // No receivers is not an error for a notification bus.
        let _ = self.sender.send(envelope.clone());
        envelope
    }

    /// Every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Only the events of one campaign.
    pub fn subscribe_campaign(&self, campaign_id: Uuid) -> CampaignSubscription {
        CampaignSubscription {
            campaign_id,
            receiver: self.sender.subscribe(),
            missed: 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("published", &self.published_count())
            .finish()
    }
}

/// Receiver filtered to a single campaign.
pub struct CampaignSubscription {
    campaign_id: Uuid,
    receiver: broadcast::Receiver<EventEnvelope>,
    missed: u64,
}

impl CampaignSubscription {
    pub fn campaign_id(&self) -> Uuid {
        self.campaign_id
    }

    /// Next event for this campaign, or `None` once the bus is gone.
    /// Events dropped because the subscriber lagged are counted in
    /// [`missed`](Self::missed).
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) if envelope.event.campaign_id() == self.campaign_id => {
                    return Some(envelope)
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => self.missed += skipped,
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn missed(&self) -> u64 {
        self.missed
    }
}
