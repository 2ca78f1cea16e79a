use std::sync::{Arc, RwLock};

use db::SqlitePool;
use events::EventBus;
use orchestrator::{CampaignPipeline, PipelineConfig};
use provider::Provider;

use crate::routes::sse::{EventBuffer, SharedEventBuffer, DEFAULT_EVENT_BUFFER_SIZE};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: CampaignPipeline,
    pub event_bus: EventBus,
    pub event_buffer: SharedEventBuffer,
}

impl AppState {
    pub fn new(pool: SqlitePool, provider: Arc<dyn Provider>, config: PipelineConfig) -> Self {
        let event_bus = EventBus::new();
        let pipeline = CampaignPipeline::with_event_bus(pool, provider, config, event_bus.clone());

        Self {
            pipeline,
            event_bus,
            event_buffer: Arc::new(RwLock::new(EventBuffer::new(DEFAULT_EVENT_BUFFER_SIZE))),
        }
    }
}
