use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProviderResult;
use crate::types::{BatchRequest, BatchResultItem, BatchStatusReport, GenerationRequest};

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Open a conversation handle for provider-side continuity.
    async fn create_thread(&self) -> ProviderResult<String>;

    /// Whether a previously issued handle is still usable.
    async fn thread_alive(&self, thread_id: &str) -> ProviderResult<bool>;

    async fn generate(&self, request: GenerationRequest) -> ProviderResult<Value>;
}

#[async_trait]
pub trait BatchProvider: Send + Sync {
    /// Submit all sub-requests as one batch; returns the external batch id.
    async fn submit_batch(&self, requests: Vec<BatchRequest>) -> ProviderResult<String>;

    async fn batch_status(&self, batch_id: &str) -> ProviderResult<BatchStatusReport>;

    async fn batch_results(&self, batch_id: &str) -> ProviderResult<Vec<BatchResultItem>>;
}

pub trait Provider: GenerationProvider + BatchProvider {}

impl<T: GenerationProvider + BatchProvider> Provider for T {}
