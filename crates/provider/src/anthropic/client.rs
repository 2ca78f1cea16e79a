use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::types::*;
use crate::error::{ProviderError, ProviderResult};
use crate::traits::{BatchProvider, GenerationProvider};
use crate::types::{
    parse_model_output, BatchItemOutcome, BatchRequest, BatchResultItem, BatchStatusReport,
    GenerationRequest,
};

const API_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const DEFAULT_MAX_TOKENS: u32 = 8192;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_THREAD_TTL: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub request_timeout: Duration,
    /// How long a conversation handle stays usable.
    pub thread_ttl: Duration,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            thread_ttl: DEFAULT_THREAD_TTL,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_thread_ttl(mut self, ttl: Duration) -> Self {
        self.thread_ttl = ttl;
        self
    }
}

/// Client for the Anthropic Messages API.
///
/// The Messages API is stateless, so conversation threads are tracked locally
/// with a TTL. A handle issued by another process, or one that outlived its
/// TTL, reports as dead and the caller rebuilds context.
#[derive(Clone)]
pub struct AnthropicClient {
    client: Client,
    config: AnthropicConfig,
    threads: Arc<Mutex<HashMap<String, Instant>>>,
}

impl AnthropicClient {
    pub fn new(config: AnthropicConfig) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            config,
            threads: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn config(&self) -> &AnthropicConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
    }

    fn message_params(&self, system: &str, context: &str, thread_id: Option<&str>) -> MessagesRequest {
        MessagesRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            system: Some(system.to_string()),
            messages: vec![Message::user(context)],
            metadata: thread_id.map(|id| RequestMetadata {
                user_id: id.to_string(),
            }),
        }
    }

    /// Map a non-success response onto the error taxonomy.
    async fn error_from_response(response: Response) -> ProviderError {
        let status = response.status();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let error_text = response.text().await.unwrap_or_default();

        let message = serde_json::from_str::<ApiErrorResponse>(&error_text)
            .map(|e| {
                error!(
                    "Anthropic API error: {} (type: {})",
                    e.error.message, e.error.error_type
                );
                e.error.message
            })
            .unwrap_or(error_text);

        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                warn!("Rate limited by Anthropic");
                ProviderError::RateLimited { retry_after }
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Unauthorized(message),
            StatusCode::REQUEST_TIMEOUT => ProviderError::Timeout(message),
            _ => ProviderError::Api {
                message,
                status_code: Some(status.as_u16()),
            },
        }
    }

    fn map_send_error(e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout(e.to_string())
        } else {
            ProviderError::Http(e)
        }
    }

    async fn fetch_batch(&self, batch_id: &str) -> ProviderResult<MessageBatch> {
        let response = self
            .request(reqwest::Method::GET, &format!("/v1/messages/batches/{}", batch_id))
            .send()
            .await
            .map_err(Self::map_send_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ProviderError::BatchNotFound(batch_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        Ok(response.json().await?)
    }

    fn parse_result_line(line: &str) -> ProviderResult<BatchResultItem> {
        let parsed: BatchResultLine = serde_json::from_str(line)?;
        let outcome = match parsed.result {
            BatchLineResult::Succeeded { message } => {
                BatchItemOutcome::Succeeded(parse_model_output(&message.text()))
            }
            BatchLineResult::Errored { error } => BatchItemOutcome::Errored(
                error
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string()),
            ),
            BatchLineResult::Canceled => BatchItemOutcome::Errored("canceled".to_string()),
            BatchLineResult::Expired => BatchItemOutcome::Errored("expired".to_string()),
        };

        Ok(BatchResultItem {
            custom_id: parsed.custom_id,
            outcome,
        })
    }
}

#[async_trait]
impl GenerationProvider for AnthropicClient {
    async fn create_thread(&self) -> ProviderResult<String> {
        let handle = format!("thread_{}", Uuid::new_v4().simple());
        let mut threads = self.threads.lock().unwrap_or_else(|p| p.into_inner());
        threads.insert(handle.clone(), Instant::now());
        debug!(thread_id = %handle, "Created conversation thread");
        Ok(handle)
    }

    async fn thread_alive(&self, thread_id: &str) -> ProviderResult<bool> {
        let mut threads = self.threads.lock().unwrap_or_else(|p| p.into_inner());
        let ttl = self.config.thread_ttl;
        threads.retain(|_, created| created.elapsed() < ttl);
        Ok(threads.contains_key(thread_id))
    }

    async fn generate(&self, request: GenerationRequest) -> ProviderResult<Value> {
        debug!(
            label = %request.label,
            context_len = request.context.len(),
            model = %self.config.model,
            "Creating message"
        );

        let body = self.message_params(
            &request.phase_instructions,
            &request.context,
            request.thread_id.as_deref(),
        );

        let response = self
            .request(reqwest::Method::POST, "/v1/messages")
            .json(&body)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let message: MessagesResponse = response.json().await?;
        if message.stop_reason.as_deref() == Some("max_tokens") {
            warn!(label = %request.label, "Response truncated at max_tokens");
        }

        Ok(parse_model_output(&message.text()))
    }
}

#[async_trait]
impl BatchProvider for AnthropicClient {
    async fn submit_batch(&self, requests: Vec<BatchRequest>) -> ProviderResult<String> {
        debug!("Submitting batch with {} requests", requests.len());

        let body = BatchCreateRequest {
            requests: requests
                .iter()
                .map(|r| BatchEntry {
                    custom_id: r.custom_id.clone(),
                    params: self.message_params(&r.phase_instructions, &r.context, None),
                })
                .collect(),
        };

        let response = self
            .request(reqwest::Method::POST, "/v1/messages/batches")
            .json(&body)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let batch: MessageBatch = response.json().await?;
        Ok(batch.id)
    }

    async fn batch_status(&self, batch_id: &str) -> ProviderResult<BatchStatusReport> {
        let batch = self.fetch_batch(batch_id).await?;
        let counts = batch.request_counts;

        Ok(match batch.processing_status {
            ProcessingStatus::Ended => BatchStatusReport::ended(counts.succeeded, counts.failed()),
            ProcessingStatus::InProgress | ProcessingStatus::Canceling => {
                BatchStatusReport::in_progress(counts.succeeded, counts.failed(), counts.processing)
            }
        })
    }

    async fn batch_results(&self, batch_id: &str) -> ProviderResult<Vec<BatchResultItem>> {
        let batch = self.fetch_batch(batch_id).await?;
        if batch.processing_status != ProcessingStatus::Ended {
            return Err(ProviderError::InvalidResponse(format!(
                "batch {} has not ended",
                batch_id
            )));
        }

        let path = format!("/v1/messages/batches/{}/results", batch_id);
        let response = self
            .request(reqwest::Method::GET, &path)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ProviderError::BatchNotFound(batch_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let body = response.text().await?;
        let mut items = Vec::new();
        for line in body.lines().filter(|l| !l.trim().is_empty()) {
            match Self::parse_result_line(line) {
                Ok(item) => items.push(item),
                Err(e) => warn!(batch_id = %batch_id, "Skipping unreadable result line: {}", e),
            }
        }

        Ok(items)
    }
}
