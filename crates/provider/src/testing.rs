//! In-memory provider for tests.
//!
//! Generation responses are queued per label. Batch results are produced at
//! submit time by a responder closure, and a batch reports as processing for a
//! configurable number of polls before it ends.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ProviderError, ProviderResult};
use crate::traits::{BatchProvider, GenerationProvider};
use crate::types::{
    BatchItemOutcome, BatchRequest, BatchResultItem, BatchStatusReport, GenerationRequest,
};

/// Produces the outcome for one batch sub-request. `None` leaves the custom id
/// out of the results entirely.
pub type BatchResponder = Arc<dyn Fn(&BatchRequest) -> Option<BatchItemOutcome> + Send + Sync>;

struct FakeBatch {
    requests: Vec<BatchRequest>,
    results: Vec<BatchResultItem>,
    polls_remaining: u32,
}

#[derive(Default)]
struct FakeState {
    threads: HashSet<String>,
    next_thread: u32,
    responses: HashMap<String, VecDeque<ProviderResult<Value>>>,
    generate_calls: Vec<GenerationRequest>,
    batches: HashMap<String, FakeBatch>,
    next_batch: u32,
    submit_calls: u32,
    submit_failures: VecDeque<ProviderError>,
}

pub struct FakeProvider {
    state: Mutex<FakeState>,
    responder: Mutex<BatchResponder>,
    polls_before_end: u32,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            responder: Mutex::new(Arc::new(|_| {
                Some(BatchItemOutcome::Errored("no batch responder configured".into()))
            })),
            polls_before_end: 0,
        }
    }

    /// Number of status polls that report `processing` before a batch ends.
    pub fn with_polls_before_end(mut self, polls: u32) -> Self {
        self.polls_before_end = polls;
        self
    }

    pub fn with_batch_responder<F>(self, responder: F) -> Self
    where
        F: Fn(&BatchRequest) -> Option<BatchItemOutcome> + Send + Sync + 'static,
    {
        self.set_batch_responder(responder);
        self
    }

    /// Replace the responder used for batches submitted from now on.
    pub fn set_batch_responder<F>(&self, responder: F)
    where
        F: Fn(&BatchRequest) -> Option<BatchItemOutcome> + Send + Sync + 'static,
    {
        *self.responder.lock().unwrap_or_else(|p| p.into_inner()) = Arc::new(responder);
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn push_response(&self, label: &str, value: Value) {
        self.state()
            .responses
            .entry(label.to_string())
            .or_default()
            .push_back(Ok(value));
    }

    pub fn push_error(&self, label: &str, error: ProviderError) {
        self.state()
            .responses
            .entry(label.to_string())
            .or_default()
            .push_back(Err(error));
    }

    pub fn generate_requests(&self) -> Vec<GenerationRequest> {
        self.state().generate_calls.clone()
    }

    pub fn requests_for(&self, label: &str) -> Vec<GenerationRequest> {
        self.state()
            .generate_calls
            .iter()
            .filter(|r| r.label == label)
            .cloned()
            .collect()
    }

    /// Invalidate every issued thread handle.
    pub fn expire_threads(&self) {
        self.state().threads.clear();
    }

    pub fn fail_next_submit(&self, error: ProviderError) {
        self.state().submit_failures.push_back(error);
    }

    pub fn submit_count(&self) -> u32 {
        self.state().submit_calls
    }

    pub fn batch_requests(&self, batch_id: &str) -> Option<Vec<BatchRequest>> {
        self.state()
            .batches
            .get(batch_id)
            .map(|b| b.requests.clone())
    }

    /// Forget a batch so later lookups report it as not found.
    pub fn remove_batch(&self, batch_id: &str) {
        self.state().batches.remove(batch_id);
    }
}

#[async_trait]
impl GenerationProvider for FakeProvider {
    async fn create_thread(&self) -> ProviderResult<String> {
        let mut state = self.state();
        state.next_thread += 1;
        let handle = format!("thread_fake_{}", state.next_thread);
        state.threads.insert(handle.clone());
        Ok(handle)
    }

    async fn thread_alive(&self, thread_id: &str) -> ProviderResult<bool> {
        Ok(self.state().threads.contains(thread_id))
    }

    async fn generate(&self, request: GenerationRequest) -> ProviderResult<Value> {
        let mut state = self.state();
        let label = request.label.clone();
        state.generate_calls.push(request);
        state
            .responses
            .get_mut(&label)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| {
                Err(ProviderError::InvalidResponse(format!(
                    "no response queued for {}",
                    label
                )))
            })
    }
}

#[async_trait]
impl BatchProvider for FakeProvider {
    async fn submit_batch(&self, requests: Vec<BatchRequest>) -> ProviderResult<String> {
        let responder = self
            .responder
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();

        let mut state = self.state();
        state.submit_calls += 1;
        if let Some(error) = state.submit_failures.pop_front() {
            return Err(error);
        }

        let results = requests
            .iter()
            .filter_map(|r| {
                responder(r).map(|outcome| BatchResultItem {
                    custom_id: r.custom_id.clone(),
                    outcome,
                })
            })
            .collect();

        state.next_batch += 1;
        let batch_id = format!("msgbatch_fake_{}", state.next_batch);
        state.batches.insert(
            batch_id.clone(),
            FakeBatch {
                requests,
                results,
                polls_remaining: self.polls_before_end,
            },
        );
        Ok(batch_id)
    }

    async fn batch_status(&self, batch_id: &str) -> ProviderResult<BatchStatusReport> {
        let mut state = self.state();
        let batch = state
            .batches
            .get_mut(batch_id)
            .ok_or_else(|| ProviderError::BatchNotFound(batch_id.to_string()))?;

        if batch.polls_remaining > 0 {
            batch.polls_remaining -= 1;
            return Ok(BatchStatusReport::in_progress(
                0,
                0,
                batch.requests.len() as u32,
            ));
        }

        let succeeded = batch
            .results
            .iter()
            .filter(|r| matches!(r.outcome, BatchItemOutcome::Succeeded(_)))
            .count() as u32;
        let errored = batch.requests.len() as u32 - succeeded;
        Ok(BatchStatusReport::ended(succeeded, errored))
    }

    async fn batch_results(&self, batch_id: &str) -> ProviderResult<Vec<BatchResultItem>> {
        let state = self.state();
        let batch = state
            .batches
            .get(batch_id)
            .ok_or_else(|| ProviderError::BatchNotFound(batch_id.to_string()))?;

        if batch.polls_remaining > 0 {
            return Err(ProviderError::InvalidResponse(format!(
                "batch {} has not ended",
                batch_id
            )));
        }
        Ok(batch.results.clone())
    }
}
