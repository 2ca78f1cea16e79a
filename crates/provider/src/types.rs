use hookline_core::BatchStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single synchronous generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Name of the phase issuing the call, used for logging and routing.
    pub label: String,
    pub thread_id: Option<String>,
    /// Rendered context bundle.
    pub context: String,
    pub phase_instructions: String,
}

/// One sub-request inside a batch submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchRequest {
    pub custom_id: String,
    pub phase_instructions: String,
    pub context: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStatusReport {
    pub status: BatchStatus,
    pub succeeded: u32,
    pub errored: u32,
    pub processing: u32,
}

impl BatchStatusReport {
    /// Derive the lifecycle status from request counts once the provider
    /// reports the batch as ended.
    pub fn ended(succeeded: u32, errored: u32) -> Self {
        let status = if errored == 0 {
            BatchStatus::Completed
        } else if succeeded == 0 {
            BatchStatus::Failed
        } else {
            BatchStatus::PartiallyCompleted
        };

        Self {
            status,
            succeeded,
            errored,
            processing: 0,
        }
    }

    pub fn in_progress(succeeded: u32, errored: u32, processing: u32) -> Self {
        Self {
            status: BatchStatus::Processing,
            succeeded,
            errored,
            processing,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum BatchItemOutcome {
    Succeeded(Value),
    Errored(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResultItem {
    pub custom_id: String,
    pub outcome: BatchItemOutcome,
}

impl BatchResultItem {
    pub fn succeeded(custom_id: impl Into<String>, value: Value) -> Self {
        Self {
            custom_id: custom_id.into(),
            outcome: BatchItemOutcome::Succeeded(value),
        }
    }

    pub fn errored(custom_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            custom_id: custom_id.into(),
            outcome: BatchItemOutcome::Errored(error.into()),
        }
    }
}

/// Turn model output text into JSON.
///
/// Markdown code fences are stripped. Text that is not JSON is returned as a
/// JSON string so schema validation downstream can reject it.
pub fn parse_model_output(text: &str) -> Value {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    serde_json::from_str(body).unwrap_or_else(|_| Value::String(text.to_string()))
}
