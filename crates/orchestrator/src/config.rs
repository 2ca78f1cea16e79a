use std::time::Duration;

use provider::RetryPolicy;

pub const DEFAULT_MIN_SUCCESS_RATIO: f64 = 0.9;
pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 60_000;
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_SUBMIT_GRACE: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_MAX_RESUBMISSIONS: u32 = 2;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Fraction of parents that must have output for a batch phase to advance.
    pub min_success_ratio: f64,
    pub retry: RetryPolicy,
    /// In-flight batches older than this are treated as failed.
    pub batch_timeout: Duration,
    /// A claimed job that never received an external id is abandoned after this.
    pub submit_grace: Duration,
    pub poll_interval: Duration,
    pub max_context_chars: usize,
    pub auto_resubmit_missing: bool,
    pub max_resubmissions: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_success_ratio: DEFAULT_MIN_SUCCESS_RATIO,
            retry: RetryPolicy::default(),
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
            submit_grace: DEFAULT_SUBMIT_GRACE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
            auto_resubmit_missing: false,
            max_resubmissions: DEFAULT_MAX_RESUBMISSIONS,
        }
    }
}

impl PipelineConfig {
    pub fn with_min_success_ratio(mut self, ratio: f64) -> Self {
        self.min_success_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    pub fn with_submit_grace(mut self, grace: Duration) -> Self {
        self.submit_grace = grace;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_context_chars(mut self, max: usize) -> Self {
        self.max_context_chars = max;
        self
    }

    pub fn with_auto_resubmit(mut self, enabled: bool, max_resubmissions: u32) -> Self {
        self.auto_resubmit_missing = enabled;
        self.max_resubmissions = max_resubmissions;
        self
    }
}
