use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider rate limited, retry after {retry_after:?}s")]
    RateLimited { retry_after: Option<u64> },

    #[error("Provider request timed out: {0}")]
    Timeout(String),

    #[error("Provider API error: {message}")]
    Api {
        message: String,
        status_code: Option<u16>,
    },

    #[error("Provider rejected credentials: {0}")]
    Unauthorized(String),

    #[error("Batch not found: {0}")]
    BatchNotFound(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProviderError {
    /// Errors worth retrying: timeouts, rate limits, server-side failures.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) => true,
            Self::Api {
                status_code: Some(code),
                ..
            } => *code >= 500,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// The request provably never reached processing, so sending it again
    /// cannot duplicate work. A timeout or 5xx may follow acceptance and is
    /// not included.
    pub fn is_safe_to_resend(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Http(e) => e.is_connect(),
            _ => false,
        }
    }

    /// The provider refused the request outright, so nothing was created.
    pub fn is_rejection(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Unauthorized(_) => true,
            Self::Api {
                status_code: Some(code),
                ..
            } => (400..500).contains(code),
            Self::Http(e) => e.is_connect(),
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::RateLimited { retry_after: None }.is_transient());
        assert!(ProviderError::Timeout("slow".into()).is_transient());
        assert!(ProviderError::Api {
            message: "overloaded".into(),
            status_code: Some(529),
        }
        .is_transient());

        assert!(!ProviderError::Api {
            message: "bad request".into(),
            status_code: Some(400),
        }
        .is_transient());
        assert!(!ProviderError::Unauthorized("bad key".into()).is_transient());
        assert!(!ProviderError::BatchNotFound("b".into()).is_transient());
        assert!(!ProviderError::InvalidResponse("junk".into()).is_transient());
    }

    #[test]
    fn test_ambiguous_failures_are_not_safe_to_resend() {
        assert!(ProviderError::RateLimited { retry_after: Some(3) }.is_safe_to_resend());
        assert!(!ProviderError::Timeout("slow".into()).is_safe_to_resend());
        assert!(!ProviderError::Api {
            message: "internal".into(),
            status_code: Some(500),
        }
        .is_safe_to_resend());
    }

    #[test]
    fn test_rejections_prove_nothing_was_created() {
        assert!(ProviderError::Unauthorized("bad key".into()).is_rejection());
        assert!(ProviderError::Api {
            message: "bad request".into(),
            status_code: Some(400),
        }
        .is_rejection());
        assert!(!ProviderError::Timeout("slow".into()).is_rejection());
        assert!(!ProviderError::InvalidResponse("junk".into()).is_rejection());
    }
}
