use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Campaign not found: {0}")]
    CampaignNotFound(Uuid),

    #[error("Batch job not found: {0}")]
    BatchJobNotFound(Uuid),

    #[error("Invalid campaign status transition from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("Unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("Validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let id = Uuid::new_v4();
        let error = CoreError::CampaignNotFound(id);
        assert!(error.to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_unknown_variant_display() {
        let error = CoreError::UnknownVariant {
            kind: "phase",
            value: "teaser".to_string(),
        };
        assert_eq!(error.to_string(), "Unknown phase: teaser");
    }
}
