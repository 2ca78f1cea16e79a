use db::DbError;
use hookline_core::BatchKind;
use provider::ProviderError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Campaign not found: {0}")]
    CampaignNotFound(Uuid),

    #[error("Batch job not found: {0}")]
    BatchJobNotFound(Uuid),

    /// Provider output did not match the phase schema. Nothing is committed.
    #[error("Malformed {phase} output: {reason}")]
    Schema { phase: String, reason: String },

    #[error("Referential integrity violation: {0}")]
    ReferentialIntegrity(String),

    /// Transient provider failures that outlasted the retry budget.
    #[error("Provider unavailable after {attempts} attempts: {source}")]
    TransientProvider {
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error("Batch {0} no longer exists at the provider")]
    BatchNotFound(String),

    #[error("{kind} batch left {} items without output", failed_custom_ids.len())]
    PartialBatchFailure {
        kind: BatchKind,
        failed_custom_ids: Vec<String>,
    },

    /// Another writer committed first. The caller re-reads and retries.
    #[error("Campaign {campaign_id} was modified concurrently")]
    PersistenceConflict { campaign_id: Uuid },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Provider error: {0}")]
    Provider(ProviderError),

    #[error("Database error: {0}")]
    Database(DbError),
}

impl OrchestratorError {
    pub fn schema(phase: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Self::Schema {
            phase: phase.to_string(),
            reason: reason.into(),
        }
    }

    /// Wrap a provider error that survived `with_retry`.
    pub fn from_provider(error: ProviderError, attempts: u32) -> Self {
        match error {
            ProviderError::BatchNotFound(id) => Self::BatchNotFound(id),
            e if e.is_transient() => Self::TransientProvider {
                attempts,
                source: e,
            },
            e => Self::Provider(e),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::PersistenceConflict { .. })
    }
}

impl From<DbError> for OrchestratorError {
    fn from(error: DbError) -> Self {
        match error {
            DbError::Conflict { id, .. } => Self::PersistenceConflict { campaign_id: id },
            DbError::CampaignNotFound(id) => Self::CampaignNotFound(id),
            DbError::BatchJobNotFound(id) => Self::BatchJobNotFound(id),
            other => Self::Database(other),
        }
    }
}

impl From<ProviderError> for OrchestratorError {
    fn from(error: ProviderError) -> Self {
        Self::from_provider(error, 1)
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_conflict_maps_to_persistence_conflict() {
        let id = Uuid::new_v4();
        let err: OrchestratorError = DbError::Conflict {
            id,
            expected_version: 3,
        }
        .into();
        assert!(err.is_conflict());
        assert!(matches!(err, OrchestratorError::PersistenceConflict { campaign_id } if campaign_id == id));
    }

    #[test]
    fn test_provider_errors_are_classified() {
        let transient = OrchestratorError::from_provider(ProviderError::Timeout("slow".into()), 3);
        assert!(matches!(
            transient,
            OrchestratorError::TransientProvider { attempts: 3, .. }
        ));

        let gone: OrchestratorError = ProviderError::BatchNotFound("msgbatch_1".into()).into();
        assert!(matches!(gone, OrchestratorError::BatchNotFound(id) if id == "msgbatch_1"));

        let auth: OrchestratorError = ProviderError::Unauthorized("bad key".into()).into();
        assert!(matches!(auth, OrchestratorError::Provider(_)));
    }

    #[test]
    fn test_partial_failure_message_counts_items() {
        let err = OrchestratorError::PartialBatchFailure {
            kind: BatchKind::Scripts,
            failed_custom_ids: vec!["scripts-a".into(), "scripts-b".into()],
        };
        assert_eq!(err.to_string(), "scripts batch left 2 items without output");
    }
}
