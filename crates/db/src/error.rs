use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Campaign not found: {0}")]
    CampaignNotFound(Uuid),

    #[error("Batch job not found: {0}")]
    BatchJobNotFound(Uuid),

    /// Optimistic version check failed: another writer committed first.
    #[error("Campaign {id} was modified concurrently (expected version {expected_version})")]
    Conflict { id: Uuid, expected_version: i64 },

    #[error("Corrupt {column} column for {id}: {source}")]
    Corrupt {
        id: String,
        column: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl DbError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// True when the error is a UNIQUE constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}
