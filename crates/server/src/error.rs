use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use orchestrator::OrchestratorError;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Orchestrator(OrchestratorError),
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::Orchestrator(err) => {
                let message = err.to_string();
                match err {
                    OrchestratorError::CampaignNotFound(_)
                    | OrchestratorError::BatchJobNotFound(_) => {
                        (StatusCode::NOT_FOUND, "not_found", message)
                    }
                    OrchestratorError::BatchNotFound(_) => {
                        (StatusCode::NOT_FOUND, "batch_not_found", message)
                    }
                    OrchestratorError::InvalidTransition { .. } => {
                        (StatusCode::BAD_REQUEST, "invalid_transition", message)
                    }
                    OrchestratorError::Validation(_) => {
                        (StatusCode::BAD_REQUEST, "bad_request", message)
                    }
                    OrchestratorError::Schema { .. } => {
                        (StatusCode::UNPROCESSABLE_ENTITY, "schema_error", message)
                    }
                    OrchestratorError::ReferentialIntegrity(_) => (
                        StatusCode::UNPROCESSABLE_ENTITY,
                        "referential_integrity",
                        message,
                    ),
                    OrchestratorError::PartialBatchFailure { .. } => (
                        StatusCode::UNPROCESSABLE_ENTITY,
                        "partial_batch_failure",
                        message,
                    ),
                    OrchestratorError::PersistenceConflict { .. } => {
                        (StatusCode::CONFLICT, "conflict", message)
                    }
                    OrchestratorError::TransientProvider { .. } => {
                        tracing::warn!("Provider unavailable: {}", message);
                        (
                            StatusCode::SERVICE_UNAVAILABLE,
                            "provider_unavailable",
                            message,
                        )
                    }
                    OrchestratorError::Provider(e) => {
                        tracing::error!("Provider error: {:?}", e);
                        (StatusCode::INTERNAL_SERVER_ERROR, "provider_error", message)
                    }
                    OrchestratorError::Database(e) => {
                        tracing::error!("Database error: {:?}", e);
                        (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "database_error",
                            "Database error occurred".to_string(),
                        )
                    }
                }
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

impl From<OrchestratorError> for AppError {
    fn from(err: OrchestratorError) -> Self {
        AppError::Orchestrator(err)
    }
}
