use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use hookline_core::{BatchJob, BatchKind};
use orchestrator::SubmitOutcome;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

fn parse_kind(kind: &str) -> Result<BatchKind, AppError> {
    BatchKind::parse(kind).ok_or_else(|| AppError::BadRequest(format!("Unknown batch kind: {}", kind)))
}

/// 202 for a new provider job, 200 when an existing one is returned.
fn submit_response(outcome: SubmitOutcome) -> (StatusCode, Json<BatchJob>) {
    let status = if outcome.created {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    (status, Json(outcome.job))
}

#[utoipa::path(
    post,
    path = "/api/campaigns/{id}/batches/{kind}",
    params(
        ("id" = Uuid, Path, description = "Campaign ID"),
        ("kind" = String, Path, description = "hooks or scripts")
    ),
    responses(
        (status = 202, description = "Batch submitted", body = BatchJob),
        (status = 200, description = "Existing batch job returned", body = BatchJob),
        (status = 400, description = "Campaign is not ready for this batch"),
        (status = 404, description = "Campaign not found"),
        (status = 503, description = "Provider unavailable")
    ),
    tag = "batches"
)]
pub async fn submit_batch(
    State(state): State<AppState>,
    Path((id, kind)): Path<(Uuid, String)>,
) -> Result<(StatusCode, Json<BatchJob>), AppError> {
    let kind = parse_kind(&kind)?;
    let outcome = state.pipeline.submit_batch(id, kind).await?;
    Ok(submit_response(outcome))
}

#[utoipa::path(
    post,
    path = "/api/campaigns/{id}/batches/{kind}/retry",
    params(
        ("id" = Uuid, Path, description = "Campaign ID"),
        ("kind" = String, Path, description = "hooks or scripts")
    ),
    responses(
        (status = 202, description = "Missing items resubmitted", body = BatchJob),
        (status = 200, description = "A batch for this kind is already in flight", body = BatchJob),
        (status = 400, description = "Nothing is missing"),
        (status = 404, description = "Campaign not found")
    ),
    tag = "batches"
)]
pub async fn retry_batch(
    State(state): State<AppState>,
    Path((id, kind)): Path<(Uuid, String)>,
) -> Result<(StatusCode, Json<BatchJob>), AppError> {
    let kind = parse_kind(&kind)?;
    let outcome = state.pipeline.retry_batch(id, kind).await?;
    Ok(submit_response(outcome))
}

#[utoipa::path(
    get,
    path = "/api/campaigns/{id}/batches",
    params(
        ("id" = Uuid, Path, description = "Campaign ID")
    ),
    responses(
        (status = 200, description = "Batch job history, oldest first", body = Vec<BatchJob>),
        (status = 404, description = "Campaign not found")
    ),
    tag = "batches"
)]
pub async fn list_batches(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<BatchJob>>, AppError> {
    let jobs = state.pipeline.list_batches(id).await?;
    Ok(Json(jobs))
}
