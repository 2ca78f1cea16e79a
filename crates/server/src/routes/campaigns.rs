use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use hookline_core::{Campaign, CreateCampaignRequest, Phase};
use orchestrator::ReconcileOutcome;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/api/campaigns",
    responses(
        (status = 200, description = "List all campaigns", body = Vec<Campaign>)
    ),
    tag = "campaigns"
)]
pub async fn list_campaigns(State(state): State<AppState>) -> Result<Json<Vec<Campaign>>, AppError> {
    let campaigns = state.pipeline.list().await?;
    Ok(Json(campaigns))
}

#[utoipa::path(
    post,
    path = "/api/campaigns",
    request_body = CreateCampaignRequest,
    responses(
        (status = 201, description = "Campaign created with its product info", body = Campaign),
        (status = 400, description = "Missing owner"),
        (status = 422, description = "Product info is not a JSON object")
    ),
    tag = "campaigns"
)]
pub async fn create_campaign(
    State(state): State<AppState>,
    Json(payload): Json<CreateCampaignRequest>,
) -> Result<(StatusCode, Json<Campaign>), AppError> {
    let campaign = state.pipeline.create_campaign(payload).await?;
    Ok((StatusCode::CREATED, Json(campaign)))
}

#[utoipa::path(
    get,
    path = "/api/campaigns/{id}",
    params(
        ("id" = Uuid, Path, description = "Campaign ID")
    ),
    responses(
        (status = 200, description = "Current persisted campaign state", body = Campaign),
        (status = 404, description = "Campaign not found")
    ),
    tag = "campaigns"
)]
pub async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, AppError> {
    let campaign = state.pipeline.get(id).await?;
    Ok(Json(campaign))
}

#[utoipa::path(
    post,
    path = "/api/campaigns/{id}/phases/{phase}",
    params(
        ("id" = Uuid, Path, description = "Campaign ID"),
        ("phase" = String, Path, description = "avatar, journey, objections or angles")
    ),
    responses(
        (status = 200, description = "Phase output committed", body = Campaign),
        (status = 400, description = "Unknown phase or phase not ready"),
        (status = 404, description = "Campaign not found"),
        (status = 422, description = "Provider output did not match the phase schema"),
        (status = 503, description = "Provider unavailable")
    ),
    tag = "campaigns"
)]
pub async fn run_phase(
    State(state): State<AppState>,
    Path((id, phase)): Path<(Uuid, String)>,
) -> Result<Json<Campaign>, AppError> {
    let phase = Phase::parse(&phase)
        .filter(Phase::is_single_shot)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown generation phase: {}", phase)))?;
    let campaign = state.pipeline.run_phase(id, phase).await?;
    Ok(Json(campaign))
}

#[utoipa::path(
    post,
    path = "/api/campaigns/{id}/pause",
    params(
        ("id" = Uuid, Path, description = "Campaign ID")
    ),
    responses(
        (status = 200, description = "Campaign paused", body = Campaign),
        (status = 400, description = "Campaign cannot be paused"),
        (status = 404, description = "Campaign not found")
    ),
    tag = "campaigns"
)]
pub async fn pause_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, AppError> {
    Ok(Json(state.pipeline.pause(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/campaigns/{id}/resume",
    params(
        ("id" = Uuid, Path, description = "Campaign ID")
    ),
    responses(
        (status = 200, description = "Campaign resumed at its prior status", body = Campaign),
        (status = 400, description = "Campaign is not paused"),
        (status = 404, description = "Campaign not found")
    ),
    tag = "campaigns"
)]
pub async fn resume_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, AppError> {
    Ok(Json(state.pipeline.resume(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/campaigns/{id}/retry",
    params(
        ("id" = Uuid, Path, description = "Campaign ID")
    ),
    responses(
        (status = 200, description = "Failed campaign returned to its last good status", body = Campaign),
        (status = 400, description = "Campaign has not failed"),
        (status = 404, description = "Campaign not found")
    ),
    tag = "campaigns"
)]
pub async fn retry_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, AppError> {
    Ok(Json(state.pipeline.retry(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/campaigns/{id}/finalize",
    params(
        ("id" = Uuid, Path, description = "Campaign ID")
    ),
    responses(
        (status = 200, description = "Campaign completed", body = Campaign),
        (status = 400, description = "Campaign has no scripts to finalize"),
        (status = 404, description = "Campaign not found")
    ),
    tag = "campaigns"
)]
pub async fn finalize_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, AppError> {
    Ok(Json(state.pipeline.finalize(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/check-and-process-batch/{id}",
    params(
        ("id" = Uuid, Path, description = "Campaign ID")
    ),
    responses(
        (status = 200, description = "Batch polled and, when finished, harvested", body = ReconcileOutcome),
        (status = 404, description = "Campaign not found"),
        (status = 503, description = "Provider unavailable")
    ),
    tag = "batches"
)]
pub async fn check_and_process_batch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReconcileOutcome>, AppError> {
    let outcome = state.pipeline.check_and_process_batch(id).await?;
    Ok(Json(outcome))
}
